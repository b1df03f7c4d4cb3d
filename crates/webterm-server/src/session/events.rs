//! Session events and their fan-out to viewers.

use tokio::sync::broadcast;
use webterm_core::ServerMessage;

/// Capacity of the broadcast channel. A viewer that falls further behind
/// than this observes `Lagged` and should re-fetch the replay buffer.
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Status notice published when the shell closes its output.
pub const SESSION_ENDED_NOTICE: &str = "Terminal session ended";

/// Something every connected viewer should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Terminal output.
    Output(String),
    /// The shell closed its output; the session is over until reset.
    Ended,
    /// A fault the viewer should see.
    Error(String),
    /// A status notice (resize, reset, degraded shell, ...).
    Status(String),
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Output(data) => ServerMessage::output(data),
            SessionEvent::Ended => ServerMessage::status(SESSION_ENDED_NOTICE),
            SessionEvent::Error(error) => ServerMessage::error(error),
            SessionEvent::Status(data) => ServerMessage::status(data),
        }
    }
}

/// Publishes session events to any number of subscribers.
///
/// Publishing never blocks and succeeds with no subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        // An error only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(SessionEvent::Status("nobody home".into()));
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::Output("a".into()));
        bus.publish(SessionEvent::Ended);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Output("a".into()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Ended);
    }

    #[test]
    fn events_map_to_wire_messages() {
        assert_eq!(
            ServerMessage::from(SessionEvent::Ended),
            ServerMessage::status("Terminal session ended")
        );
        assert_eq!(
            ServerMessage::from(SessionEvent::Error("boom".into())),
            ServerMessage::error("boom")
        );
        assert_eq!(
            ServerMessage::from(SessionEvent::Output("x".into())).event_name(),
            "terminal_output"
        );
    }
}
