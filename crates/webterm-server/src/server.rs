//! Transport adapter: connects viewers to the terminal session.
//!
//! Each viewer gets the replay buffer and a welcome notice on connect, then
//! every session event from that point on. Inbound messages are mapped onto
//! `SessionManager` calls, which run on the blocking pool because they take
//! the process lock.

use crate::config::ServerConfig;
use crate::session::{SessionEvent, SessionManager};
use crate::transport::websocket::{self, Inbound, WebSocketConnection, WsSink, WsSource};
use futures_util::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webterm_core::{ClientMessage, ServerMessage, TermError, TermResult};

/// Sent to each viewer right after its replay.
pub const WELCOME_NOTICE: &str = "Connected to terminal.";

/// The webterm server instance.
pub struct WebTermServer {
    config: ServerConfig,
    manager: Arc<SessionManager>,
    next_viewer: AtomicU64,
}

impl WebTermServer {
    pub fn new(config: ServerConfig, manager: Arc<SessionManager>) -> Self {
        Self {
            config,
            manager,
            next_viewer: AtomicU64::new(1),
        }
    }

    /// Bind the configured address and serve viewers until the listener closes.
    pub async fn run(self) -> TermResult<()> {
        let ip: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|e| TermError::Config(format!("invalid host {:?}: {e}", self.config.host)))?;
        let (addr, rx) = websocket::start_listener(SocketAddr::new(ip, self.config.port)).await?;
        info!(addr = %addr, "webterm-server ready");
        Arc::new(self).serve(rx).await;
        Ok(())
    }

    /// Accept viewers from `rx` until it closes.
    pub async fn serve(self: Arc<Self>, mut rx: mpsc::Receiver<WebSocketConnection>) {
        while let Some(conn) = rx.recv().await {
            let srv = self.clone();
            tokio::spawn(async move {
                let remote = conn.remote_addr;
                if let Err(e) = srv.handle_viewer(conn).await {
                    warn!(remote = %remote, error = %e, "viewer connection error");
                }
            });
        }
        info!("listener closed");
    }

    async fn handle_viewer(&self, conn: WebSocketConnection) -> TermResult<()> {
        let viewer = self.next_viewer.fetch_add(1, Ordering::Relaxed);
        let remote = conn.remote_addr;
        info!(viewer, remote = %remote, "viewer connected");

        let attachment = self.blocking(|m| m.connect()).await?;
        let (mut sink, mut source) = conn.ws_stream.split();

        if !attachment.snapshot.is_empty() {
            websocket::ws_send(&mut sink, &ServerMessage::output(attachment.snapshot)).await?;
        }
        websocket::ws_send(&mut sink, &ServerMessage::status(WELCOME_NOTICE)).await?;

        let (reply_tx, reply_rx) = mpsc::channel::<ServerMessage>(64);
        let mut writer = tokio::spawn(forward_outbound(sink, attachment.events, reply_rx, viewer));

        self.read_inbound(&mut source, &reply_tx, &mut writer, viewer).await;

        writer.abort();
        // The session outlives its viewers.
        info!(viewer, remote = %remote, "viewer disconnected");
        Ok(())
    }

    /// Handle viewer messages until the viewer goes away or its writer stops.
    async fn read_inbound(
        &self,
        source: &mut WsSource,
        reply_tx: &mpsc::Sender<ServerMessage>,
        writer: &mut JoinHandle<()>,
        viewer: u64,
    ) {
        loop {
            let inbound = tokio::select! {
                inbound = websocket::ws_recv(source) => inbound,
                _ = &mut *writer => {
                    debug!(viewer, "viewer writer finished");
                    return;
                }
            };
            match inbound {
                Ok(Some(Inbound::Message(message))) => {
                    if let Err(e) = self.dispatch(message, reply_tx).await {
                        warn!(viewer, error = %e, "failed to handle viewer message");
                    }
                }
                Ok(Some(Inbound::Malformed(e))) => {
                    debug!(viewer, error = %e, "malformed viewer message");
                    if reply_tx.send(ServerMessage::error(e.to_string())).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    debug!(viewer, error = %e, "viewer read failed");
                    return;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        message: ClientMessage,
        reply_tx: &mpsc::Sender<ServerMessage>,
    ) -> TermResult<()> {
        // Session faults are published to every viewer by the manager, so
        // only join errors surface from these calls.
        match message {
            ClientMessage::SendKey { key } => {
                if key.is_empty() {
                    return Ok(());
                }
                if let Err(e) = self.blocking(move |m| m.send_input(key.as_bytes())).await? {
                    debug!(error = %e, "send_key rejected");
                }
            }
            ClientMessage::ResizeTerminal { rows, cols } => {
                if let Err(e) = self.blocking(move |m| m.resize(rows, cols)).await? {
                    debug!(rows, cols, error = %e, "resize rejected");
                }
            }
            ClientMessage::ResetTerminal => {
                if let Err(e) = self.blocking(|m| m.reset()).await? {
                    debug!(error = %e, "reset failed");
                }
            }
            ClientMessage::GetBuffer => {
                let snapshot = self.blocking(|m| m.buffer_snapshot()).await?;
                if !snapshot.is_empty() {
                    reply_tx
                        .send(ServerMessage::output(snapshot))
                        .await
                        .map_err(|_| TermError::Transport("viewer writer closed".into()))?;
                }
            }
        }
        Ok(())
    }

    /// Run a manager call on the blocking pool.
    async fn blocking<F, R>(&self, f: F) -> TermResult<R>
    where
        F: FnOnce(&SessionManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        let manager = self.manager.clone();
        tokio::task::spawn_blocking(move || f(&manager))
            .await
            .map_err(|e| TermError::Other(format!("join error: {e}")))
    }
}

/// Write session events and direct replies to one viewer.
async fn forward_outbound(
    mut sink: WsSink,
    mut events: broadcast::Receiver<SessionEvent>,
    mut replies: mpsc::Receiver<ServerMessage>,
    viewer: u64,
) {
    loop {
        let message = tokio::select! {
            reply = replies.recv() => match reply {
                Some(message) => message,
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => ServerMessage::from(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(viewer, skipped, "viewer lagging behind session output");
                    ServerMessage::error(format!(
                        "Viewer fell behind; {skipped} updates dropped. Request get_buffer to resync."
                    ))
                }
                Err(RecvError::Closed) => break,
            },
        };
        if let Err(e) = websocket::ws_send(&mut sink, &message).await {
            debug!(viewer, error = %e, "viewer write failed");
            break;
        }
    }
    let _ = sink.close().await;
}
