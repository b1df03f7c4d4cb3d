//! Viewer-facing message types.
//!
//! Every frame is a JSON object of the form `{"event": <name>, "data": {...}}`.
//! Event names are snake_case and mirror the operations a viewer can request
//! (`send_key`, `resize_terminal`, ...) and the notifications it receives
//! (`terminal_output`, `terminal_message`, `terminal_error`).

use serde::{Deserialize, Deserializer, Serialize};

/// Default rows when a resize request omits them.
pub const DEFAULT_ROWS: u16 = 24;
/// Default columns when a resize request omits them.
pub const DEFAULT_COLS: u16 = 80;

/// Messages sent from a viewer to the server.
///
/// Decoding is lenient about the payload: `data` may be absent, `null` or an
/// object with missing fields, and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Raw keystrokes or text to write to the shell.
    SendKey { key: String },
    /// Change the terminal geometry.
    ResizeTerminal { rows: u16, cols: u16 },
    /// Kill the shell and start a fresh one.
    ResetTerminal,
    /// Ask for the full replay buffer.
    GetBuffer,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ClientEvent {
    SendKey,
    ResizeTerminal,
    ResetTerminal,
    GetBuffer,
}

#[derive(Default, Deserialize)]
struct ClientPayload {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    rows: Option<u16>,
    #[serde(default)]
    cols: Option<u16>,
}

#[derive(Deserialize)]
struct ClientEnvelope {
    event: ClientEvent,
    #[serde(default)]
    data: Option<ClientPayload>,
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let envelope = ClientEnvelope::deserialize(deserializer)?;
        let data = envelope.data.unwrap_or_default();
        Ok(match envelope.event {
            ClientEvent::SendKey => ClientMessage::SendKey {
                key: data.key.unwrap_or_default(),
            },
            ClientEvent::ResizeTerminal => ClientMessage::ResizeTerminal {
                rows: data.rows.unwrap_or(DEFAULT_ROWS),
                cols: data.cols.unwrap_or(DEFAULT_COLS),
            },
            ClientEvent::ResetTerminal => ClientMessage::ResetTerminal,
            ClientEvent::GetBuffer => ClientMessage::GetBuffer,
        })
    }
}

/// Messages sent from the server to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Terminal output (or a replayed buffer snapshot).
    TerminalOutput { data: String },
    /// Human-readable status notice.
    TerminalMessage { data: String },
    /// Human-readable error description.
    TerminalError { error: String },
}

impl ServerMessage {
    pub fn output(data: impl Into<String>) -> Self {
        ServerMessage::TerminalOutput { data: data.into() }
    }

    pub fn status(data: impl Into<String>) -> Self {
        ServerMessage::TerminalMessage { data: data.into() }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ServerMessage::TerminalError {
            error: error.into(),
        }
    }

    /// The wire name of this message.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::TerminalOutput { .. } => "terminal_output",
            ServerMessage::TerminalMessage { .. } => "terminal_message",
            ServerMessage::TerminalError { .. } => "terminal_error",
        }
    }
}
