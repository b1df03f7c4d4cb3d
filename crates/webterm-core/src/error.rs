use thiserror::Error;

/// Errors produced by the webterm session and protocol layers.
#[derive(Debug, Error)]
pub enum TermError {
    #[error("failed to spawn terminal: {0}")]
    Spawn(String),

    #[error("no usable shell found (searched: {0})")]
    NoShell(String),

    #[error("Terminal is not running")]
    NotRunning,

    #[error("invalid terminal size: {rows}x{cols}")]
    InvalidSize { rows: u16, cols: u16 },

    /// A read or write on the PTY failed in a way that may succeed on retry.
    #[error("terminal I/O error: {0}")]
    TransientIo(String),

    /// The PTY is in a state that retrying cannot fix.
    #[error("terminal failure: {0}")]
    Fatal(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl TermError {
    /// Whether a reader hitting this error should back off and retry
    /// rather than give up on the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TermError::TransientIo(_) | TermError::Io(_))
    }
}

impl From<serde_json::Error> for TermError {
    fn from(e: serde_json::Error) -> Self {
        TermError::Codec(e.to_string())
    }
}

pub type TermResult<T> = Result<T, TermError>;
