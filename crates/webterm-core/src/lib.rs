//! webterm-core: shared protocol library for the web terminal.
//!
//! Provides the viewer message types, the JSON frame codec, and the error
//! type used across the session manager and transport.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode_binary_frame, decode_frame, encode_frame, MAX_FRAME_SIZE};
pub use error::{TermError, TermResult};
pub use messages::{ClientMessage, ServerMessage, DEFAULT_COLS, DEFAULT_ROWS};
