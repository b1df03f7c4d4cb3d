//! JSON text-frame codec for viewer messages.
//!
//! WebSocket frames already delimit messages, so each frame carries exactly
//! one JSON document with no additional length prefix.

use crate::error::{TermError, TermResult};

/// Maximum accepted frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Encode a serializable message into a JSON text frame.
pub fn encode_frame<T: serde::Serialize>(value: &T) -> TermResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON text frame into a typed message.
pub fn decode_frame<T: serde::de::DeserializeOwned>(text: &str) -> TermResult<T> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(TermError::InvalidMessage(format!(
            "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
            text.len()
        )));
    }
    serde_json::from_str(text).map_err(|e| TermError::InvalidMessage(e.to_string()))
}

/// Decode a binary frame that carries UTF-8 JSON.
pub fn decode_binary_frame<T: serde::de::DeserializeOwned>(data: &[u8]) -> TermResult<T> {
    let text = std::str::from_utf8(data)
        .map_err(|e| TermError::InvalidMessage(format!("frame is not UTF-8: {e}")))?;
    decode_frame(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientMessage, ServerMessage};

    #[test]
    fn decode_send_key() {
        let msg: ClientMessage =
            decode_frame(r#"{"event":"send_key","data":{"key":"ls\r"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SendKey {
                key: "ls\r".into()
            }
        );
    }

    #[test]
    fn decode_resize_with_defaults() {
        let msg: ClientMessage =
            decode_frame(r#"{"event":"resize_terminal","data":{"cols":120}}"#).unwrap();
        assert_eq!(msg, ClientMessage::ResizeTerminal { rows: 24, cols: 120 });
    }

    #[test]
    fn decode_unit_events_without_data() {
        let reset: ClientMessage = decode_frame(r#"{"event":"reset_terminal"}"#).unwrap();
        assert_eq!(reset, ClientMessage::ResetTerminal);
        let get: ClientMessage = decode_frame(r#"{"event":"get_buffer"}"#).unwrap();
        assert_eq!(get, ClientMessage::GetBuffer);
    }

    #[test]
    fn decode_empty_payload_objects() {
        let reset: ClientMessage =
            decode_frame(r#"{"event":"reset_terminal","data":{}}"#).unwrap();
        assert_eq!(reset, ClientMessage::ResetTerminal);
        let get: ClientMessage = decode_frame(r#"{"event":"get_buffer","data":{}}"#).unwrap();
        assert_eq!(get, ClientMessage::GetBuffer);
        let resize: ClientMessage =
            decode_frame(r#"{"event":"resize_terminal","data":{}}"#).unwrap();
        assert_eq!(resize, ClientMessage::ResizeTerminal { rows: 24, cols: 80 });
    }

    #[test]
    fn decode_missing_or_null_payload() {
        let resize: ClientMessage = decode_frame(r#"{"event":"resize_terminal"}"#).unwrap();
        assert_eq!(resize, ClientMessage::ResizeTerminal { rows: 24, cols: 80 });
        let key: ClientMessage = decode_frame(r#"{"event":"send_key"}"#).unwrap();
        assert_eq!(key, ClientMessage::SendKey { key: String::new() });
        let get: ClientMessage = decode_frame(r#"{"event":"get_buffer","data":null}"#).unwrap();
        assert_eq!(get, ClientMessage::GetBuffer);
    }

    #[test]
    fn decode_ignores_unknown_payload_fields() {
        let msg: ClientMessage = decode_frame(
            r#"{"event":"resize_terminal","data":{"rows":40,"cols":120,"dpr":2}}"#,
        )
        .unwrap();
        assert_eq!(msg, ClientMessage::ResizeTerminal { rows: 40, cols: 120 });
    }

    #[test]
    fn decode_rejects_non_object_payload() {
        let err = decode_frame::<ClientMessage>(r#"{"event":"send_key","data":"ls"}"#)
            .unwrap_err();
        assert!(matches!(err, TermError::InvalidMessage(_)));
    }

    #[test]
    fn decode_send_key_without_key_is_empty() {
        let msg: ClientMessage = decode_frame(r#"{"event":"send_key","data":{}}"#).unwrap();
        assert_eq!(msg, ClientMessage::SendKey { key: String::new() });
    }

    #[test]
    fn unknown_event_is_rejected() {
        let err = decode_frame::<ClientMessage>(r#"{"event":"format_disk"}"#).unwrap_err();
        assert!(matches!(err, TermError::InvalidMessage(_)));
    }

    #[test]
    fn encode_server_messages() {
        let out = encode_frame(&ServerMessage::output("hi\r\n")).unwrap();
        assert_eq!(out, r#"{"event":"terminal_output","data":{"data":"hi\r\n"}}"#);

        let err = encode_frame(&ServerMessage::error("Terminal is not running")).unwrap();
        assert_eq!(
            err,
            r#"{"event":"terminal_error","data":{"error":"Terminal is not running"}}"#
        );
    }

    #[test]
    fn binary_frames_must_be_utf8() {
        let err = decode_binary_frame::<ClientMessage>(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, TermError::InvalidMessage(_)));

        let ok: ClientMessage = decode_binary_frame(br#"{"event":"get_buffer"}"#).unwrap();
        assert_eq!(ok, ClientMessage::GetBuffer);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let big = "x".repeat(MAX_FRAME_SIZE + 1);
        assert!(decode_frame::<ClientMessage>(&big).is_err());
    }
}
