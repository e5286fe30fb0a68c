//! Codec for encoding and decoding Beacon envelopes.
//!
//! One WebSocket text frame holds exactly one JSON object. There is no length
//! prefix; the WebSocket layer already delimits frames.

use bytes::Bytes;
use thiserror::Error;

use crate::frames::Envelope;

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not a well-formed envelope.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame bytes are not UTF-8.
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
}

/// Encode an envelope to UTF-8 JSON bytes.
///
/// # Errors
///
/// Returns an error if the encoded frame is too large.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an envelope from a raw frame.
///
/// Trailing content after the JSON object is rejected.
///
/// # Errors
///
/// Returns an error if the frame is too large, not UTF-8, or not an envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NotUtf8)?;
    let envelope = serde_json::from_str(text)?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameType;
    use serde_json::json;

    #[test]
    fn test_encode_is_exact_json() {
        let envelope = Envelope::hello(json!({"status": "tmp inserted", "id": "42"}));
        let encoded = encode(&envelope).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            parsed,
            json!({"type": "hello", "data": {"status": "tmp inserted", "id": "42"}})
        );
        assert_eq!(decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_decode_malformed() {
        match decode(b"{not json") {
            Err(ProtocolError::Malformed(_)) => {}
            other => panic!("Expected Malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_trailing_content() {
        assert!(decode(br#"{"type":"ping"} extra"#).is_err());
        assert!(decode(br#"{"type":"ping"}{"type":"ping"}"#).is_err());
    }

    #[test]
    fn test_decode_requires_type() {
        assert!(decode(br#"{"data":{}}"#).is_err());
        assert!(decode(b"[1,2,3]").is_err());
    }

    #[test]
    fn test_decode_unknown_type_is_not_an_error() {
        let envelope = decode(br#"{"type":"subscribe","data":1}"#).unwrap();
        assert_eq!(
            envelope.frame_type(),
            FrameType::Unknown("subscribe".to_string())
        );
    }

    #[test]
    fn test_decode_not_utf8() {
        assert!(matches!(
            decode(&[0x7b, 0xff, 0xfe, 0x7d]),
            Err(ProtocolError::NotUtf8)
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let big = "a".repeat(MAX_FRAME_SIZE);
        let envelope = Envelope::hello(json!({ "blob": big }));

        match encode(&envelope) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
