//! Wire contract with the classification service.
//!
//! | Direction | Frame  | Payload                                              |
//! |-----------|--------|------------------------------------------------------|
//! | out       | binary | one window of little-endian i16 PCM, mono, 16 kHz     |
//! | out       | text   | [`END_SENTINEL`], once per stop                      |
//! | in        | text   | JSON [`InboundMessage`]                              |
//!
//! Inbound decoding keeps unknown fields in [`InboundMessage::extra`] so a
//! handler receives exactly what the service sent.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Text frame that asks the service to flush and end the stream.
pub const END_SENTINEL: &str = "__END__";

/// `status` value the service sends to acknowledge [`END_SENTINEL`].
pub const STATUS_ENDED: &str = "ended";

// ---------------------------------------------------------------------------
// Classification / InboundMessage
// ---------------------------------------------------------------------------

/// Verdict attached to a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_scam: bool,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    /// Coarse label, e.g. `"low"`, `"medium"`, `"high"`.
    #[serde(default)]
    pub confidence_level: Option<String>,
}

/// One decoded message from the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,

    /// Only meaningful during the shutdown handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Backend failure for this message only; the stream stays up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Human-readable note that accompanies `status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Set by the service on the result for audio flushed by
    /// [`END_SENTINEL`].  That result arrives during the shutdown handshake,
    /// when only the `ended` acknowledgement is acted on, so message
    /// handlers never see `final: true`.
    #[serde(default, rename = "final", skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,

    /// Fields this client does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `true` for the acknowledgement of [`END_SENTINEL`].
    pub fn is_ended(&self) -> bool {
        self.status.as_deref() == Some(STATUS_ENDED)
    }
}

// ---------------------------------------------------------------------------
// PCM framing
// ---------------------------------------------------------------------------

/// Serialize a window as little-endian 16-bit PCM.
///
/// ```rust
/// use scamwatch::stream::encode_pcm16le;
///
/// assert_eq!(encode_pcm16le(&[1, -2, i16::MIN]), vec![0x01, 0x00, 0xFE, 0xFF, 0x00, 0x80]);
/// ```
pub fn encode_pcm16le(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0_u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_message_decodes() {
        let msg = InboundMessage::decode(
            r#"{"classification":{"is_scam":true,"confidence":0.8,"confidence_level":"high"},"transcript":"your account is locked"}"#,
        )
        .expect("decode");

        assert_eq!(msg.transcript.as_deref(), Some("your account is locked"));
        assert!(!msg.is_ended() && msg.error.is_none());
        let c = msg.classification.expect("classification");
        assert!(c.is_scam);
        assert_eq!(c.confidence, 0.8);
        assert_eq!(c.confidence_level.as_deref(), Some("high"));
    }

    #[test]
    fn ended_status_is_recognised() {
        let msg = InboundMessage::decode(r#"{"status":"ended","message":"Recording stopped successfully"}"#)
            .expect("decode");
        assert!(msg.is_ended());
        assert_eq!(msg.message.as_deref(), Some("Recording stopped successfully"));

        let other = InboundMessage::decode(r#"{"status":"processing"}"#).expect("decode");
        assert!(!other.is_ended());
    }

    #[test]
    fn backend_error_fields_decode() {
        let msg = InboundMessage::decode(
            r#"{"error":"decoder failed","errorType":"RuntimeError","path":"/tmp/a.wav"}"#,
        )
        .expect("decode");
        assert_eq!(msg.error.as_deref(), Some("decoder failed"));
        assert_eq!(msg.error_type.as_deref(), Some("RuntimeError"));
        assert_eq!(msg.extra.get("path").and_then(|v| v.as_str()), Some("/tmp/a.wav"));
    }

    #[test]
    fn final_flag_and_missing_level() {
        let msg = InboundMessage::decode(
            r#"{"transcript":"ok","classification":{"is_scam":false,"confidence":0.1},"final":true}"#,
        )
        .expect("decode");
        assert_eq!(msg.is_final, Some(true));
        assert!(msg.classification.unwrap().confidence_level.is_none());
    }

    #[test]
    fn unknown_fields_survive_a_reencode() {
        let raw = r#"{"transcript":"hi","text":"hi","score":3}"#;
        let msg = InboundMessage::decode(raw).expect("decode");
        let back: serde_json::Value = serde_json::to_value(&msg).expect("encode");
        let orig: serde_json::Value = serde_json::from_str(raw).expect("parse");
        assert_eq!(back, orig);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(InboundMessage::decode("{not json").is_err());
        assert!(InboundMessage::decode(r#"{"classification":{"is_scam":"yes"}}"#).is_err());
    }

    #[test]
    fn full_window_is_160000_bytes() {
        let bytes = encode_pcm16le(&vec![0x1234_i16; 80_000]);
        assert_eq!(bytes.len(), 160_000);
        assert_eq!(&bytes[..2], &[0x34, 0x12]);
    }
}
