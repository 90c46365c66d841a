//! Record encoding for queued events.
//!
//! A record is a compact JSON object:
//!
//! ```text
//! {"n":"<name>","d":"<payload>","NO_ACK":false,"WITH_ACK":true}
//! ```
//!
//! Unknown keys are ignored when decoding, a missing `d` decodes as an empty
//! payload and missing flag keys decode as `false`. A trailing NUL terminator
//! is accepted so records written by C firmware remain readable.

use crate::event::{PublishFlags, QueuedEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reasons a record cannot be turned back into an event.
///
/// Every variant is non-retryable: the controller discards such records.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Bytes are not valid JSON, or a field has the wrong type.
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// The event name is missing or empty.
    #[error("record has no event name")]
    EmptyName,
}

/// Result type alias using CodecError.
pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Serialize)]
struct RecordOut<'a> {
    #[serde(rename = "n")]
    name: &'a str,
    #[serde(rename = "d")]
    payload: &'a str,
    #[serde(rename = "NO_ACK")]
    no_ack: bool,
    #[serde(rename = "WITH_ACK")]
    with_ack: bool,
}

#[derive(Deserialize)]
struct RecordIn {
    #[serde(rename = "n", default)]
    name: String,
    #[serde(rename = "d", default)]
    payload: String,
    #[serde(rename = "NO_ACK", default)]
    no_ack: bool,
    #[serde(rename = "WITH_ACK", default)]
    with_ack: bool,
}

/// Encode an event into the bytes handed to the record store.
pub fn encode(event: &QueuedEvent) -> CodecResult<Vec<u8>> {
    let record = RecordOut {
        name: &event.name,
        payload: &event.payload,
        no_ack: event.flags.no_ack(),
        with_ack: event.flags.with_ack(),
    };
    Ok(serde_json::to_vec(&record)?)
}

/// Decode record bytes back into an event.
pub fn decode(bytes: &[u8]) -> CodecResult<QueuedEvent> {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);

    let value: Value = serde_json::from_slice(&bytes[..end])?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }

    let record: RecordIn = serde_json::from_value(value)?;
    if record.name.is_empty() {
        return Err(CodecError::EmptyName);
    }

    let mut flags = PublishFlags::NONE;
    if record.no_ack {
        flags |= PublishFlags::NO_ACK;
    }
    if record.with_ack {
        flags |= PublishFlags::WITH_ACK;
    }

    Ok(QueuedEvent {
        name: record.name,
        payload: record.payload,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_uses_compact_keys() {
        let event = QueuedEvent::new("testEvent", "1", PublishFlags::WITH_ACK);
        let bytes = encode(&event).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"n":"testEvent","d":"1","NO_ACK":false,"WITH_ACK":true}"#
        );
    }

    #[test]
    fn decode_reverses_encode() {
        let events = [
            QueuedEvent::new("testEvent", "1", PublishFlags::WITH_ACK),
            QueuedEvent::new("a", "", PublishFlags::NONE),
            QueuedEvent::new("both", "x", PublishFlags::NO_ACK | PublishFlags::WITH_ACK),
            QueuedEvent::new("quote\"d", "{\"nested\":[1,2]}\n", PublishFlags::NO_ACK),
            QueuedEvent::new("unicode", "température ✓", PublishFlags::NONE),
        ];
        for event in events {
            let bytes = encode(&event).unwrap();
            assert_eq!(decode(&bytes).unwrap(), event);
        }
    }

    #[test]
    fn decode_accepts_nul_terminated_record() {
        let bytes = b"{\"n\":\"evt\",\"d\":\"42\",\"NO_ACK\":true,\"WITH_ACK\":false}\0";
        let event = decode(bytes).unwrap();
        assert_eq!(event.name, "evt");
        assert_eq!(event.payload, "42");
        assert_eq!(event.flags, PublishFlags::NO_ACK);
    }

    #[test]
    fn decode_defaults_missing_fields() {
        let event = decode(br#"{"n":"only-name"}"#).unwrap();
        assert_eq!(event.payload, "");
        assert!(event.flags.is_empty());
    }

    #[test]
    fn decode_ignores_unknown_keys() {
        let event = decode(br#"{"n":"evt","d":"v","ttl":60,"extra":{"a":1}}"#).unwrap();
        assert_eq!(event.name, "evt");
        assert_eq!(event.payload, "v");
    }

    #[test]
    fn decode_rejects_empty_name() {
        assert!(matches!(
            decode(br#"{"n":"","d":"x"}"#),
            Err(CodecError::EmptyName)
        ));
        assert!(matches!(decode(br#"{"d":"x"}"#), Err(CodecError::EmptyName)));
    }

    #[test]
    fn decode_rejects_truncated_record() {
        let full = encode(&QueuedEvent::new("evt", "payload", PublishFlags::NONE)).unwrap();
        for cut in [1, full.len() / 2, full.len() - 1] {
            assert!(matches!(
                decode(&full[..cut]),
                Err(CodecError::Malformed(_))
            ));
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"").is_err());
        assert!(decode(b"\0\0\0").is_err());
        assert!(decode(&[0xff, 0xfe, 0x00, 0x41]).is_err());
        assert!(matches!(decode(b"[1,2,3]"), Err(CodecError::NotAnObject)));
        assert!(matches!(decode(b"\"n\""), Err(CodecError::NotAnObject)));
    }

    #[test]
    fn decode_rejects_wrong_field_types() {
        assert!(matches!(
            decode(br#"{"n":5,"d":"x"}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"n":"evt","WITH_ACK":"yes"}"#),
            Err(CodecError::Malformed(_))
        ));
    }
}
