//! Conversion of stored events into the events projections consume.

use super::types::{EventEnvelope, RawEvent};
use crate::error::{EngineError, Result};
use crate::types::PayloadEncoding;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Converts a stored event into the projection-facing event type.
///
/// Implementations must be pure: the same envelope always yields the same
/// event.
pub trait EventNormalizer: Send + Sync {
    type Event;

    fn denormalize(&self, envelope: &EventEnvelope) -> Result<Self::Event>;
}

/// Untyped event: the type name plus the decoded JSON payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Normalizer producing [`DomainEvent`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEventNormalizer;

impl EventNormalizer for JsonEventNormalizer {
    type Event = DomainEvent;

    fn denormalize(&self, envelope: &EventEnvelope) -> Result<DomainEvent> {
        Ok(DomainEvent {
            event_type: envelope.event.event_type.clone(),
            payload: decode_payload(envelope)?,
        })
    }
}

/// Normalizer producing a typed event.
///
/// The event type is deserialized from `{"type": <event_type>, "payload":
/// <payload>}`, so `E` is usually an enum annotated with
/// `#[serde(tag = "type", content = "payload")]`.
pub struct SerdeEventNormalizer<E> {
    _event: PhantomData<fn() -> E>,
}

impl<E> SerdeEventNormalizer<E> {
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E> Default for SerdeEventNormalizer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DeserializeOwned> EventNormalizer for SerdeEventNormalizer<E> {
    type Event = E;

    fn denormalize(&self, envelope: &EventEnvelope) -> Result<E> {
        let tagged = serde_json::json!({
            "type": envelope.event.event_type,
            "payload": decode_payload(envelope)?,
        });
        serde_json::from_value(tagged).map_err(|e| normalization_error(envelope, e))
    }
}

fn decode_payload(envelope: &EventEnvelope) -> Result<serde_json::Value> {
    let RawEvent { data, encoding, .. } = &envelope.event;
    match encoding {
        PayloadEncoding::Json => {
            serde_json::from_slice(data).map_err(|e| normalization_error(envelope, e))
        }
        PayloadEncoding::MessagePack => {
            rmp_serde::from_slice(data).map_err(|e| normalization_error(envelope, e))
        }
        PayloadEncoding::Raw => std::str::from_utf8(data)
            .map(|text| serde_json::Value::String(text.to_string()))
            .map_err(|e| normalization_error(envelope, e)),
    }
}

fn normalization_error(envelope: &EventEnvelope, error: impl std::fmt::Display) -> EngineError {
    EngineError::Normalization {
        sequence_number: envelope.sequence_number,
        event_type: envelope.event.event_type.clone(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceNumber, Timestamp};
    use serde_json::json;

    fn envelope(event: RawEvent) -> EventEnvelope {
        EventEnvelope {
            sequence_number: SequenceNumber(7),
            stream: "stream".to_string(),
            recorded_at: Timestamp::now(),
            event,
        }
    }

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(tag = "type", content = "payload")]
    enum WorkspaceEvent {
        WorkspaceWasCreated { name: String },
        WorkspaceWasRemoved { name: String },
    }

    #[test]
    fn test_json_normalizer() {
        let raw = RawEvent::json("NodeWasCreated", &json!({"node": "a"})).unwrap();
        let event = JsonEventNormalizer.denormalize(&envelope(raw)).unwrap();
        assert_eq!(event.event_type, "NodeWasCreated");
        assert_eq!(event.payload["node"], "a");
    }

    #[test]
    fn test_json_normalizer_messagepack_payload() {
        let raw = RawEvent::msgpack("NodeWasCreated", &json!({"node": "b"})).unwrap();
        let event = JsonEventNormalizer.denormalize(&envelope(raw)).unwrap();
        assert_eq!(event.payload["node"], "b");
    }

    #[test]
    fn test_serde_normalizer_typed_event() {
        let normalizer = SerdeEventNormalizer::<WorkspaceEvent>::new();
        let raw = RawEvent::json("WorkspaceWasRemoved", &json!({"name": "user-1"})).unwrap();
        let event = normalizer.denormalize(&envelope(raw)).unwrap();
        assert_eq!(
            event,
            WorkspaceEvent::WorkspaceWasRemoved {
                name: "user-1".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_event_type_is_normalization_error() {
        let normalizer = SerdeEventNormalizer::<WorkspaceEvent>::new();
        let raw = RawEvent::json("SomethingElse", &json!({})).unwrap();
        let result = normalizer.denormalize(&envelope(raw));
        match result {
            Err(EngineError::Normalization {
                sequence_number,
                event_type,
                ..
            }) => {
                assert_eq!(sequence_number, SequenceNumber(7));
                assert_eq!(event_type, "SomethingElse");
            }
            other => panic!("Expected normalization error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_payload() {
        let raw = RawEvent {
            encoding: PayloadEncoding::Json,
            ..RawEvent::raw("Broken", b"{not json".to_vec())
        };
        let result = JsonEventNormalizer.denormalize(&envelope(raw));
        assert!(matches!(result, Err(EngineError::Normalization { .. })));
    }
}
