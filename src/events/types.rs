//! Event log data types.

use crate::error::Result;
use crate::types::{PayloadEncoding, SequenceNumber, Timestamp};
use serde::{Deserialize, Serialize};

/// An event as stored in the log, before normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Application-assigned event id.
    pub id: Option<String>,

    /// Event type name (e.g. "ContentStreamWasCreated").
    pub event_type: String,

    /// Encoded payload.
    pub data: Vec<u8>,

    /// Payload encoding.
    pub encoding: PayloadEncoding,

    /// Optional free-form metadata.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl RawEvent {
    /// Create an event with a JSON payload.
    pub fn json(event_type: impl Into<String>, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            id: None,
            event_type: event_type.into(),
            data: serde_json::to_vec(payload)?,
            encoding: PayloadEncoding::Json,
            metadata: None,
        })
    }

    /// Create an event with a MessagePack payload.
    pub fn msgpack(event_type: impl Into<String>, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            id: None,
            event_type: event_type.into(),
            data: rmp_serde::to_vec_named(payload)?,
            encoding: PayloadEncoding::MessagePack,
            metadata: None,
        })
    }

    /// Create an event with raw bytes.
    pub fn raw(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            data,
            encoding: PayloadEncoding::Raw,
            metadata: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A stored event together with its position in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence_number: SequenceNumber,
    pub stream: String,
    pub recorded_at: Timestamp,
    pub event: RawEvent,
}

/// Input for appending an event (before a sequence number is assigned).
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub stream: String,
    pub event: RawEvent,
}

impl NewEvent {
    pub fn new(stream: impl Into<String>, event: RawEvent) -> Self {
        Self {
            stream: stream.into(),
            event,
        }
    }
}

/// Which part of the log to read.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum StreamSelector {
    /// Every stream, in global order.
    #[default]
    All,
    /// A single named stream.
    Stream(String),
}

impl StreamSelector {
    pub fn matches(&self, stream: &str) -> bool {
        match self {
            StreamSelector::All => true,
            StreamSelector::Stream(name) => name == stream,
        }
    }
}

/// A read request against an [`EventLog`](super::EventLog).
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub selector: StreamSelector,
    pub minimum_sequence_number: SequenceNumber,
}

impl EventQuery {
    /// Read the whole log.
    pub fn all() -> Self {
        Self::default()
    }

    /// Read a single stream.
    pub fn stream(name: impl Into<String>) -> Self {
        Self {
            selector: StreamSelector::Stream(name.into()),
            minimum_sequence_number: SequenceNumber::NONE,
        }
    }

    /// Skip events below `sequence_number`.
    pub fn with_minimum_sequence_number(mut self, sequence_number: SequenceNumber) -> Self {
        self.minimum_sequence_number = sequence_number;
        self
    }

    pub(crate) fn matches(&self, envelope: &EventEnvelope) -> bool {
        envelope.sequence_number >= self.minimum_sequence_number
            && self.selector.matches(&envelope.stream)
    }
}
