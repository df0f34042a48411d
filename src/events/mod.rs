//! The event log consumed by the subscription engine.
//!
//! The engine only needs a forward-only, restartable view of the log: load
//! everything from a minimum sequence number, stop whenever it likes, and
//! load again from a later position after a batch boundary.
//!
//! Two implementations are provided:
//! - [`InMemoryEventLog`] for tests and embedding
//! - [`FileEventLog`], an append-only file with CRC-checked frames
//!
//! # Example
//!
//! ```ignore
//! let log = InMemoryEventLog::new();
//! log.append(NewEvent::new("workspace", RawEvent::json("WorkspaceWasCreated", &json!({"name": "live"}))?))?;
//!
//! for envelope in log.load(&EventQuery::all().with_minimum_sequence_number(SequenceNumber(1)))? {
//!     println!("{:?}", envelope?.sequence_number);
//! }
//! ```

mod log;
mod memory;
mod normalizer;
mod types;

use crate::error::Result;
use crate::types::SequenceNumber;
use std::sync::Arc;

pub use log::{FileEventLog, FileEventLogConfig};
pub use memory::InMemoryEventLog;
pub use normalizer::{DomainEvent, EventNormalizer, JsonEventNormalizer, SerdeEventNormalizer};
pub use types::{EventEnvelope, EventQuery, NewEvent, RawEvent, StreamSelector};

/// Lazy, forward-only sequence of events.
pub type EventIter<'a> = Box<dyn Iterator<Item = Result<EventEnvelope>> + 'a>;

/// Read access to an ordered event log.
pub trait EventLog: Send + Sync {
    /// Load the events matching `query` in ascending sequence order.
    ///
    /// The returned iterator observes events appended while it is being
    /// consumed; it ends when it reaches the current tail.
    fn load(&self, query: &EventQuery) -> Result<EventIter<'_>>;

    /// Sequence number of the last event in the log.
    fn head(&self) -> SequenceNumber;
}

impl<T: EventLog + ?Sized> EventLog for Arc<T> {
    fn load(&self, query: &EventQuery) -> Result<EventIter<'_>> {
        (**self).load(query)
    }

    fn head(&self) -> SequenceNumber {
        (**self).head()
    }
}
