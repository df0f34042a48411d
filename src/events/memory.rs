//! In-memory event log.

use super::types::{EventEnvelope, EventQuery, NewEvent};
use super::{EventIter, EventLog};
use crate::error::Result;
use crate::types::{SequenceNumber, Timestamp};
use parking_lot::RwLock;
use std::sync::Arc;

/// Event log held in memory. Cloning yields another handle to the same log.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, assigning the next sequence number.
    pub fn append(&self, event: NewEvent) -> Result<EventEnvelope> {
        let mut events = self.events.write();
        let envelope = EventEnvelope {
            sequence_number: SequenceNumber(events.len() as u64 + 1),
            stream: event.stream,
            recorded_at: Timestamp::now(),
            event: event.event,
        };
        events.push(envelope.clone());
        Ok(envelope)
    }

    /// Number of events in the log.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventLog for InMemoryEventLog {
    fn load(&self, query: &EventQuery) -> Result<EventIter<'_>> {
        // Sequence number n lives at index n - 1.
        let index = query.minimum_sequence_number.0.saturating_sub(1) as usize;
        Ok(Box::new(MemoryEventIterator {
            events: &self.events,
            query: query.clone(),
            index,
        }))
    }

    fn head(&self) -> SequenceNumber {
        SequenceNumber(self.events.read().len() as u64)
    }
}

/// Iterator that re-reads the shared vector on every step, so events
/// appended during iteration are still delivered.
struct MemoryEventIterator<'a> {
    events: &'a RwLock<Vec<EventEnvelope>>,
    query: EventQuery,
    index: usize,
}

impl<'a> Iterator for MemoryEventIterator<'a> {
    type Item = Result<EventEnvelope>;

    fn next(&mut self) -> Option<Self::Item> {
        let events = self.events.read();
        while let Some(envelope) = events.get(self.index) {
            self.index += 1;
            if self.query.matches(envelope) {
                return Some(Ok(envelope.clone()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RawEvent;

    fn append(log: &InMemoryEventLog, stream: &str, event_type: &str) -> EventEnvelope {
        log.append(NewEvent::new(stream, RawEvent::raw(event_type, vec![])))
            .unwrap()
    }

    #[test]
    fn test_sequence_numbers_start_at_one() {
        let log = InMemoryEventLog::new();
        assert_eq!(log.head(), SequenceNumber::NONE);

        let first = append(&log, "a", "First");
        let second = append(&log, "a", "Second");

        assert_eq!(first.sequence_number, SequenceNumber(1));
        assert_eq!(second.sequence_number, SequenceNumber(2));
        assert_eq!(log.head(), SequenceNumber(2));
    }

    #[test]
    fn test_load_from_minimum_sequence_number() {
        let log = InMemoryEventLog::new();
        for i in 0..5 {
            append(&log, "a", &format!("Event{}", i));
        }

        let loaded: Vec<_> = log
            .load(&EventQuery::all().with_minimum_sequence_number(SequenceNumber(3)))
            .unwrap()
            .map(|e| e.unwrap().sequence_number.0)
            .collect();
        assert_eq!(loaded, vec![3, 4, 5]);
    }

    #[test]
    fn test_load_single_stream() {
        let log = InMemoryEventLog::new();
        append(&log, "a", "A1");
        append(&log, "b", "B1");
        append(&log, "a", "A2");

        let types: Vec<_> = log
            .load(&EventQuery::stream("a"))
            .unwrap()
            .map(|e| e.unwrap().event.event_type)
            .collect();
        assert_eq!(types, vec!["A1", "A2"]);
    }

    #[test]
    fn test_iterator_sees_tail_appends() {
        let log = InMemoryEventLog::new();
        append(&log, "a", "First");

        let mut iter = log.load(&EventQuery::all()).unwrap();
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());

        append(&log, "a", "Second");
        let next = iter.next().unwrap().unwrap();
        assert_eq!(next.sequence_number, SequenceNumber(2));
    }
}
