#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use subscription_engine::{
    CatchUpHook, DocumentTable, DomainEvent, EventEnvelope, InMemoryEventLog, JsonEventNormalizer,
    MemorySubscriptionStore, NewEvent, Projection, ProjectionError, ProjectionStatus, RawEvent,
    SequenceNumber, Subscriber, Subscribers, Subscription, SubscriptionCriteria,
    SubscriptionEngine, SubscriptionId, SubscriptionStatus, SubscriptionStore,
};

pub type TestEngine = SubscriptionEngine<InMemoryEventLog, MemorySubscriptionStore, JsonEventNormalizer>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn append(log: &InMemoryEventLog, event_type: &str) -> EventEnvelope {
    let event = RawEvent::json(event_type, &json!({ "type": event_type })).unwrap();
    log.append(NewEvent::new("test", event)).unwrap()
}

pub fn append_many(log: &InMemoryEventLog, count: usize) {
    for i in 0..count {
        append(log, &format!("Event{}", i + 1));
    }
}

pub fn engine(
    log: &InMemoryEventLog,
    store: &MemorySubscriptionStore,
    subscribers: Vec<Subscriber<DomainEvent>>,
) -> TestEngine {
    SubscriptionEngine::new(
        log.clone(),
        store.clone(),
        Subscribers::new(subscribers).unwrap(),
        JsonEventNormalizer,
    )
}

pub fn subscriber(id: &str, projection: &Arc<RecordingProjection>) -> Subscriber<DomainEvent> {
    Subscriber::new(id, Arc::clone(projection) as Arc<dyn Projection<DomainEvent>>)
}

/// The stored row of `id`.
pub fn row(store: &MemorySubscriptionStore, id: &str) -> Subscription {
    store
        .find_by_criteria_for_update(&SubscriptionCriteria::no_constraints())
        .unwrap()
        .get(&SubscriptionId::new(id))
        .cloned()
        .unwrap_or_else(|| panic!("no subscription row for {}", id))
}

pub fn assert_row(
    store: &MemorySubscriptionStore,
    id: &str,
    status: SubscriptionStatus,
    position: u64,
) {
    let row = row(store, id);
    assert_eq!(row.status, status, "status of {}", id);
    assert_eq!(row.position, SequenceNumber(position), "position of {}", id);
}

// --- Projections ---

/// Projection that records what it applied and fails on demand.
#[derive(Default)]
pub struct RecordingProjection {
    applied: Mutex<Vec<(SequenceNumber, String)>>,
    fail_on: Mutex<Option<SequenceNumber>>,
    fail_setup: AtomicBool,
    fail_reset: AtomicBool,
    fail_status: AtomicBool,
    set_up_calls: AtomicUsize,
    reset_calls: AtomicUsize,
}

impl RecordingProjection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(sequence_number: u64) -> Arc<Self> {
        let projection = Self::default();
        *projection.fail_on.lock() = Some(SequenceNumber(sequence_number));
        Arc::new(projection)
    }

    pub fn fail_on(&self, sequence_number: Option<u64>) {
        *self.fail_on.lock() = sequence_number.map(SequenceNumber);
    }

    pub fn fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reset(&self, fail: bool) {
        self.fail_reset.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<u64> {
        self.applied.lock().iter().map(|(seq, _)| seq.0).collect()
    }

    pub fn applied_types(&self) -> Vec<String> {
        self.applied.lock().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn set_up_calls(&self) -> usize {
        self.set_up_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }
}

impl Projection<DomainEvent> for RecordingProjection {
    fn set_up(&self) -> Result<(), ProjectionError> {
        self.set_up_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err("setup failed".into());
        }
        Ok(())
    }

    fn status(&self) -> Result<ProjectionStatus, ProjectionError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err("status unavailable".into());
        }
        Ok(ProjectionStatus::Ok)
    }

    fn reset_state(&self) -> Result<(), ProjectionError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err("reset failed".into());
        }
        self.applied.lock().clear();
        Ok(())
    }

    fn apply(&self, event: &DomainEvent, envelope: &EventEnvelope) -> Result<(), ProjectionError> {
        if *self.fail_on.lock() == Some(envelope.sequence_number) {
            return Err(format!("cannot apply {}", event.event_type).into());
        }
        self.applied
            .lock()
            .push((envelope.sequence_number, event.event_type.clone()));
        Ok(())
    }
}

/// Projection writing one document per event into a [`DocumentTable`].
///
/// Events of type `Poison` write a document and then fail.
pub struct TableProjection {
    table: DocumentTable,
}

impl TableProjection {
    pub fn new(store: &MemorySubscriptionStore, name: &str) -> Arc<Self> {
        Arc::new(Self {
            table: store.table(name),
        })
    }

    pub fn table(&self) -> &DocumentTable {
        &self.table
    }
}

impl Projection<DomainEvent> for TableProjection {
    fn set_up(&self) -> Result<(), ProjectionError> {
        self.table.create()?;
        Ok(())
    }

    fn status(&self) -> Result<ProjectionStatus, ProjectionError> {
        if self.table.exists() {
            Ok(ProjectionStatus::Ok)
        } else {
            Ok(ProjectionStatus::setup_required("document table missing"))
        }
    }

    fn reset_state(&self) -> Result<(), ProjectionError> {
        self.table.truncate()?;
        Ok(())
    }

    fn apply(&self, event: &DomainEvent, envelope: &EventEnvelope) -> Result<(), ProjectionError> {
        self.table.put(
            format!("event-{}", envelope.sequence_number.0),
            &event.event_type,
        )?;
        if event.event_type == "Poison" {
            return Err("poisoned event".into());
        }
        Ok(())
    }
}

// --- Hooks ---

/// Hook recording its calls; fails the named callback if configured.
#[derive(Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<String>>,
    failing: Mutex<Option<&'static str>>,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(callback: &'static str) -> Arc<Self> {
        let hook = Self::default();
        *hook.failing.lock() = Some(callback);
        Arc::new(hook)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String, callback: &'static str) -> Result<(), ProjectionError> {
        self.calls.lock().push(call);
        if *self.failing.lock() == Some(callback) {
            return Err(format!("{} failed", callback).into());
        }
        Ok(())
    }
}

impl CatchUpHook<DomainEvent> for RecordingHook {
    fn on_before_catch_up(&self, status: SubscriptionStatus) -> Result<(), ProjectionError> {
        self.record(format!("before_catch_up:{}", status), "on_before_catch_up")
    }

    fn on_before_event(
        &self,
        _event: &DomainEvent,
        envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError> {
        self.record(
            format!("before_event:{}", envelope.sequence_number.0),
            "on_before_event",
        )
    }

    fn on_after_event(
        &self,
        _event: &DomainEvent,
        envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError> {
        self.record(
            format!("after_event:{}", envelope.sequence_number.0),
            "on_after_event",
        )
    }

    fn on_after_catch_up(&self) -> Result<(), ProjectionError> {
        self.record("after_catch_up".to_string(), "on_after_catch_up")
    }
}
