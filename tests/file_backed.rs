//! Engine runs against the file-backed event log and subscription store.

mod common;

use std::sync::Arc;

use common::RecordingProjection;
use serde_json::json;
use subscription_engine::{
    CatchUpOptions, DomainEvent, EngineError, FileEventLog, FileStoreConfig, FileSubscriptionStore,
    JsonEventNormalizer, NewEvent, Projection, RawEvent, SequenceNumber, Subscriber, Subscribers,
    SubscriptionCriteria, SubscriptionEngine, SubscriptionEngineCriteria, SubscriptionStatus,
    SubscriptionStore,
};
use tempfile::TempDir;

type FileEngine =
    SubscriptionEngine<Arc<FileEventLog>, Arc<FileSubscriptionStore>, JsonEventNormalizer>;

fn open(dir: &TempDir, projection: &Arc<RecordingProjection>) -> FileEngine {
    let log = Arc::new(FileEventLog::open(dir.path().join("events.log")).unwrap());
    let store = Arc::new(FileSubscriptionStore::open(dir.path().join("subscriptions")).unwrap());
    SubscriptionEngine::new(
        log,
        store,
        Subscribers::new(vec![Subscriber::new(
            "p",
            Arc::clone(projection) as Arc<dyn Projection<DomainEvent>>,
        )])
        .unwrap(),
        JsonEventNormalizer,
    )
}

fn append(engine: &FileEngine, count: usize) {
    for _ in 0..count {
        let event = RawEvent::json("NodeWasCreated", &json!({ "node": "n" })).unwrap();
        engine
            .event_log()
            .append(NewEvent::new("content", event))
            .unwrap();
    }
}

fn position_and_status(engine: &FileEngine) -> (SubscriptionStatus, SequenceNumber) {
    let rows = engine
        .store()
        .find_by_criteria_for_update(&SubscriptionCriteria::no_constraints())
        .unwrap();
    let row = rows.get(&"p".into()).unwrap();
    (row.status, row.position)
}

#[test]
fn test_positions_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let projection = RecordingProjection::new();

    {
        let engine = open(&dir, &projection);
        append(&engine, 3);
        engine
            .setup(&SubscriptionEngineCriteria::no_constraints())
            .unwrap();
        let result = engine.boot(CatchUpOptions::new().with_batch_size(2)).unwrap();
        assert_eq!(result.processed_events, 3);
        assert_eq!(
            position_and_status(&engine),
            (SubscriptionStatus::Active, SequenceNumber(3))
        );
    }

    let engine = open(&dir, &projection);
    assert_eq!(
        position_and_status(&engine),
        (SubscriptionStatus::Active, SequenceNumber(3))
    );

    append(&engine, 2);
    let result = engine.catch_up_active(CatchUpOptions::new()).unwrap();

    assert_eq!(result.processed_events, 2);
    assert_eq!(projection.applied(), vec![1, 2, 3, 4, 5]);
    assert_eq!(
        position_and_status(&engine),
        (SubscriptionStatus::Active, SequenceNumber(5))
    );
}

#[test]
fn test_error_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let projection = RecordingProjection::failing_on(2);

    {
        let engine = open(&dir, &projection);
        append(&engine, 3);
        engine
            .setup(&SubscriptionEngineCriteria::no_constraints())
            .unwrap();
        engine.boot(CatchUpOptions::new()).unwrap();
    }

    let engine = open(&dir, &projection);
    let rows = engine
        .store()
        .find_by_criteria_for_update(&SubscriptionCriteria::no_constraints())
        .unwrap();
    let row = rows.get(&"p".into()).unwrap();
    assert_eq!(row.status, SubscriptionStatus::Error);
    assert_eq!(row.position, SequenceNumber(1));
    assert_eq!(row.error.as_ref().unwrap().message, "cannot apply NodeWasCreated");
}

#[test]
fn test_status_before_setup_is_empty() {
    let dir = TempDir::new().unwrap();
    let projection = RecordingProjection::new();
    let engine = open(&dir, &projection);

    let statuses = engine
        .subscription_status(&SubscriptionEngineCriteria::no_constraints())
        .unwrap();
    assert!(statuses.is_empty());
}

#[test]
fn test_store_directory_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let projection = RecordingProjection::new();
    let _engine = open(&dir, &projection);

    let second = FileSubscriptionStore::open_with_config(FileStoreConfig {
        path: dir.path().join("subscriptions"),
        create_if_missing: false,
    });
    assert!(matches!(second, Err(EngineError::Locked)));
}
