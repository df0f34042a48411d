//! # Subscription Engine
//!
//! Keeps event-sourced projections in step with an append-only event log.
//!
//! ## Core Concepts
//!
//! - **Event Log**: ordered events with strictly increasing sequence numbers
//! - **Subscribers**: projections (plus optional catch-up hooks) registered by id
//! - **Subscriptions**: one persisted tracking row per subscriber holding its
//!   lifecycle status and the last sequence number it applied
//! - **Catch-up**: replaying the log into subscribers in transactional
//!   batches, isolating each projection's failures with savepoints
//!
//! ## Example
//!
//! ```ignore
//! use subscription_engine::{
//!     CatchUpOptions, InMemoryEventLog, JsonEventNormalizer, MemorySubscriptionStore,
//!     Subscriber, Subscribers, SubscriptionEngine, SubscriptionEngineCriteria,
//! };
//!
//! let engine = SubscriptionEngine::new(
//!     log.clone(),
//!     MemorySubscriptionStore::new(),
//!     Subscribers::new(vec![Subscriber::new("contentGraph", projection)])?,
//!     JsonEventNormalizer,
//! );
//!
//! engine.setup(&SubscriptionEngineCriteria::no_constraints())?;
//! let result = engine.boot(CatchUpOptions::new().with_batch_size(500))?;
//! println!("{} events processed", result.processed_events);
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod maintainer;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use engine::{
    CatchUpOptions, Errors, OperationResult, ProcessedResult, ProgressCallback, SubscriberError,
    SubscriptionEngine, SubscriptionEngineCriteria,
};
pub use error::{EngineError, Result};
pub use events::{
    DomainEvent, EventEnvelope, EventIter, EventLog, EventNormalizer, EventQuery, FileEventLog,
    FileEventLogConfig, InMemoryEventLog, JsonEventNormalizer, NewEvent, RawEvent,
    SerdeEventNormalizer, StreamSelector,
};
pub use maintainer::{Maintainer, MaintainerConfig};
pub use store::{
    DocumentTable, FileStoreConfig, FileSubscriptionStore, MemorySubscriptionStore,
    SubscriptionCriteria, SubscriptionStore,
};
pub use subscriptions::{
    CatchUpHook, DetachedSubscriptionStatus, Projection, ProjectionError, ProjectionStatus,
    ProjectionSubscriptionStatus, Subscriber, Subscribers, Subscription, SubscriptionError,
    SubscriptionStatus, SubscriptionStatusCollection, SubscriptionStatusEntry,
    SubscriptionStatusFilter, Subscriptions,
};
pub use types::*;
