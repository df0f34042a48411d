//! Durable tracking of subscription rows.
//!
//! The engine reads and writes subscription rows only through
//! [`SubscriptionStore`]. Besides plain reads and writes, a store must give
//! the engine one atomic unit per catch-up batch ([`SubscriptionStore::transactional`])
//! and nested savepoints inside it, so a single failed event application
//! can be undone without losing the rest of the batch.
//!
//! Implementations:
//! - [`MemorySubscriptionStore`]: in-memory, with [`DocumentTable`]s that
//!   share its transactions, for projections that want savepoint rollback
//! - [`FileSubscriptionStore`]: single table file guarded by a lock file

mod criteria;
mod file;
mod journal;
mod memory;
mod table;

pub use criteria::SubscriptionCriteria;
pub use file::{FileStoreConfig, FileSubscriptionStore};
pub use memory::{DocumentTable, MemorySubscriptionStore};

use crate::error::{EngineError, Result};
use crate::subscriptions::{Subscription, SubscriptionError, SubscriptionStatus, Subscriptions};
use crate::types::{SequenceNumber, SubscriptionId};
use std::sync::Arc;

/// Persistence of subscription rows.
pub trait SubscriptionStore: Send + Sync {
    /// Create the subscription table if it does not exist yet.
    fn setup(&self) -> Result<()>;

    /// Read the rows matching `criteria`, locking them for update.
    ///
    /// Fails with [`EngineError::SchemaNotFound`] if [`setup`](Self::setup)
    /// has never run.
    fn find_by_criteria_for_update(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions>;

    /// Insert a new row.
    fn add(&self, subscription: Subscription) -> Result<()>;

    /// Overwrite status, position and error of an existing row.
    fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()>;

    fn begin_transaction(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn create_savepoint(&self) -> Result<()>;

    fn rollback_savepoint(&self) -> Result<()>;

    fn release_savepoint(&self) -> Result<()>;

    /// Run `f` as one atomic unit: commit if it returns `Ok`, roll back if it
    /// returns `Err`.
    fn transactional<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        Self: Sized,
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<EngineError>,
    {
        self.begin_transaction()?;
        match f() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.rollback() {
                    tracing::warn!(error = %rollback_error, "Subscription store: rollback failed");
                }
                Err(error)
            }
        }
    }
}

impl<S: SubscriptionStore + ?Sized> SubscriptionStore for Arc<S> {
    fn setup(&self) -> Result<()> {
        (**self).setup()
    }

    fn find_by_criteria_for_update(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions> {
        (**self).find_by_criteria_for_update(criteria)
    }

    fn add(&self, subscription: Subscription) -> Result<()> {
        (**self).add(subscription)
    }

    fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()> {
        (**self).update(id, status, position, error)
    }

    fn begin_transaction(&self) -> Result<()> {
        (**self).begin_transaction()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }

    fn create_savepoint(&self) -> Result<()> {
        (**self).create_savepoint()
    }

    fn rollback_savepoint(&self) -> Result<()> {
        (**self).rollback_savepoint()
    }

    fn release_savepoint(&self) -> Result<()> {
        (**self).release_savepoint()
    }
}
