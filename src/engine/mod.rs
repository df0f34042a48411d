//! The subscription engine.
//!
//! The engine keeps every registered subscriber's projection in step with
//! the event log. Each subscriber has one tracking row in the
//! [`SubscriptionStore`]; the engine moves that row through its lifecycle:
//!
//! ```text
//!  discovery     setup          catch-up reaches the tail
//! ─────────► NEW ─────► BOOTING ───────────────────────► ACTIVE
//!                          ▲  │ apply/setUp fails           │
//!                    reset │  ▼                             │ subscriber
//!                         ERROR ◄───────────────────────────┤ unregistered
//!                                                           ▼
//!                                                       DETACHED
//! ```
//!
//! Catch-up (`boot`, `catch_up_active`, `reactivate`) is single-flight per
//! engine instance; `setup` and `reset` are not guarded.

mod catch_up;
mod criteria;
mod result;

pub use criteria::{CatchUpOptions, ProgressCallback, SubscriptionEngineCriteria};
pub use result::{Errors, OperationResult, ProcessedResult, SubscriberError};

use crate::error::{EngineError, Result};
use crate::events::{EventLog, EventNormalizer};
use crate::store::{SubscriptionCriteria, SubscriptionStore};
use crate::subscriptions::{
    DetachedSubscriptionStatus, ProjectionStatus, ProjectionSubscriptionStatus, Subscriber,
    Subscribers, Subscription, SubscriptionError, SubscriptionStatus,
    SubscriptionStatusCollection, SubscriptionStatusEntry, SubscriptionStatusFilter,
};
use crate::types::SequenceNumber;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

/// Drives subscribers from an event log into their projections.
pub struct SubscriptionEngine<L, S, N: EventNormalizer> {
    event_log: L,
    store: S,
    subscribers: Subscribers<N::Event>,
    normalizer: N,
    /// Set while a catch-up runs.
    processing: AtomicBool,
}

/// Clears the processing flag on every exit path.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<L, S, N> SubscriptionEngine<L, S, N>
where
    L: EventLog,
    S: SubscriptionStore,
    N: EventNormalizer,
{
    pub fn new(event_log: L, store: S, subscribers: Subscribers<N::Event>, normalizer: N) -> Self {
        Self {
            event_log,
            store,
            subscribers,
            normalizer,
            processing: AtomicBool::new(false),
        }
    }

    pub fn event_log(&self) -> &L {
        &self.event_log
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn subscribers(&self) -> &Subscribers<N::Event> {
        &self.subscribers
    }

    /// Create the store schema, register new subscribers and set up every
    /// matching subscription in `NEW`, `BOOTING` or `ACTIVE`.
    pub fn setup(&self, criteria: &SubscriptionEngineCriteria) -> Result<OperationResult> {
        info!("Subscription Engine: Start to setup");

        self.store.setup()?;
        self.discover_new_subscriptions()?;

        let subscriptions =
            self.store
                .find_by_criteria_for_update(&SubscriptionCriteria::for_engine_criteria_and_status(
                    criteria,
                    SubscriptionStatusFilter::from_statuses([
                        SubscriptionStatus::New,
                        SubscriptionStatus::Booting,
                        SubscriptionStatus::Active,
                    ]),
                ))?;
        if subscriptions.is_empty() {
            info!("Subscription Engine: No subscriptions found");
            return Ok(OperationResult::success());
        }

        let mut errors = Vec::new();
        for subscription in &subscriptions {
            if let Some(error) = self.setup_subscription(subscription)? {
                errors.push(error);
            }
        }
        Ok(OperationResult::from_errors(errors))
    }

    /// Catch up subscriptions in `BOOTING`.
    pub fn boot(&self, options: CatchUpOptions<'_>) -> Result<ProcessedResult> {
        self.process_exclusively(|| {
            self.catch_up_subscriptions(
                SubscriptionStatusFilter::from_statuses([SubscriptionStatus::Booting]),
                options,
            )
        })
    }

    /// Catch up subscriptions in `ACTIVE`.
    pub fn catch_up_active(&self, options: CatchUpOptions<'_>) -> Result<ProcessedResult> {
        self.process_exclusively(|| {
            self.catch_up_subscriptions(
                SubscriptionStatusFilter::from_statuses([SubscriptionStatus::Active]),
                options,
            )
        })
    }

    /// Catch up subscriptions in `ERROR` or `DETACHED`.
    ///
    /// A detached subscription only takes part if its subscriber is
    /// registered again; otherwise it stays detached.
    pub fn reactivate(&self, options: CatchUpOptions<'_>) -> Result<ProcessedResult> {
        self.process_exclusively(|| {
            self.catch_up_subscriptions(
                SubscriptionStatusFilter::from_statuses([
                    SubscriptionStatus::Error,
                    SubscriptionStatus::Detached,
                ]),
                options,
            )
        })
    }

    /// Reset the projections of matching subscriptions and rewind them to
    /// `BOOTING` at [`SequenceNumber::NONE`].
    pub fn reset(&self, criteria: &SubscriptionEngineCriteria) -> Result<OperationResult> {
        info!("Subscription Engine: Start to reset");

        let subscriptions =
            self.store
                .find_by_criteria_for_update(&SubscriptionCriteria::for_engine_criteria_and_status(
                    criteria,
                    SubscriptionStatusFilter::any(),
                ))?;
        if subscriptions.is_empty() {
            info!("Subscription Engine: No subscriptions to reset");
            return Ok(OperationResult::success());
        }

        let mut errors = Vec::new();
        for subscription in &subscriptions {
            if let Some(error) = self.reset_subscription(subscription)? {
                errors.push(error);
            }
        }
        Ok(OperationResult::from_errors(errors))
    }

    /// Status of every stored subscription plus every registered subscriber
    /// that has not been discovered yet.
    ///
    /// Returns an empty collection if the store schema does not exist.
    pub fn subscription_status(
        &self,
        criteria: &SubscriptionEngineCriteria,
    ) -> Result<SubscriptionStatusCollection> {
        let subscriptions = match self.store.find_by_criteria_for_update(
            &SubscriptionCriteria::create(criteria.ids.clone(), SubscriptionStatusFilter::any()),
        ) {
            Ok(subscriptions) => subscriptions,
            Err(EngineError::SchemaNotFound) => return Ok(SubscriptionStatusCollection::empty()),
            Err(e) => return Err(e),
        };

        let mut statuses = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            let Ok(subscriber) = self.subscribers.get(&subscription.id) else {
                statuses.push(SubscriptionStatusEntry::Detached(DetachedSubscriptionStatus {
                    subscription_id: subscription.id.clone(),
                    subscription_status: subscription.status,
                    subscription_position: subscription.position,
                }));
                continue;
            };
            statuses.push(SubscriptionStatusEntry::Projection(ProjectionSubscriptionStatus {
                subscription_id: subscription.id.clone(),
                subscription_status: subscription.status,
                subscription_position: subscription.position,
                subscription_error: subscription.error.clone(),
                setup_status: Self::setup_status(subscriber),
            }));
        }

        for subscriber in &self.subscribers {
            if subscriptions.contains(&subscriber.id) || !criteria.includes(&subscriber.id) {
                continue;
            }
            // not persisted until the next setup
            statuses.push(SubscriptionStatusEntry::Projection(ProjectionSubscriptionStatus {
                subscription_id: subscriber.id.clone(),
                subscription_status: SubscriptionStatus::New,
                subscription_position: SequenceNumber::NONE,
                subscription_error: None,
                setup_status: Self::setup_status(subscriber),
            }));
        }

        Ok(SubscriptionStatusCollection::from_vec(statuses))
    }

    fn setup_status(subscriber: &Subscriber<N::Event>) -> ProjectionStatus {
        match subscriber.projection.status() {
            Ok(status) => status,
            Err(e) => {
                error!(
                    subscription_id = %subscriber.id,
                    error = %e,
                    "Subscription Engine: Could not determine projection status"
                );
                ProjectionStatus::Error(e.to_string())
            }
        }
    }

    /// Add a `NEW` row for every registered subscriber without one.
    fn discover_new_subscriptions(&self) -> Result<()> {
        let subscriptions = self
            .store
            .find_by_criteria_for_update(&SubscriptionCriteria::no_constraints())?;

        for subscriber in &self.subscribers {
            if subscriptions.contains(&subscriber.id) {
                continue;
            }
            self.store.add(Subscription::new(subscriber.id.clone()))?;
            info!(
                subscription_id = %subscriber.id,
                "Subscription Engine: New subscriber was found and added to the subscription store"
            );
        }
        Ok(())
    }

    fn setup_subscription(&self, subscription: &Subscription) -> Result<Option<SubscriberError>> {
        let Ok(subscriber) = self.subscribers.get(&subscription.id) else {
            self.store.update(
                &subscription.id,
                SubscriptionStatus::Detached,
                subscription.position,
                subscription.error.clone(),
            )?;
            info!(
                subscription_id = %subscription.id,
                "Subscription Engine: Subscriber not found and has been marked as detached"
            );
            return Ok(None);
        };

        if let Err(e) = subscriber.projection.set_up() {
            error!(
                subscription_id = %subscription.id,
                error = %e,
                "Subscription Engine: Subscriber has an error in the setup method"
            );
            self.store.update(
                &subscription.id,
                SubscriptionStatus::Error,
                subscription.position,
                Some(SubscriptionError::from_previous_status_and_error(
                    subscription.status,
                    &*e,
                )),
            )?;
            return Ok(Some(SubscriberError::for_subscription(
                subscription.id.clone(),
                &*e,
            )));
        }

        if subscription.status == SubscriptionStatus::Active {
            debug!(
                subscription_id = %subscription.id,
                "Subscription Engine: Active subscriber has been re-setup"
            );
            return Ok(None);
        }

        self.store.update(
            &subscription.id,
            SubscriptionStatus::Booting,
            subscription.position,
            None,
        )?;
        debug!(
            subscription_id = %subscription.id,
            previous_status = %subscription.status,
            "Subscription Engine: Subscriber has been setup, set to BOOTING"
        );
        Ok(None)
    }

    fn reset_subscription(&self, subscription: &Subscription) -> Result<Option<SubscriberError>> {
        let Ok(subscriber) = self.subscribers.get(&subscription.id) else {
            debug!(
                subscription_id = %subscription.id,
                "Subscription Engine: Subscriber not registered, skipping reset"
            );
            return Ok(None);
        };

        if let Err(e) = subscriber.projection.reset_state() {
            error!(
                subscription_id = %subscription.id,
                error = %e,
                "Subscription Engine: Subscriber has an error in the resetState method"
            );
            return Ok(Some(SubscriberError::for_subscription(
                subscription.id.clone(),
                &*e,
            )));
        }

        self.store.update(
            &subscription.id,
            SubscriptionStatus::Booting,
            SequenceNumber::NONE,
            None,
        )?;
        debug!(
            subscription_id = %subscription.id,
            "Subscription Engine: The resetState method has been executed"
        );
        Ok(None)
    }

    fn process_exclusively<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::AlreadyProcessing);
        }
        let _guard = ProcessingGuard(&self.processing);
        f()
    }
}
