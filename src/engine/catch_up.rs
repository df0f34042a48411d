//! The catch-up loop shared by `boot`, `catch_up_active` and `reactivate`.
//!
//! Every batch runs in one store transaction. Within a batch, events are
//! consumed in sequence order and offered to each eligible subscriber in
//! registry order; every `apply` runs inside its own savepoint so a failing
//! projection only loses its own partial writes for that one event.

use super::criteria::{CatchUpOptions, ProgressCallback};
use super::result::{ProcessedResult, SubscriberError};
use super::SubscriptionEngine;
use crate::error::{EngineError, Result};
use crate::events::{EventLog, EventNormalizer, EventQuery};
use crate::store::{SubscriptionCriteria, SubscriptionStore};
use crate::subscriptions::{
    Subscription, SubscriptionError, SubscriptionStatus, SubscriptionStatusFilter, Subscriptions,
};
use crate::types::{SequenceNumber, SubscriptionId};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// State carried across the batches of one catch-up run.
#[derive(Default)]
struct CatchUpRun {
    /// Subscriptions selected by the first batch; `None` before it ran.
    hooked: Option<Subscriptions>,
    processed_events: u64,
    errors: Vec<SubscriberError>,
}

impl CatchUpRun {
    fn record_hook_error(
        &mut self,
        id: &SubscriptionId,
        hook: &'static str,
        error: &(dyn std::error::Error + 'static),
    ) {
        warn!(
            subscription_id = %id,
            hook,
            error = %error,
            "Subscription Engine: Catch-up hook failed"
        );
        self.errors
            .push(SubscriberError::for_subscription(id.clone(), error));
    }
}

impl<L, S, N> SubscriptionEngine<L, S, N>
where
    L: EventLog,
    S: SubscriptionStore,
    N: EventNormalizer,
{
    pub(super) fn catch_up_subscriptions(
        &self,
        status: SubscriptionStatusFilter,
        options: CatchUpOptions<'_>,
    ) -> Result<ProcessedResult> {
        let CatchUpOptions {
            criteria,
            mut progress,
            batch_size,
        } = options;
        if let Some(0) = batch_size {
            return Err(EngineError::InvalidBatchSize(0));
        }

        info!(statuses = %status, "Subscription Engine: Start catching up subscriptions");

        let criteria = SubscriptionCriteria::for_engine_criteria_and_status(&criteria, status);
        let mut run = CatchUpRun::default();

        loop {
            let continue_batching = self
                .store
                .transactional(|| self.catch_up_batch(&criteria, &mut run, &mut progress, batch_size))?;
            if !run.errors.is_empty() || !continue_batching {
                break;
            }
        }

        if let Some(hooked) = run.hooked.take() {
            for subscription in &hooked {
                let subscriber = self.subscribers.get(&subscription.id)?;
                if let Some(hook) = &subscriber.catch_up_hook {
                    if let Err(e) = hook.on_after_catch_up() {
                        run.record_hook_error(&subscription.id, "on_after_catch_up", &*e);
                    }
                }
            }
        }

        Ok(ProcessedResult::from_errors(run.processed_events, run.errors))
    }

    /// One transactional unit. Returns whether another batch must follow.
    fn catch_up_batch(
        &self,
        criteria: &SubscriptionCriteria,
        run: &mut CatchUpRun,
        progress: &mut Option<ProgressCallback<'_>>,
        batch_size: Option<usize>,
    ) -> Result<bool> {
        let found = self.store.find_by_criteria_for_update(criteria)?;

        let mut eligible = if run.hooked.is_some() {
            let hooked = run.hooked.as_ref();
            self.in_registry_order(
                found.filter(|s| hooked.map_or(false, |hooked| hooked.contains(&s.id))),
            )
        } else {
            let Some(selected) = self.select_for_run(found, run)? else {
                info!("Subscription Engine: No subscriptions matched criteria. Finishing catch up");
                return Ok(false);
            };
            selected
        };
        if eligible.is_empty() {
            return Ok(false);
        }

        let start = eligible
            .lowest_position()
            .map(SequenceNumber::next)
            .unwrap_or(SequenceNumber::NONE);
        debug!(position = %start, "Subscription Engine: Event stream is processed from position");

        let mut reached: HashMap<SubscriptionId, SequenceNumber> = HashMap::new();
        let mut continue_batching = false;

        let events = self
            .event_log
            .load(&EventQuery::all().with_minimum_sequence_number(start))?;
        for envelope in events {
            let envelope = envelope?;
            let sequence_number = envelope.sequence_number;
            if run.processed_events > 0 {
                debug!(position = %sequence_number, "Subscription Engine: Current event stream position");
            }

            if let Some(progress) = progress.as_mut() {
                progress(&envelope);
            }
            let event = self.normalizer.denormalize(&envelope)?;

            let mut failed = Vec::new();
            for subscription in &eligible {
                if subscription.position >= sequence_number {
                    debug!(
                        subscription_id = %subscription.id,
                        position = %subscription.position,
                        "Subscription Engine: Subscription is farther than the current position, continue catch up"
                    );
                    continue;
                }
                let subscriber = self.subscribers.get(&subscription.id)?;

                if let Some(hook) = &subscriber.catch_up_hook {
                    if let Err(e) = hook.on_before_event(&event, &envelope) {
                        run.record_hook_error(&subscription.id, "on_before_event", &*e);
                    }
                }

                self.store.create_savepoint()?;
                if let Err(e) = subscriber.projection.apply(&event, &envelope) {
                    error!(
                        subscription_id = %subscription.id,
                        sequence_number = %sequence_number,
                        event_type = %envelope.event.event_type,
                        error = %e,
                        "Subscription Engine: Subscriber could not process the event"
                    );
                    self.store.rollback_savepoint()?;
                    failed.push(subscription.id.clone());
                    self.store.update(
                        &subscription.id,
                        SubscriptionStatus::Error,
                        reached
                            .get(&subscription.id)
                            .copied()
                            .unwrap_or(subscription.position),
                        Some(SubscriptionError::from_previous_status_and_error(
                            subscription.status,
                            &*e,
                        )),
                    )?;
                    run.errors
                        .push(SubscriberError::for_subscription(subscription.id.clone(), &*e));
                    continue;
                }
                self.store.release_savepoint()?;
                reached.insert(subscription.id.clone(), sequence_number);
                debug!(
                    subscription_id = %subscription.id,
                    sequence_number = %sequence_number,
                    event_type = %envelope.event.event_type,
                    "Subscription Engine: Subscriber processed the event"
                );

                if let Some(hook) = &subscriber.catch_up_hook {
                    if let Err(e) = hook.on_after_event(&event, &envelope) {
                        run.record_hook_error(&subscription.id, "on_after_event", &*e);
                    }
                }
            }
            for id in &failed {
                eligible = eligible.without(id);
            }

            run.processed_events += 1;
            if let Some(batch_size) = batch_size {
                if run.processed_events % batch_size as u64 == 0 {
                    continue_batching = true;
                    info!(
                        processed_events = run.processed_events,
                        "Subscription Engine: Batch completed"
                    );
                    break;
                }
            }
        }

        for subscription in &eligible {
            let position = reached
                .get(&subscription.id)
                .copied()
                .unwrap_or(subscription.position);
            if continue_batching {
                // resumable: a crash between batches restarts from here
                self.store.update(
                    &subscription.id,
                    subscription.status,
                    position,
                    subscription.error.clone(),
                )?;
                continue;
            }

            self.store
                .update(&subscription.id, SubscriptionStatus::Active, position, None)?;
            if subscription.status != SubscriptionStatus::Active {
                info!(
                    subscription_id = %subscription.id,
                    "Subscription Engine: Subscription has been set to active after booting"
                );
            }
        }

        info!(
            processed_events = run.processed_events,
            errors = run.errors.len(),
            "Subscription Engine: Finish catch up"
        );
        Ok(continue_batching)
    }

    /// First batch only: detach rows without a registered subscriber, order
    /// the rest by registry and run their `on_before_catch_up` hooks.
    fn select_for_run(
        &self,
        found: Subscriptions,
        run: &mut CatchUpRun,
    ) -> Result<Option<Subscriptions>> {
        let mut registered = Vec::with_capacity(found.len());
        for subscription in found {
            if self.subscribers.contains(&subscription.id) {
                registered.push(subscription);
                continue;
            }
            self.store.update(
                &subscription.id,
                SubscriptionStatus::Detached,
                subscription.position,
                None,
            )?;
            info!(
                subscription_id = %subscription.id,
                "Subscription Engine: Subscriber not found and has been marked as detached"
            );
        }
        if registered.is_empty() {
            return Ok(None);
        }

        let selected = self.in_registry_order(Subscriptions::from_vec(registered));
        for subscription in &selected {
            self.before_catch_up(subscription, run)?;
        }
        run.hooked = Some(selected.clone());
        Ok(Some(selected))
    }

    fn before_catch_up(&self, subscription: &Subscription, run: &mut CatchUpRun) -> Result<()> {
        let subscriber = self.subscribers.get(&subscription.id)?;
        if let Some(hook) = &subscriber.catch_up_hook {
            if let Err(e) = hook.on_before_catch_up(subscription.status) {
                run.record_hook_error(&subscription.id, "on_before_catch_up", &*e);
            }
        }
        Ok(())
    }

    fn in_registry_order(&self, subscriptions: Subscriptions) -> Subscriptions {
        subscriptions.sorted_by_key(|s| self.subscribers.position_of(&s.id))
    }
}
