//! Maintenance workflows built from engine operations.
//!
//! # Example
//!
//! ```ignore
//! let maintainer = Maintainer::new(engine, MaintainerConfig { batch_size: Some(500) });
//!
//! let result = maintainer.setup()?;
//! assert!(result.is_success());
//!
//! // after a projection bug was fixed
//! maintainer.replay_subscription(&"contentGraph".into(), None)?;
//! ```

use crate::engine::{
    CatchUpOptions, OperationResult, ProcessedResult, ProgressCallback, SubscriberError,
    SubscriptionEngine, SubscriptionEngineCriteria,
};
use crate::error::{EngineError, Result};
use crate::events::{EventLog, EventNormalizer};
use crate::store::SubscriptionStore;
use crate::subscriptions::SubscriptionStatusCollection;
use crate::types::SubscriptionId;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Settings applied to every catch-up a [`Maintainer`] starts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintainerConfig {
    /// Events per committed transaction (`None` = unbounded).
    pub batch_size: Option<usize>,
}

impl MaintainerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Deserialization(e.to_string()))
    }
}

pub struct Maintainer<L, S, N: EventNormalizer> {
    engine: SubscriptionEngine<L, S, N>,
    config: MaintainerConfig,
}

impl<L, S, N> Maintainer<L, S, N>
where
    L: EventLog,
    S: SubscriptionStore,
    N: EventNormalizer,
{
    pub fn new(engine: SubscriptionEngine<L, S, N>, config: MaintainerConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &SubscriptionEngine<L, S, N> {
        &self.engine
    }

    pub fn config(&self) -> &MaintainerConfig {
        &self.config
    }

    /// Set up all subscriptions and boot them if that succeeded.
    pub fn setup(&self) -> Result<OperationResult> {
        let result = self.engine.setup(&SubscriptionEngineCriteria::no_constraints())?;
        if !result.is_success() {
            return Ok(result);
        }
        let booted = self.engine.boot(self.options(SubscriptionEngineCriteria::no_constraints(), None))?;
        Ok(Self::combine(result, booted))
    }

    pub fn status(&self) -> Result<SubscriptionStatusCollection> {
        self.engine
            .subscription_status(&SubscriptionEngineCriteria::no_constraints())
    }

    /// Feed new events to all active subscriptions.
    pub fn catch_up(&self, progress: Option<ProgressCallback<'_>>) -> Result<ProcessedResult> {
        self.engine
            .catch_up_active(self.options(SubscriptionEngineCriteria::no_constraints(), progress))
    }

    /// Reset one projection and replay the whole log into it.
    pub fn replay_subscription(
        &self,
        id: &SubscriptionId,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<OperationResult> {
        let criteria = SubscriptionEngineCriteria::for_ids([id.clone()]);
        if self.engine.subscription_status(&criteria)?.is_empty() {
            return Err(EngineError::SubscriptionNotFound(id.clone()));
        }

        info!(subscription_id = %id, "Maintainer: Replaying subscription");
        let reset = self.engine.reset(&criteria)?;
        if !reset.is_success() {
            return Ok(reset);
        }
        let booted = self.engine.boot(self.options(criteria, progress))?;
        Ok(Self::combine(reset, booted))
    }

    /// Reset all projections and replay the whole log into them.
    pub fn replay_all_subscriptions(
        &self,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<OperationResult> {
        info!("Maintainer: Replaying all subscriptions");
        let criteria = SubscriptionEngineCriteria::no_constraints();
        let reset = self.engine.reset(&criteria)?;
        if !reset.is_success() {
            return Ok(reset);
        }
        let booted = self.engine.boot(self.options(criteria, progress))?;
        Ok(Self::combine(reset, booted))
    }

    /// Catch up one subscription in `ERROR` or `DETACHED`.
    pub fn reactivate_subscription(
        &self,
        id: &SubscriptionId,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<ProcessedResult> {
        let criteria = SubscriptionEngineCriteria::for_ids([id.clone()]);
        if self.engine.subscription_status(&criteria)?.is_empty() {
            return Err(EngineError::SubscriptionNotFound(id.clone()));
        }
        self.engine.reactivate(self.options(criteria, progress))
    }

    fn options<'a>(
        &self,
        criteria: SubscriptionEngineCriteria,
        progress: Option<ProgressCallback<'a>>,
    ) -> CatchUpOptions<'a> {
        CatchUpOptions {
            criteria,
            progress,
            batch_size: self.config.batch_size,
        }
    }

    fn combine(first: OperationResult, processed: ProcessedResult) -> OperationResult {
        let errors: Vec<SubscriberError> = first
            .errors
            .into_iter()
            .chain(processed.errors)
            .flat_map(|errors| errors.into_vec())
            .collect();
        OperationResult::from_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config = MaintainerConfig::from_json(r#"{"batch_size": 250}"#).unwrap();
        assert_eq!(config.batch_size, Some(250));

        let config = MaintainerConfig::from_json("{}").unwrap();
        assert_eq!(config, MaintainerConfig::default());
    }
}
