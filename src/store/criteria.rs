//! Row selection for subscription store reads.

use crate::engine::SubscriptionEngineCriteria;
use crate::subscriptions::{Subscription, SubscriptionStatusFilter};
use crate::types::SubscriptionId;

/// Which subscription rows a store read returns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    /// Restrict to these ids (`None` = all).
    pub ids: Option<Vec<SubscriptionId>>,
    pub status: SubscriptionStatusFilter,
}

impl SubscriptionCriteria {
    pub fn no_constraints() -> Self {
        Self::default()
    }

    pub fn create(ids: Option<Vec<SubscriptionId>>, status: SubscriptionStatusFilter) -> Self {
        Self { ids, status }
    }

    pub fn for_engine_criteria_and_status(
        criteria: &SubscriptionEngineCriteria,
        status: SubscriptionStatusFilter,
    ) -> Self {
        Self {
            ids: criteria.ids.clone(),
            status,
        }
    }

    pub fn matches(&self, subscription: &Subscription) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&subscription.id) {
                return false;
            }
        }
        self.status.matches(subscription.status)
    }
}
