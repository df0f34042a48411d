//! Selection and per-call options for engine operations.

use crate::events::EventEnvelope;
use crate::types::SubscriptionId;

/// Which subscriptions an engine operation applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionEngineCriteria {
    /// Restrict to these ids (`None` = all).
    pub ids: Option<Vec<SubscriptionId>>,
}

impl SubscriptionEngineCriteria {
    pub fn no_constraints() -> Self {
        Self::default()
    }

    pub fn for_ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SubscriptionId>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether `id` is selected.
    pub fn includes(&self, id: &SubscriptionId) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(id))
    }
}

/// Called once for every event consumed during catch-up.
pub type ProgressCallback<'a> = Box<dyn FnMut(&EventEnvelope) + 'a>;

/// Options for `boot`, `catch_up_active` and `reactivate`.
#[derive(Default)]
pub struct CatchUpOptions<'a> {
    pub criteria: SubscriptionEngineCriteria,
    pub progress: Option<ProgressCallback<'a>>,
    /// Events per committed transaction (`None` = all in one).
    pub batch_size: Option<usize>,
}

impl<'a> CatchUpOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_criteria(mut self, criteria: SubscriptionEngineCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_progress(mut self, progress: impl FnMut(&EventEnvelope) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

impl std::fmt::Debug for CatchUpOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatchUpOptions")
            .field("criteria", &self.criteria)
            .field("progress", &self.progress.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
