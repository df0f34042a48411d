//! Subscription rows and status snapshots.

use crate::subscriptions::subscriber::ProjectionStatus;
use crate::types::{SequenceNumber, SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Discovered, projection not set up yet.
    New,
    /// Set up, waiting for (or in the middle of) its initial replay.
    Booting,
    /// Caught up; receives new events on every catch-up tick.
    Active,
    /// A projection call failed; excluded until reactivated.
    Error,
    /// The subscriber is no longer registered.
    Detached,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::New => "NEW",
            SubscriptionStatus::Booting => "BOOTING",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Error => "ERROR",
            SubscriptionStatus::Detached => "DETACHED",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of statuses to select subscriptions by (empty = any).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatusFilter(Vec<SubscriptionStatus>);

impl SubscriptionStatusFilter {
    pub fn any() -> Self {
        Self(Vec::new())
    }

    pub fn from_statuses(statuses: impl IntoIterator<Item = SubscriptionStatus>) -> Self {
        let mut filter = Vec::new();
        for status in statuses {
            if !filter.contains(&status) {
                filter.push(status);
            }
        }
        Self(filter)
    }

    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, status: SubscriptionStatus) -> bool {
        self.is_any() || self.0.contains(&status)
    }

    pub fn statuses(&self) -> &[SubscriptionStatus] {
        &self.0
    }
}

impl fmt::Display for SubscriptionStatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("ANY");
        }
        let names: Vec<_> = self.0.iter().map(|s| s.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

/// Persisted failure details of a subscription in [`SubscriptionStatus::Error`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionError {
    /// Status the subscription had when the failure happened.
    pub previous_status: SubscriptionStatus,
    pub message: String,
    /// Rendered source chain of the failure, if any.
    pub error_trace: Option<String>,
}

impl SubscriptionError {
    pub fn new(previous_status: SubscriptionStatus, message: impl Into<String>) -> Self {
        Self {
            previous_status,
            message: message.into(),
            error_trace: None,
        }
    }

    pub fn from_previous_status_and_error(
        previous_status: SubscriptionStatus,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            previous_status,
            message: error.to_string(),
            error_trace: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\ncaused by: "))
            },
        }
    }
}

/// Tracking row of one subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub status: SubscriptionStatus,
    /// Last sequence number fully applied.
    pub position: SequenceNumber,
    pub error: Option<SubscriptionError>,
    /// When the store last wrote this row.
    pub last_saved_at: Option<Timestamp>,
}

impl Subscription {
    /// A freshly discovered subscription.
    pub fn new(id: SubscriptionId) -> Self {
        Self {
            id,
            status: SubscriptionStatus::New,
            position: SequenceNumber::NONE,
            error: None,
            last_saved_at: None,
        }
    }
}

/// Ordered collection of subscription rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriptions(Vec<Subscription>);

impl Subscriptions {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn from_vec(subscriptions: Vec<Subscription>) -> Self {
        Self(subscriptions)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.0.iter()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.0.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.get(id).is_some()
    }

    /// Copy of this collection without the given id.
    pub fn without(&self, id: &SubscriptionId) -> Self {
        Self(self.0.iter().filter(|s| &s.id != id).cloned().collect())
    }

    /// Lowest position across all rows, `None` if empty.
    pub fn lowest_position(&self) -> Option<SequenceNumber> {
        self.0.iter().map(|s| s.position).min()
    }

    /// Keep only the rows for which `keep` returns true.
    pub fn filter(&self, keep: impl Fn(&Subscription) -> bool) -> Self {
        Self(self.0.iter().filter(|s| keep(s)).cloned().collect())
    }

    /// Reorder rows by `key`, ties keep their relative order.
    pub fn sorted_by_key<K: Ord>(mut self, key: impl FnMut(&Subscription) -> K) -> Self {
        self.0.sort_by_key(key);
        self
    }

    pub fn into_vec(self) -> Vec<Subscription> {
        self.0
    }
}

impl IntoIterator for Subscriptions {
    type Item = Subscription;
    type IntoIter = std::vec::IntoIter<Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Subscriptions {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// --- Status Snapshots ---

/// Status of a subscription whose subscriber is registered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSubscriptionStatus {
    pub subscription_id: SubscriptionId,
    pub subscription_status: SubscriptionStatus,
    pub subscription_position: SequenceNumber,
    pub subscription_error: Option<SubscriptionError>,
    /// What the live projection reports about its own setup.
    pub setup_status: ProjectionStatus,
}

/// Status of a subscription whose subscriber is no longer registered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetachedSubscriptionStatus {
    pub subscription_id: SubscriptionId,
    pub subscription_status: SubscriptionStatus,
    pub subscription_position: SequenceNumber,
}

/// One entry of a status query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionStatusEntry {
    Projection(ProjectionSubscriptionStatus),
    Detached(DetachedSubscriptionStatus),
}

impl SubscriptionStatusEntry {
    pub fn subscription_id(&self) -> &SubscriptionId {
        match self {
            SubscriptionStatusEntry::Projection(status) => &status.subscription_id,
            SubscriptionStatusEntry::Detached(status) => &status.subscription_id,
        }
    }

    pub fn subscription_status(&self) -> SubscriptionStatus {
        match self {
            SubscriptionStatusEntry::Projection(status) => status.subscription_status,
            SubscriptionStatusEntry::Detached(status) => status.subscription_status,
        }
    }

    pub fn subscription_position(&self) -> SequenceNumber {
        match self {
            SubscriptionStatusEntry::Projection(status) => status.subscription_position,
            SubscriptionStatusEntry::Detached(status) => status.subscription_position,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, SubscriptionStatusEntry::Detached(_))
    }
}

/// Result of a status query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionStatusCollection(Vec<SubscriptionStatusEntry>);

impl SubscriptionStatusCollection {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_vec(entries: Vec<SubscriptionStatusEntry>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<&SubscriptionStatusEntry> {
        self.0.first()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&SubscriptionStatusEntry> {
        self.0.iter().find(|entry| entry.subscription_id() == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubscriptionStatusEntry> {
        self.0.iter()
    }
}

impl IntoIterator for SubscriptionStatusCollection {
    type Item = SubscriptionStatusEntry;
    type IntoIter = std::vec::IntoIter<SubscriptionStatusEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
