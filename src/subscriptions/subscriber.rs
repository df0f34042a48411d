//! Subscriber registry: projections and their optional catch-up hooks.

use crate::error::{EngineError, Result};
use crate::events::EventEnvelope;
use crate::subscriptions::types::SubscriptionStatus;
use crate::types::SubscriptionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Error type returned by projections and hooks.
pub type ProjectionError = Box<dyn std::error::Error + Send + Sync>;

/// What a projection reports about its own storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum ProjectionStatus {
    Ok,
    /// The projection's storage is missing or outdated; `set_up` will fix it.
    SetupRequired(String),
    /// The projection could not determine its status.
    Error(String),
}

impl ProjectionStatus {
    pub fn setup_required(reason: impl Into<String>) -> Self {
        ProjectionStatus::SetupRequired(reason.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProjectionStatus::Ok)
    }
}

/// A read model fed by the engine.
///
/// Projections must tolerate seeing an event twice (replay is at-least-once).
pub trait Projection<E>: Send + Sync {
    /// Create or migrate the projection's storage. Must be idempotent.
    fn set_up(&self) -> std::result::Result<(), ProjectionError>;

    fn status(&self) -> std::result::Result<ProjectionStatus, ProjectionError>;

    /// Drop all projected state so the projection can be replayed.
    fn reset_state(&self) -> std::result::Result<(), ProjectionError>;

    fn apply(&self, event: &E, envelope: &EventEnvelope) -> std::result::Result<(), ProjectionError>;
}

/// Optional observer of a projection's catch-up.
///
/// Hook failures are reported but never stop event application.
pub trait CatchUpHook<E>: Send + Sync {
    fn on_before_catch_up(
        &self,
        _status: SubscriptionStatus,
    ) -> std::result::Result<(), ProjectionError> {
        Ok(())
    }

    fn on_before_event(
        &self,
        _event: &E,
        _envelope: &EventEnvelope,
    ) -> std::result::Result<(), ProjectionError> {
        Ok(())
    }

    fn on_after_event(
        &self,
        _event: &E,
        _envelope: &EventEnvelope,
    ) -> std::result::Result<(), ProjectionError> {
        Ok(())
    }

    fn on_after_catch_up(&self) -> std::result::Result<(), ProjectionError> {
        Ok(())
    }
}

/// A registered subscriber.
pub struct Subscriber<E> {
    pub id: SubscriptionId,
    pub projection: Arc<dyn Projection<E>>,
    pub catch_up_hook: Option<Arc<dyn CatchUpHook<E>>>,
}

impl<E> Subscriber<E> {
    pub fn new(id: impl Into<SubscriptionId>, projection: Arc<dyn Projection<E>>) -> Self {
        Self {
            id: id.into(),
            projection,
            catch_up_hook: None,
        }
    }

    pub fn with_catch_up_hook(mut self, hook: Arc<dyn CatchUpHook<E>>) -> Self {
        self.catch_up_hook = Some(hook);
        self
    }
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            projection: Arc::clone(&self.projection),
            catch_up_hook: self.catch_up_hook.clone(),
        }
    }
}

/// The registry of subscribers for one engine, in registration order.
pub struct Subscribers<E> {
    entries: Vec<Subscriber<E>>,
    positions: HashMap<SubscriptionId, usize>,
}

impl<E> Subscribers<E> {
    /// Build a registry. Fails if two subscribers share an id.
    pub fn new(subscribers: Vec<Subscriber<E>>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(subscribers.len());
        for (index, subscriber) in subscribers.iter().enumerate() {
            if positions.insert(subscriber.id.clone(), index).is_some() {
                return Err(EngineError::SubscriptionExists(subscriber.id.clone()));
            }
        }
        Ok(Self {
            entries: subscribers,
            positions,
        })
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &SubscriptionId) -> Result<&Subscriber<E>> {
        self.positions
            .get(id)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| EngineError::SubscriberNotRegistered(id.clone()))
    }

    /// Registration index of `id`, used to order work by registry order.
    pub fn position_of(&self, id: &SubscriptionId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscriber<E>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a, E> IntoIterator for &'a Subscribers<E> {
    type Item = &'a Subscriber<E>;
    type IntoIter = std::slice::Iter<'a, Subscriber<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopProjection;

    impl Projection<()> for NoopProjection {
        fn set_up(&self) -> std::result::Result<(), ProjectionError> {
            Ok(())
        }

        fn status(&self) -> std::result::Result<ProjectionStatus, ProjectionError> {
            Ok(ProjectionStatus::Ok)
        }

        fn reset_state(&self) -> std::result::Result<(), ProjectionError> {
            Ok(())
        }

        fn apply(&self, _: &(), _: &EventEnvelope) -> std::result::Result<(), ProjectionError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup_and_order() {
        let subscribers = Subscribers::new(vec![
            Subscriber::new("b", Arc::new(NoopProjection)),
            Subscriber::new("a", Arc::new(NoopProjection)),
        ])
        .unwrap();

        let ids: Vec<_> = subscribers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(subscribers.contains(&SubscriptionId::new("a")));
        assert_eq!(subscribers.position_of(&SubscriptionId::new("a")), Some(1));
        assert!(matches!(
            subscribers.get(&SubscriptionId::new("missing")),
            Err(EngineError::SubscriberNotRegistered(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = Subscribers::new(vec![
            Subscriber::new("a", Arc::new(NoopProjection)),
            Subscriber::new("a", Arc::new(NoopProjection)),
        ]);
        assert!(matches!(result, Err(EngineError::SubscriptionExists(_))));
    }

    #[test]
    fn test_projection_status_serialization() {
        let status = ProjectionStatus::setup_required("Requires 1 SQL statements");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "setup_required");
        assert_eq!(json["details"], "Requires 1 SQL statements");
        assert_eq!(serde_json::to_value(ProjectionStatus::Ok).unwrap()["type"], "ok");
    }
}
