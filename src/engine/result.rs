//! Outcomes of engine operations.

use crate::types::SubscriptionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A projection or hook failure attributed to one subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberError {
    pub subscription_id: SubscriptionId,
    pub message: String,
    /// Messages of the error's source chain, outermost first.
    pub causes: Vec<String>,
}

impl SubscriberError {
    pub fn for_subscription(
        subscription_id: SubscriptionId,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            subscription_id,
            message: error.to_string(),
            causes,
        }
    }
}

impl fmt::Display for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subscription_id, self.message)
    }
}

/// Non-empty, ordered list of subscriber errors.
///
/// Deserializing an empty list fails, so every value holds at least one
/// error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SubscriberError>", into = "Vec<SubscriberError>")]
pub struct Errors(Vec<SubscriberError>);

impl TryFrom<Vec<SubscriberError>> for Errors {
    type Error = &'static str;

    fn try_from(errors: Vec<SubscriberError>) -> Result<Self, Self::Error> {
        Self::from_vec(errors).ok_or("error list must not be empty")
    }
}

impl From<Errors> for Vec<SubscriberError> {
    fn from(errors: Errors) -> Self {
        errors.0
    }
}

impl Errors {
    /// `None` if `errors` is empty.
    pub fn from_vec(errors: Vec<SubscriberError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self(errors))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Earliest error. Never panics: every constructor rejects an empty list.
    pub fn first(&self) -> &SubscriberError {
        &self.0[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubscriberError> {
        self.0.iter()
    }

    /// Whether any error belongs to `id`.
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.0.iter().any(|error| &error.subscription_id == id)
    }

    pub fn into_vec(self) -> Vec<SubscriberError> {
        self.0
    }
}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a SubscriberError;
    type IntoIter = std::slice::Iter<'a, SubscriberError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Outcome of `setup` and `reset`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub errors: Option<Errors>,
}

impl OperationResult {
    pub fn success() -> Self {
        Self { errors: None }
    }

    pub fn failed(errors: Errors) -> Self {
        Self {
            errors: Some(errors),
        }
    }

    pub(crate) fn from_errors(errors: Vec<SubscriberError>) -> Self {
        Self {
            errors: Errors::from_vec(errors),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_none()
    }
}

/// Outcome of a catch-up run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedResult {
    /// Events consumed from the log, counted once regardless of how many
    /// subscribers applied them.
    pub processed_events: u64,
    pub errors: Option<Errors>,
}

impl ProcessedResult {
    pub fn success(processed_events: u64) -> Self {
        Self {
            processed_events,
            errors: None,
        }
    }

    pub fn failed(processed_events: u64, errors: Errors) -> Self {
        Self {
            processed_events,
            errors: Some(errors),
        }
    }

    pub(crate) fn from_errors(processed_events: u64, errors: Vec<SubscriberError>) -> Self {
        Self {
            processed_events,
            errors: Errors::from_vec(errors),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_none()
    }
}
