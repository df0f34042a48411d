//! The subscription table shared by the store implementations.

use crate::error::{EngineError, Result};
use crate::store::SubscriptionCriteria;
use crate::subscriptions::{Subscription, SubscriptionError, SubscriptionStatus, Subscriptions};
use crate::types::{SequenceNumber, SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};

/// Rows in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SubscriptionTable {
    rows: Vec<Subscription>,
}

/// How to undo one write to a subscription table.
#[derive(Clone, Debug)]
pub(crate) enum RowUndo {
    /// `setup()` created the table.
    SchemaCreated,
    Inserted(SubscriptionId),
    /// Row content before an update.
    Updated(Subscription),
}

impl SubscriptionTable {
    pub fn find(&self, criteria: &SubscriptionCriteria) -> Subscriptions {
        Subscriptions::from_vec(
            self.rows
                .iter()
                .filter(|row| criteria.matches(row))
                .cloned()
                .collect(),
        )
    }

    pub fn add(&mut self, mut subscription: Subscription) -> Result<RowUndo> {
        if self.rows.iter().any(|row| row.id == subscription.id) {
            return Err(EngineError::SubscriptionExists(subscription.id));
        }
        subscription.last_saved_at = Some(Timestamp::now());
        let id = subscription.id.clone();
        self.rows.push(subscription);
        Ok(RowUndo::Inserted(id))
    }

    pub fn update(
        &mut self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<RowUndo> {
        let row = self
            .rows
            .iter_mut()
            .find(|row| &row.id == id)
            .ok_or_else(|| EngineError::SubscriptionNotFound(id.clone()))?;

        let previous = row.clone();
        row.status = status;
        row.position = position;
        row.error = error;
        row.last_saved_at = Some(Timestamp::now());
        Ok(RowUndo::Updated(previous))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Apply one undo entry to a table slot (`None` = schema absent).
pub(crate) fn undo_row(table: &mut Option<SubscriptionTable>, undo: RowUndo) {
    match undo {
        RowUndo::SchemaCreated => *table = None,
        RowUndo::Inserted(id) => {
            if let Some(table) = table {
                table.rows.retain(|row| row.id != id);
            }
        }
        RowUndo::Updated(previous) => {
            if let Some(table) = table {
                if let Some(row) = table.rows.iter_mut().find(|row| row.id == previous.id) {
                    *row = previous;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rejects_duplicates() {
        let mut table = SubscriptionTable::default();
        table.add(Subscription::new("a".into())).unwrap();

        assert!(matches!(
            table.add(Subscription::new("a".into())),
            Err(EngineError::SubscriptionExists(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_update_and_undo() {
        let mut slot = Some(SubscriptionTable::default());
        let table = slot.as_mut().unwrap();
        table.add(Subscription::new("a".into())).unwrap();

        let undo = table
            .update(&"a".into(), SubscriptionStatus::Active, SequenceNumber(4), None)
            .unwrap();
        let rows = table.find(&SubscriptionCriteria::no_constraints());
        assert_eq!(rows.get(&"a".into()).unwrap().position, SequenceNumber(4));
        assert!(rows.get(&"a".into()).unwrap().last_saved_at.is_some());

        undo_row(&mut slot, undo);
        let rows = slot.as_ref().unwrap().find(&SubscriptionCriteria::no_constraints());
        assert_eq!(rows.get(&"a".into()).unwrap().status, SubscriptionStatus::New);
    }

    #[test]
    fn test_update_unknown_row() {
        let mut table = SubscriptionTable::default();
        let result = table.update(&"x".into(), SubscriptionStatus::Active, SequenceNumber(1), None);
        assert!(matches!(result, Err(EngineError::SubscriptionNotFound(_))));
    }
}
