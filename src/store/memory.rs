//! In-memory subscription store with projection document tables.
//!
//! All state lives behind one mutex shared by every clone of the store and
//! every [`DocumentTable`] handed out by it. Document writes go through the
//! same undo journal as subscription rows, so when the engine rolls back the
//! savepoint around a failed `apply`, the projection's partial writes are
//! rolled back with it.

use crate::error::{EngineError, Result};
use crate::store::journal::Journal;
use crate::store::table::{undo_row, RowUndo, SubscriptionTable};
use crate::store::{SubscriptionCriteria, SubscriptionStore};
use crate::subscriptions::{Subscription, SubscriptionError, SubscriptionStatus, Subscriptions};
use crate::types::{SequenceNumber, SubscriptionId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Documents = BTreeMap<String, Value>;

enum Undo {
    Row(RowUndo),
    Document {
        table: String,
        key: String,
        previous: Option<Value>,
    },
    Table {
        table: String,
        previous: Option<Documents>,
    },
}

#[derive(Default)]
struct MemoryState {
    /// `None` until `setup()` ran.
    subscriptions: Option<SubscriptionTable>,
    tables: HashMap<String, Documents>,
    journal: Journal<Undo>,
}

impl MemoryState {
    fn undo(&mut self, entries: Vec<Undo>) {
        for entry in entries {
            match entry {
                Undo::Row(undo) => undo_row(&mut self.subscriptions, undo),
                Undo::Document {
                    table,
                    key,
                    previous,
                } => {
                    if let Some(documents) = self.tables.get_mut(&table) {
                        match previous {
                            Some(value) => {
                                documents.insert(key, value);
                            }
                            None => {
                                documents.remove(&key);
                            }
                        }
                    }
                }
                Undo::Table { table, previous } => match previous {
                    Some(documents) => {
                        self.tables.insert(table, documents);
                    }
                    None => {
                        self.tables.remove(&table);
                    }
                },
            }
        }
    }

    fn subscriptions_mut(&mut self) -> Result<&mut SubscriptionTable> {
        self.subscriptions.as_mut().ok_or(EngineError::SchemaNotFound)
    }

    fn documents_mut(&mut self, table: &str) -> Result<&mut Documents> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }
}

/// In-memory [`SubscriptionStore`].
///
/// Cloning yields another handle to the same state.
#[derive(Clone, Default)]
pub struct MemorySubscriptionStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to a named document table. The table itself is created by
    /// [`DocumentTable::create`].
    pub fn table(&self, name: impl Into<String>) -> DocumentTable {
        DocumentTable {
            state: Arc::clone(&self.state),
            name: name.into(),
        }
    }

    /// Number of open transactions and savepoints.
    pub fn transaction_depth(&self) -> usize {
        self.state.lock().journal.depth()
    }
}

impl SubscriptionStore for MemorySubscriptionStore {
    fn setup(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.subscriptions.is_none() {
            state.subscriptions = Some(SubscriptionTable::default());
            state.journal.record(Undo::Row(RowUndo::SchemaCreated));
        }
        Ok(())
    }

    fn find_by_criteria_for_update(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions> {
        let state = self.state.lock();
        state
            .subscriptions
            .as_ref()
            .map(|table| table.find(criteria))
            .ok_or(EngineError::SchemaNotFound)
    }

    fn add(&self, subscription: Subscription) -> Result<()> {
        let mut state = self.state.lock();
        let undo = state.subscriptions_mut()?.add(subscription)?;
        state.journal.record(Undo::Row(undo));
        Ok(())
    }

    fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let undo = state.subscriptions_mut()?.update(id, status, position, error)?;
        state.journal.record(Undo::Row(undo));
        Ok(())
    }

    fn begin_transaction(&self) -> Result<()> {
        self.state.lock().journal.begin();
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state.lock().journal.commit()?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        let undo = state.journal.rollback()?;
        state.undo(undo);
        Ok(())
    }

    fn create_savepoint(&self) -> Result<()> {
        self.state.lock().journal.create_savepoint()
    }

    fn rollback_savepoint(&self) -> Result<()> {
        let mut state = self.state.lock();
        let undo = state.journal.rollback_savepoint()?;
        state.undo(undo);
        Ok(())
    }

    fn release_savepoint(&self) -> Result<()> {
        self.state.lock().journal.release_savepoint()
    }
}

/// A named key/value table living in a [`MemorySubscriptionStore`].
///
/// Values are stored as JSON documents.
#[derive(Clone)]
pub struct DocumentTable {
    state: Arc<Mutex<MemoryState>>,
    name: String,
}

impl DocumentTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the table if it does not exist.
    pub fn create(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.tables.contains_key(&self.name) {
            state.tables.insert(self.name.clone(), Documents::new());
            state.journal.record(Undo::Table {
                table: self.name.clone(),
                previous: None,
            });
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.state.lock().tables.contains_key(&self.name)
    }

    pub fn put<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)?;

        let mut state = self.state.lock();
        let previous = state.documents_mut(&self.name)?.insert(key.clone(), value);
        state.journal.record(Undo::Document {
            table: self.name.clone(),
            key,
            previous,
        });
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut state = self.state.lock();
        let value = state.documents_mut(&self.name)?.get(key).cloned();
        drop(state);

        value
            .map(|value| {
                serde_json::from_value(value).map_err(|e| EngineError::Deserialization(e.to_string()))
            })
            .transpose()
    }

    /// Remove a document. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let previous = state.documents_mut(&self.name)?.remove(key);
        let existed = previous.is_some();
        if existed {
            state.journal.record(Undo::Document {
                table: self.name.clone(),
                key: key.to_string(),
                previous,
            });
        }
        Ok(existed)
    }

    /// Remove all documents, keeping the table.
    pub fn truncate(&self) -> Result<()> {
        let mut state = self.state.lock();
        let previous = std::mem::take(state.documents_mut(&self.name)?);
        state.journal.record(Undo::Table {
            table: self.name.clone(),
            previous: Some(previous),
        });
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let mut state = self.state.lock();
        Ok(state.documents_mut(&self.name)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All keys in order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        Ok(state.documents_mut(&self.name)?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_row(id: &str) -> MemorySubscriptionStore {
        let store = MemorySubscriptionStore::new();
        store.setup().unwrap();
        store.add(Subscription::new(id.into())).unwrap();
        store
    }

    fn position(store: &MemorySubscriptionStore, id: &str) -> SequenceNumber {
        store
            .find_by_criteria_for_update(&SubscriptionCriteria::no_constraints())
            .unwrap()
            .get(&id.into())
            .unwrap()
            .position
    }

    #[test]
    fn test_schema_not_found_before_setup() {
        let store = MemorySubscriptionStore::new();
        assert!(matches!(
            store.find_by_criteria_for_update(&SubscriptionCriteria::no_constraints()),
            Err(EngineError::SchemaNotFound)
        ));

        store.setup().unwrap();
        store.setup().unwrap();
        assert!(store
            .find_by_criteria_for_update(&SubscriptionCriteria::no_constraints())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transactional_rolls_back_on_error() {
        let store = store_with_row("a");

        let result: Result<()> = store.transactional(|| {
            store.update(&"a".into(), SubscriptionStatus::Active, SequenceNumber(3), None)?;
            Err(EngineError::Transaction("boom".into()))
        });

        assert!(result.is_err());
        assert_eq!(position(&store, "a"), SequenceNumber::NONE);
        assert_eq!(store.transaction_depth(), 0);
    }

    #[test]
    fn test_transactional_commits() {
        let store = store_with_row("a");

        store
            .transactional(|| {
                store.update(&"a".into(), SubscriptionStatus::Active, SequenceNumber(3), None)
            })
            .unwrap();

        assert_eq!(position(&store, "a"), SequenceNumber(3));
    }

    #[test]
    fn test_savepoint_rolls_back_documents_only_since_savepoint() {
        let store = store_with_row("a");
        let table = store.table("documents");
        table.create().unwrap();

        store.begin_transaction().unwrap();
        table.put("first", &1).unwrap();

        store.create_savepoint().unwrap();
        table.put("first", &100).unwrap();
        table.put("second", &2).unwrap();
        store.rollback_savepoint().unwrap();

        store.commit().unwrap();

        assert_eq!(table.get::<i32>("first").unwrap(), Some(1));
        assert_eq!(table.get::<i32>("second").unwrap(), None);
        assert_eq!(table.keys().unwrap(), vec!["first".to_string()]);
    }

    #[test]
    fn test_truncate_is_undone_by_rollback() {
        let store = MemorySubscriptionStore::new();
        let table = store.table("documents");
        table.create().unwrap();
        table.put("k", &"v").unwrap();

        store.begin_transaction().unwrap();
        table.truncate().unwrap();
        assert!(table.is_empty().unwrap());
        store.rollback().unwrap();

        assert_eq!(table.len().unwrap(), 1);
    }

    #[test]
    fn test_missing_table() {
        let store = MemorySubscriptionStore::new();
        let table = store.table("nope");

        assert!(!table.exists());
        assert!(matches!(
            table.put("k", &1),
            Err(EngineError::TableNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_clones_share_state() {
        let store = store_with_row("a");
        let other = store.clone();

        other
            .update(&"a".into(), SubscriptionStatus::Booting, SequenceNumber(1), None)
            .unwrap();
        assert_eq!(position(&store, "a"), SequenceNumber(1));
    }
}
