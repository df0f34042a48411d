//! Undo journal backing transactions and savepoints.
//!
//! Every write made inside a transaction records how to undo itself in the
//! innermost open frame. Rolling a frame back hands its undo entries to the
//! store (newest first); releasing or committing a nested frame folds its
//! entries into the parent so an outer rollback still sees them.

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    Transaction,
    Savepoint,
}

struct Frame<U> {
    kind: FrameKind,
    undo: Vec<U>,
}

/// Outcome of a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Commit {
    /// The outermost transaction committed; changes are now durable.
    Outermost,
    /// A nested transaction committed into its parent.
    Nested,
}

pub(crate) struct Journal<U> {
    frames: Vec<Frame<U>>,
}

impl<U> Default for Journal<U> {
    fn default() -> Self {
        Self { frames: Vec::new() }
    }
}

impl<U> Journal<U> {
    pub fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the next `commit` closes the outermost transaction.
    pub fn commits_outermost(&self) -> bool {
        self.frames
            .iter()
            .filter(|frame| frame.kind == FrameKind::Transaction)
            .count()
            == 1
    }

    /// Open a transaction; nests inside an already open one.
    pub fn begin(&mut self) {
        self.frames.push(Frame {
            kind: FrameKind::Transaction,
            undo: Vec::new(),
        });
    }

    pub fn create_savepoint(&mut self) -> Result<()> {
        if !self.in_transaction() {
            return Err(EngineError::Transaction(
                "Cannot create a savepoint outside of a transaction".into(),
            ));
        }
        self.frames.push(Frame {
            kind: FrameKind::Savepoint,
            undo: Vec::new(),
        });
        Ok(())
    }

    /// Record how to undo a write. Writes outside a transaction are final.
    pub fn record(&mut self, undo: U) {
        if let Some(frame) = self.frames.last_mut() {
            frame.undo.push(undo);
        }
    }

    /// Commit the innermost transaction, releasing savepoints opened in it.
    pub fn commit(&mut self) -> Result<Commit> {
        let mut undo = Vec::new();
        loop {
            let mut frame = self
                .frames
                .pop()
                .ok_or_else(|| EngineError::Transaction("No active transaction to commit".into()))?;
            frame.undo.append(&mut undo);
            undo = frame.undo;
            if frame.kind == FrameKind::Transaction {
                break;
            }
        }

        match self.frames.last_mut() {
            Some(parent) => {
                parent.undo.append(&mut undo);
                Ok(Commit::Nested)
            }
            None => Ok(Commit::Outermost),
        }
    }

    /// Roll back the innermost transaction including its savepoints.
    ///
    /// Returns the undo entries to apply, newest first.
    pub fn rollback(&mut self) -> Result<Vec<U>> {
        let mut undo = Vec::new();
        loop {
            let frame = self
                .frames
                .pop()
                .ok_or_else(|| EngineError::Transaction("No active transaction to roll back".into()))?;
            undo.extend(frame.undo.into_iter().rev());
            if frame.kind == FrameKind::Transaction {
                return Ok(undo);
            }
        }
    }

    /// Roll back to the innermost savepoint and discard it.
    pub fn rollback_savepoint(&mut self) -> Result<Vec<U>> {
        let frame = self.pop_savepoint()?;
        Ok(frame.undo.into_iter().rev().collect())
    }

    /// Keep the innermost savepoint's writes as part of the parent frame.
    pub fn release_savepoint(&mut self) -> Result<()> {
        let mut frame = self.pop_savepoint()?;
        if let Some(parent) = self.frames.last_mut() {
            parent.undo.append(&mut frame.undo);
        }
        Ok(())
    }

    fn pop_savepoint(&mut self) -> Result<Frame<U>> {
        match self.frames.last() {
            Some(frame) if frame.kind == FrameKind::Savepoint => {}
            _ => {
                return Err(EngineError::Transaction(
                    "No active savepoint".into(),
                ))
            }
        }
        self.frames
            .pop()
            .ok_or_else(|| EngineError::Transaction("No active savepoint".into()))
    }
}
