//! File-backed subscription store.
//!
//! Layout of a store directory:
//!
//! ```text
//! <path>/LOCK               exclusive lock held while the store is open
//! <path>/subscriptions.bin  the table, created by setup()
//! ```
//!
//! The table file is `magic | version | u64 body length | MessagePack body |
//! crc32(body)`. It is rewritten through a temporary file and a rename on
//! every write made outside a transaction and on every outermost commit, so
//! a crash leaves either the previous or the new table on disk.

use crate::error::{EngineError, Result};
use crate::store::journal::Journal;
use crate::store::table::{undo_row, RowUndo, SubscriptionTable};
use crate::store::{SubscriptionCriteria, SubscriptionStore};
use crate::subscriptions::{Subscription, SubscriptionError, SubscriptionStatus, Subscriptions};
use crate::types::{SequenceNumber, SubscriptionId};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the subscription table file.
const TABLE_MAGIC: &[u8; 4] = b"SUB\0";

/// Current table file format version.
const TABLE_VERSION: u8 = 1;

const TABLE_FILE: &str = "subscriptions.bin";

/// Configuration for a [`FileSubscriptionStore`].
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Directory holding the lock and table files.
    pub path: PathBuf,
    /// Create the directory if it does not exist.
    pub create_if_missing: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./subscriptions"),
            create_if_missing: true,
        }
    }
}

impl FileStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

struct FileState {
    table: Option<SubscriptionTable>,
    journal: Journal<RowUndo>,
}

/// [`SubscriptionStore`] persisted to a single table file.
pub struct FileSubscriptionStore {
    table_path: PathBuf,
    _lock_file: File,
    state: Mutex<FileState>,
}

impl FileSubscriptionStore {
    /// Open the store at `path` with default settings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(FileStoreConfig::new(path))
    }

    pub fn open_with_config(config: FileStoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(EngineError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let lock_file = Self::acquire_lock(&config.path)?;
        let table_path = config.path.join(TABLE_FILE);
        let table = if table_path.exists() {
            Some(Self::read_table(&table_path)?)
        } else {
            None
        };

        tracing::debug!(
            path = %config.path.display(),
            schema_present = table.is_some(),
            "Opened subscription store"
        );

        Ok(Self {
            table_path,
            _lock_file: lock_file,
            state: Mutex::new(FileState {
                table,
                journal: Journal::default(),
            }),
        })
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| EngineError::Locked)?;
        Ok(lock_file)
    }

    /// Journal a write made inside a transaction, or persist it right away.
    /// A write that cannot be persisted is undone in memory.
    fn write_through(&self, state: &mut FileState, undo: RowUndo) -> Result<()> {
        if state.journal.in_transaction() {
            state.journal.record(undo);
            return Ok(());
        }
        if let Err(e) = self.persist(state) {
            undo_row(&mut state.table, undo);
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, state: &FileState) -> Result<()> {
        match &state.table {
            Some(table) => Self::write_table(&self.table_path, table),
            None => Ok(()),
        }
    }

    fn write_table(path: &Path, table: &SubscriptionTable) -> Result<()> {
        let body = rmp_serde::to_vec_named(table)?;
        let checksum = crc32fast::hash(&body);

        let tmp_path = path.with_extension("bin.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(TABLE_MAGIC)?;
            file.write_all(&[TABLE_VERSION])?;
            file.write_all(&(body.len() as u64).to_le_bytes())?;
            file.write_all(&body)?;
            file.write_all(&checksum.to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn read_table(path: &Path) -> Result<SubscriptionTable> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != TABLE_MAGIC {
            return Err(EngineError::InvalidFormat(
                "Invalid subscription table magic".into(),
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != TABLE_VERSION {
            return Err(EngineError::InvalidFormat(format!(
                "Unsupported subscription table version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut body = vec![0u8; len];
        file.read_exact(&mut body)?;

        let mut crc_bytes = [0u8; 4];
        file.read_exact(&mut crc_bytes)?;
        let expected = u32::from_le_bytes(crc_bytes);
        let got = crc32fast::hash(&body);
        if expected != got {
            return Err(EngineError::ChecksumMismatch { expected, got });
        }

        Ok(rmp_serde::from_slice(&body)?)
    }
}

impl SubscriptionStore for FileSubscriptionStore {
    fn setup(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.table.is_none() {
            state.table = Some(SubscriptionTable::default());
            self.write_through(&mut state, RowUndo::SchemaCreated)?;
            tracing::info!(path = %self.table_path.display(), "Created subscription table");
        }
        Ok(())
    }

    fn find_by_criteria_for_update(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions> {
        let state = self.state.lock();
        state
            .table
            .as_ref()
            .map(|table| table.find(criteria))
            .ok_or(EngineError::SchemaNotFound)
    }

    fn add(&self, subscription: Subscription) -> Result<()> {
        let mut state = self.state.lock();
        let undo = state
            .table
            .as_mut()
            .ok_or(EngineError::SchemaNotFound)?
            .add(subscription)?;
        self.write_through(&mut state, undo)
    }

    fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let undo = state
            .table
            .as_mut()
            .ok_or(EngineError::SchemaNotFound)?
            .update(id, status, position, error)?;
        self.write_through(&mut state, undo)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.state.lock().journal.begin();
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        // the frame stays open until the table is on disk, so a failed
        // write can still be rolled back
        if state.journal.commits_outermost() {
            self.persist(&state)?;
        }
        state.journal.commit()?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        for undo in state.journal.rollback()? {
            undo_row(&mut state.table, undo);
        }
        Ok(())
    }

    fn create_savepoint(&self) -> Result<()> {
        self.state.lock().journal.create_savepoint()
    }

    fn rollback_savepoint(&self) -> Result<()> {
        let mut state = self.state.lock();
        for undo in state.journal.rollback_savepoint()? {
            undo_row(&mut state.table, undo);
        }
        Ok(())
    }

    fn release_savepoint(&self) -> Result<()> {
        self.state.lock().journal.release_savepoint()
    }
}
