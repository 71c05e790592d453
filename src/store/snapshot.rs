//! JSON snapshot persistence for the in-memory store
//!
//! Provides save/load for the whole dataset: writes go to a temporary
//! file followed by an atomic rename, with optional rotating backups of
//! the previous snapshot.

use crate::store::memory::{MemoryStore, StoreData};
use crate::store::StoreError;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

/// Snapshot configuration
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub data_dir: PathBuf,
    pub file_name: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".wallet_data"),
            file_name: "store.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// Store snapshot manager
pub struct Snapshotter {
    config: SnapshotConfig,
}

impl Snapshotter {
    /// Create a snapshot manager, ensuring the data directory exists
    pub fn new(config: SnapshotConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self, StoreError> {
        Self::new(SnapshotConfig::default())
    }

    fn snapshot_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.file_name)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.file_name, index))
    }

    /// Save the store contents to disk
    pub fn save(&self, store: &MemoryStore) -> Result<(), StoreError> {
        let path = self.snapshot_path();

        if self.config.backup_enabled && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        // Write to temporary file first, then atomic rename
        let temp_path = self.config.data_dir.join("store.tmp");
        let file = fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &store.export())?;
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    /// Load a store from disk
    pub fn load(&self) -> Result<MemoryStore, StoreError> {
        let path = self.snapshot_path();
        let file = fs::File::open(&path)?;
        let reader = BufReader::new(file);
        let data: StoreData = serde_json::from_reader(reader)?;
        Ok(MemoryStore::from_data(data))
    }

    /// Check if a saved snapshot exists
    pub fn exists(&self) -> bool {
        self.snapshot_path().exists()
    }

    fn rotate_backups(&self) -> Result<(), StoreError> {
        if self.config.max_backups == 0 {
            return Ok(());
        }

        // Drop the oldest, shift the rest up one slot
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (0..self.config.max_backups.saturating_sub(1)).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }

        Ok(())
    }
}
