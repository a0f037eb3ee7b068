// FreqDB
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Key-Value Store Layer
//!
//! The frequency tables only need point lookups, point writes, a scan of every
//! record and a scan of the records sharing a key prefix. [`KvStore`] captures
//! that contract. [`LogStore`] provides it with an append-only data file and an
//! in-memory ordered key directory; [`MemoryStore`] keeps everything in memory.

pub mod backup;
pub mod log_store;
pub mod memory_store;

pub use backup::{append_suffix, backup_existing, next_backup_path};
pub use log_store::{LogCursor, LogStore};
pub use memory_store::{MemoryCursor, MemoryStore};

use crate::error::FreqResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a table or store is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Reads only. Never creates a file and silently drops writes.
    ReadOnly,
    /// Reads and writes, creating the file when missing
    #[default]
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        self == AccessMode::ReadWrite
    }
}

/// Options handed to [`KvStore::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Create the backing file when it does not exist
    pub create_if_missing: bool,
    /// Open without write access
    pub read_only: bool,
    /// Allow a read-only handle to observe records appended by another writer
    pub allow_dirty_reads: bool,
}

impl StoreOptions {
    pub fn for_mode(mode: AccessMode) -> Self {
        Self {
            create_if_missing: mode.is_writable(),
            read_only: !mode.is_writable(),
            allow_dirty_reads: true,
        }
    }
}

/// Store maintenance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Dead-record ratio above which writes compact the data file (0 disables)
    pub compact_ratio: f64,
    /// Minimum number of records in the file before auto-compaction is considered
    pub compact_min_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compact_ratio: 0.5,
            compact_min_records: 4096,
        }
    }
}

/// Options for opening a frequency table or conditional index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    pub mode: AccessMode,
    /// Move existing files aside to `<path>.bak<N>` before opening
    pub reset_existing: bool,
    pub store: StoreConfig,
}

impl TableOptions {
    pub fn read_only() -> Self {
        Self {
            mode: AccessMode::ReadOnly,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self::default()
    }

    /// Read-write options that back up any existing files first
    pub fn reset() -> Self {
        Self {
            reset_existing: true,
            ..Self::default()
        }
    }

    pub fn with_store_config(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

/// Record counts reported by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Records reachable through the directory
    pub live_records: usize,
    /// Superseded records still occupying space in the file
    pub dead_records: usize,
}

impl StoreStats {
    pub fn dead_ratio(&self) -> f64 {
        let total = self.live_records + self.dead_records;
        if total == 0 { 0.0 } else { self.dead_records as f64 / total as f64 }
    }
}

/// A key-value store with point access, full scans and prefix scans
pub trait KvStore: Sized {
    /// Iterator over live `(key, value)` pairs, in unspecified order
    type Cursor<'a>: Iterator<Item = FreqResult<(Vec<u8>, Vec<u8>)>>
    where
        Self: 'a;

    /// Open the store at `path`
    fn open(path: &Path, options: StoreOptions) -> FreqResult<Self>;

    /// Write `value` under `key`, replacing any previous value
    fn put(&mut self, key: &[u8], value: &[u8]) -> FreqResult<()>;

    /// Read the value stored under `key`
    fn get(&self, key: &[u8]) -> FreqResult<Option<Vec<u8>>>;

    /// Whether `key` has a value
    fn contains(&self, key: &[u8]) -> bool;

    /// Sequential cursor over all records
    fn cursor(&self) -> FreqResult<Self::Cursor<'_>>;

    /// Cursor over the records whose key starts with `prefix`
    fn prefix_cursor(&self, prefix: &[u8]) -> FreqResult<Self::Cursor<'_>>;

    /// Number of live keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force all writes so far to durable storage
    fn sync(&mut self) -> FreqResult<()>;

    /// Release the handle. Calling it twice is a no-op.
    fn close(&mut self) -> FreqResult<()>;

    /// Pick up records appended by another writer since open
    fn refresh(&mut self) -> FreqResult<()> {
        Ok(())
    }

    /// Reclaim space held by superseded records. Returns whether anything was rewritten.
    fn compact(&mut self) -> FreqResult<bool> {
        Ok(false)
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            live_records: self.len(),
            dead_records: 0,
        }
    }
}
