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

// In-memory store
// Same contract as the log store without a backing file. Nothing is ever
// superseded on disk, so refresh, compaction and stats use the trait defaults.

use super::{KvStore, StoreOptions};
use crate::error::{FreqError, FreqResult};
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::ops::Bound;
use std::path::{Path, PathBuf};

/// Ordered key-value store held entirely in memory
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    records: Option<BTreeMap<Vec<u8>, Vec<u8>>>,
    read_only: bool,
}

impl MemoryStore {
    /// Empty writable store
    pub fn new() -> Self {
        Self {
            path: PathBuf::new(),
            records: Some(BTreeMap::new()),
            read_only: false,
        }
    }

    /// Store pre-filled with `records`, opened with `options`
    pub fn with_records<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(records: I, options: StoreOptions) -> Self {
        Self {
            path: PathBuf::new(),
            records: Some(records.into_iter().collect()),
            read_only: options.read_only,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.records.is_none()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    type Cursor<'a> = MemoryCursor<'a>;

    /// `path` only labels the store in error messages
    fn open(path: &Path, options: StoreOptions) -> FreqResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            records: Some(BTreeMap::new()),
            read_only: options.read_only,
        })
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> FreqResult<()> {
        if self.read_only {
            return Err(FreqError::InvalidOperation(format!("store {} is read-only", self.path.display())));
        }
        let records = self
            .records
            .as_mut()
            .ok_or_else(|| FreqError::InvalidOperation(format!("store {} is closed", self.path.display())))?;
        records.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> FreqResult<Option<Vec<u8>>> {
        Ok(self.records.as_ref().and_then(|records| records.get(key).cloned()))
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.records.as_ref().is_some_and(|records| records.contains_key(key))
    }

    fn cursor(&self) -> FreqResult<MemoryCursor<'_>> {
        self.prefix_cursor(&[])
    }

    fn prefix_cursor(&self, prefix: &[u8]) -> FreqResult<MemoryCursor<'_>> {
        Ok(MemoryCursor {
            range: self.records.as_ref().map(|records| records.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))),
            prefix: prefix.to_vec(),
        })
    }

    fn len(&self) -> usize {
        self.records.as_ref().map_or(0, BTreeMap::len)
    }

    fn sync(&mut self) -> FreqResult<()> {
        Ok(())
    }

    fn close(&mut self) -> FreqResult<()> {
        self.records = None;
        Ok(())
    }
}

/// Cursor over the records of a [`MemoryStore`], in key order
pub struct MemoryCursor<'a> {
    range: Option<btree_map::Range<'a, Vec<u8>, Vec<u8>>>,
    prefix: Vec<u8>,
}

impl Iterator for MemoryCursor<'_> {
    type Item = FreqResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.range.as_mut()?.next()?;
        if !key.starts_with(&self.prefix) {
            self.range = None;
            return None;
        }
        Some(Ok((key.clone(), value.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccessMode;

    #[test]
    fn test_prefix_cursor_stops_at_prefix_end() {
        let mut store = MemoryStore::new();
        store.put(b"b", b"4").unwrap();
        store.put(b"a2", b"2").unwrap();
        store.put(b"a1", b"1").unwrap();
        store.put(b"a", b"0").unwrap();

        let keys: Vec<Vec<u8>> = store.prefix_cursor(b"a").unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"a1".to_vec(), b"a2".to_vec()]);
        assert_eq!(store.cursor().unwrap().count(), 4);
        assert_eq!(store.stats().dead_records, 0);
        assert!(!store.compact().unwrap());
    }

    #[test]
    fn test_read_only_and_closed() {
        let mut store = MemoryStore::with_records([(b"k".to_vec(), b"v".to_vec())], StoreOptions::for_mode(AccessMode::ReadOnly));
        assert!(matches!(store.put(b"k", b"w"), Err(FreqError::InvalidOperation(_))));
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));

        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(store.is_empty());
        assert_eq!(store.get(b"k").unwrap(), None);
        assert_eq!(store.cursor().unwrap().count(), 0);
    }
}
