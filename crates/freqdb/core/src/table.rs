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

//! Persistent Frequency Tables
//!
//! A [`FrequencyTable`] maps samples to non-negative counts in a single store
//! file. Increments are read-modify-write pairs against the store and assume
//! one writer per file. The table total is memoized under a reserved key but
//! recomputed by a full scan every time it is asked for.

use crate::codec::{self, TOTAL_KEY, Token};
use crate::error::{FreqError, FreqResult};
use crate::freqdist::{FrequencyDistribution, count_to_f64};
use crate::store::{AccessMode, KvStore, LogStore, StoreConfig, StoreOptions, TableOptions, backup_existing};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Counts keyed by raw store keys
///
/// Shared by [`FrequencyTable`] and the compound-key side of the conditional
/// index. A closed table reads as empty and ignores writes.
pub(crate) struct CountTable<S: KvStore = LogStore> {
    path: PathBuf,
    mode: AccessMode,
    store: Option<S>,
    config: StoreConfig,
}

impl CountTable<LogStore> {
    pub(crate) fn open(path: &Path, options: &TableOptions) -> FreqResult<Self> {
        if options.reset_existing && options.mode.is_writable() {
            backup_existing(path)?;
        }
        let store = LogStore::open(path, StoreOptions::for_mode(options.mode))?;
        Ok(Self::with_store(path, store, options))
    }
}

impl<S: KvStore> CountTable<S> {
    pub(crate) fn with_store(path: &Path, store: S, options: &TableOptions) -> Self {
        Self {
            path: path.to_path_buf(),
            mode: options.mode,
            store: Some(store),
            config: options.store.clone(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn mode(&self) -> AccessMode {
        self.mode
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.store.is_none()
    }

    /// Store to write through, or `None` when writes must be dropped
    fn writable_store(&mut self) -> Option<&mut S> {
        if !self.mode.is_writable() {
            debug!("Ignoring write to read-only table {}", self.path.display());
            return None;
        }
        self.store.as_mut()
    }

    pub(crate) fn get(&self, key: &[u8]) -> FreqResult<Option<BigUint>> {
        match self.store.as_ref() {
            Some(store) => Ok(store.get(key)?.map(|bytes| codec::decode_count(&bytes))),
            None => Ok(None),
        }
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.store.as_ref().is_some_and(|store| store.contains(key))
    }

    pub(crate) fn set(&mut self, key: &[u8], value: &BigUint) -> FreqResult<()> {
        if let Some(store) = self.writable_store() {
            store.put(key, &codec::encode_count(value))?;
            self.compact_if_needed()?;
        }
        Ok(())
    }

    /// Add `delta` to the count under `key`. Returns the new count, or `None` if the write was dropped.
    pub(crate) fn increment(&mut self, key: &[u8], delta: &BigInt) -> FreqResult<Option<BigUint>> {
        if delta.is_zero() {
            return self.get(key);
        }
        let Some(store) = self.writable_store() else {
            return Ok(None);
        };

        let current = store.get(key)?.map(|bytes| codec::decode_count(&bytes)).unwrap_or_default();
        let updated = BigInt::from_biguint(Sign::Plus, current.clone()) + delta;
        let updated = updated.to_biguint().ok_or_else(|| FreqError::Underflow {
            current: current.to_string(),
            delta: delta.to_string(),
        })?;

        store.put(key, &codec::encode_count(&updated))?;
        self.compact_if_needed()?;
        Ok(Some(updated))
    }

    /// Compact once superseded records make up more than `compact_ratio` of a large enough file
    ///
    /// Runs after every write, so the file stays proportional to the number of
    /// live keys rather than the number of writes.
    fn compact_if_needed(&mut self) -> FreqResult<()> {
        let (ratio, min_records) = (self.config.compact_ratio, self.config.compact_min_records);
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };

        let stats = store.stats();
        if ratio > 0.0 && stats.live_records + stats.dead_records >= min_records && stats.dead_ratio() > ratio {
            store.compact()?;
        }
        Ok(())
    }

    /// Visit every record except the reserved total key
    pub(crate) fn for_each_count<F>(&self, visit: F) -> FreqResult<()>
    where
        F: FnMut(&[u8], BigUint) -> FreqResult<()>,
    {
        self.for_each_with_prefix(&[], visit)
    }

    /// Visit every record whose key starts with `prefix`, except the reserved total key
    pub(crate) fn for_each_with_prefix<F>(&self, prefix: &[u8], mut visit: F) -> FreqResult<()>
    where
        F: FnMut(&[u8], BigUint) -> FreqResult<()>,
    {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        for record in store.prefix_cursor(prefix)? {
            let (key, value) = record?;
            if key == TOTAL_KEY {
                continue;
            }
            visit(&key, codec::decode_count(&value))?;
        }
        Ok(())
    }

    /// Full-scan sum of all counts, memoized under the reserved key
    pub(crate) fn total(&mut self) -> FreqResult<BigUint> {
        let mut total = BigUint::zero();
        self.for_each_count(|_, count| {
            total += count;
            Ok(())
        })?;

        if self.mode.is_writable() {
            if let Some(store) = self.store.as_mut() {
                store.put(TOTAL_KEY, &codec::encode_count(&total))?;
                self.compact_if_needed()?;
            }
        }
        Ok(total)
    }

    /// Number of records with a positive count
    pub(crate) fn distinct_count(&self) -> FreqResult<usize> {
        let mut distinct = 0usize;
        self.for_each_count(|_, count| {
            if !count.is_zero() {
                distinct += 1;
            }
            Ok(())
        })?;
        Ok(distinct)
    }

    pub(crate) fn flush(&mut self) -> FreqResult<()> {
        if !self.mode.is_writable() {
            return Ok(());
        }
        match self.store.as_mut() {
            Some(store) => store.sync(),
            None => Ok(()),
        }
    }

    pub(crate) fn compact(&mut self) -> FreqResult<bool> {
        match self.writable_store() {
            Some(store) => store.compact(),
            None => Ok(false),
        }
    }

    pub(crate) fn refresh(&mut self) -> FreqResult<()> {
        match self.store.as_mut() {
            Some(store) => store.refresh(),
            None => Ok(()),
        }
    }

    pub(crate) fn close(&mut self) -> FreqResult<()> {
        if let Some(mut store) = self.store.take() {
            store.close()?;
        }
        Ok(())
    }
}

/// Durable sample -> count mapping backed by one store file
pub struct FrequencyTable<K, S: KvStore = LogStore> {
    table: CountTable<S>,
    _samples: PhantomData<fn() -> K>,
}

impl<K: Token> FrequencyTable<K, LogStore> {
    /// Open or create the table at `path`
    ///
    /// Read-only tables never create a file; opening a missing file read-only
    /// fails with the store's I/O error.
    pub fn open<P: AsRef<Path>>(path: P, options: &TableOptions) -> FreqResult<Self> {
        let path = path.as_ref();
        let table = CountTable::open(path, options)?;
        info!("Opened frequency table {} ({:?})", path.display(), options.mode);
        Ok(Self {
            table,
            _samples: PhantomData,
        })
    }
}

impl<K: Token, S: KvStore> FrequencyTable<K, S> {
    /// Wrap an already opened store
    pub fn with_store<P: AsRef<Path>>(path: P, store: S, options: &TableOptions) -> Self {
        Self {
            table: CountTable::with_store(path.as_ref(), store, options),
            _samples: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        self.table.path()
    }

    pub fn mode(&self) -> AccessMode {
        self.table.mode()
    }

    pub fn is_closed(&self) -> bool {
        self.table.is_closed()
    }

    /// Add `delta` to the count of `sample`. Dropped silently on read-only tables.
    ///
    /// A negative delta that would take the count below zero fails with
    /// [`FreqError::Underflow`] and writes nothing.
    pub fn increment<D: Into<BigInt>>(&mut self, sample: &K, delta: D) -> FreqResult<()> {
        let key = codec::sample_key(sample)?;
        self.table.increment(&key, &delta.into())?;
        Ok(())
    }

    /// Overwrite the count of `sample`
    pub fn set<V: Into<BigUint>>(&mut self, sample: &K, value: V) -> FreqResult<()> {
        let key = codec::sample_key(sample)?;
        self.table.set(&key, &value.into())
    }

    /// Count of `sample`, 0 when absent
    pub fn get(&self, sample: &K) -> FreqResult<BigUint> {
        self.get_or(sample, BigUint::zero())
    }

    /// Count of `sample`, `default` when absent
    pub fn get_or(&self, sample: &K, default: BigUint) -> FreqResult<BigUint> {
        let key = codec::sample_key(sample)?;
        Ok(self.table.get(&key)?.unwrap_or(default))
    }

    pub fn contains(&self, sample: &K) -> FreqResult<bool> {
        Ok(self.table.contains(&codec::sample_key(sample)?))
    }

    /// Add each sample once
    pub fn update<I: IntoIterator<Item = K>>(&mut self, samples: I) -> FreqResult<()> {
        for sample in samples {
            self.increment(&sample, 1)?;
        }
        Ok(())
    }

    /// Add a count per sample
    pub fn update_counts<I, D>(&mut self, counts: I) -> FreqResult<()>
    where
        I: IntoIterator<Item = (K, D)>,
        D: Into<BigInt>,
    {
        for (sample, count) in counts {
            self.increment(&sample, count)?;
        }
        Ok(())
    }

    /// Recompute the table total by a full scan and persist it under the reserved key
    pub fn total(&mut self) -> FreqResult<BigUint> {
        self.table.total()
    }

    /// Number of samples with a positive count
    pub fn distinct_count(&self) -> FreqResult<usize> {
        self.table.distinct_count()
    }

    /// `get(sample) / total()`, 0 for an empty table
    pub fn frequency(&mut self, sample: &K) -> FreqResult<f64> {
        let total = self.total()?;
        if total.is_zero() {
            return Ok(0.0);
        }
        Ok(count_to_f64(&self.get(sample)?) / count_to_f64(&total))
    }

    /// All stored samples in store order
    pub fn keys(&self) -> FreqResult<Vec<K>> {
        let mut keys: Vec<K> = Vec::new();
        self.table.for_each_count(|key, _| {
            if let Some(sample) = codec::decode_sample_key(key)? {
                keys.push(sample);
            }
            Ok(())
        })?;
        Ok(keys)
    }

    /// Samples with their counts, highest count first (ties in sample order)
    pub fn keys_by_frequency(&self) -> FreqResult<Vec<(K, BigUint)>> {
        let mut entries: Vec<(K, BigUint)> = Vec::new();
        self.table.for_each_count(|key, count| {
            if let Some(sample) = codec::decode_sample_key(key)? {
                entries.push((sample, count));
            }
            Ok(())
        })?;
        entries.sort_by(|(sa, ca), (sb, cb)| cb.cmp(ca).then_with(|| sa.cmp(sb)));
        Ok(entries)
    }

    /// Load every record into an in-memory distribution
    pub fn to_distribution(&self) -> FreqResult<FrequencyDistribution<K>> {
        let mut dist: FrequencyDistribution<K> = FrequencyDistribution::new();
        self.table.for_each_count(|key, count| {
            if let Some(sample) = codec::decode_sample_key(key)? {
                dist.increment(sample, count);
            }
            Ok(())
        })?;
        Ok(dist)
    }

    /// Force all writes to disk
    pub fn flush(&mut self) -> FreqResult<()> {
        self.table.flush()
    }

    /// Rewrite the file without superseded records
    pub fn compact(&mut self) -> FreqResult<bool> {
        self.table.compact()
    }

    /// Pick up records appended by another writer (read-only tables)
    pub fn refresh(&mut self) -> FreqResult<()> {
        self.table.refresh()
    }

    /// Release the store handle. Idempotent.
    pub fn close(&mut self) -> FreqResult<()> {
        self.table.close()
    }
}
