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

//! Conditional Frequency Index
//!
//! Counts `(condition, sample)` observations in two files:
//!
//! - `<path>`: one record per pair, keyed by a compound key
//! - `<path>.cDB`: a [`FrequencyTable`] of per-condition totals
//!
//! Compound keys start with the length-prefixed condition, so all samples of
//! one condition sit in a single contiguous range of the store's ordered key
//! directory. Grouped retrieval is a prefix scan over that range.

use crate::codec::{self, Token};
use crate::error::FreqResult;
use crate::freqdist::FrequencyDistribution;
use crate::store::{AccessMode, TableOptions, append_suffix, backup_existing};
use crate::table::{CountTable, FrequencyTable};
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::info;

/// Suffix of the per-condition totals file
pub const CONDITION_SUFFIX: &str = ".cDB";

/// Durable counts of samples grouped by condition
pub struct ConditionalFrequencyIndex<C: Token, S: Token> {
    path: PathBuf,
    pairs: CountTable,
    conditions: FrequencyTable<C>,
    _samples: PhantomData<S>,
}

impl<C: Token, S: Token> ConditionalFrequencyIndex<C, S> {
    /// Open or create the index at `path` and its companion `<path>.cDB`
    pub fn open<P: AsRef<Path>>(path: P, options: &TableOptions) -> FreqResult<Self> {
        let path = path.as_ref();
        let companion = append_suffix(path, CONDITION_SUFFIX);

        if options.reset_existing && options.mode.is_writable() {
            backup_existing(path)?;
            backup_existing(&companion)?;
        }
        let options = TableOptions {
            reset_existing: false,
            ..options.clone()
        };

        let pairs = CountTable::open(path, &options)?;
        let conditions = FrequencyTable::open(&companion, &options)?;

        info!("Opened conditional index {} ({:?})", path.display(), options.mode);
        Ok(Self {
            path: path.to_path_buf(),
            pairs,
            conditions,
            _samples: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.pairs.mode()
    }

    /// Add `count` observations of `sample` under `condition`
    ///
    /// Updates the pair count first, so an underflowing negative count leaves
    /// both files untouched. Dropped silently on read-only indexes.
    pub fn increment<D: Into<BigInt>>(&mut self, condition: &C, sample: &S, count: D) -> FreqResult<()> {
        let count = count.into();
        if count.is_zero() || !self.mode().is_writable() || self.pairs.is_closed() {
            return Ok(());
        }

        let key = codec::compound_key(condition, sample)?;
        if self.pairs.increment(&key, &count)?.is_none() {
            return Ok(());
        }
        self.conditions.increment(condition, count)?;
        Ok(())
    }

    /// Record each `(condition, sample)` pair once
    pub fn update<I: IntoIterator<Item = (C, S)>>(&mut self, observations: I) -> FreqResult<()> {
        for (condition, sample) in observations {
            self.increment(&condition, &sample, 1)?;
        }
        Ok(())
    }

    /// Record a count per `(condition, sample)` pair
    pub fn update_counts<I, D>(&mut self, observations: I) -> FreqResult<()>
    where
        I: IntoIterator<Item = ((C, S), D)>,
        D: Into<BigInt>,
    {
        for ((condition, sample), count) in observations {
            self.increment(&condition, &sample, count)?;
        }
        Ok(())
    }

    /// Count of `sample` under `condition`
    pub fn get(&self, condition: &C, sample: &S) -> FreqResult<BigUint> {
        let key = codec::compound_key(condition, sample)?;
        Ok(self.pairs.get(&key)?.unwrap_or_default())
    }

    /// Total observations recorded under `condition`
    pub fn condition_total(&self, condition: &C) -> FreqResult<BigUint> {
        self.conditions.get(condition)
    }

    /// Fresh in-memory distribution of every sample seen under `condition`
    pub fn frequency_distribution_for(&self, condition: &C) -> FreqResult<FrequencyDistribution<S>> {
        let prefix = codec::condition_prefix(condition)?;
        let mut dist = FrequencyDistribution::new();
        self.pairs.for_each_with_prefix(&prefix, |key, count| {
            dist.increment(codec::decode_token(&key[prefix.len()..])?, count);
            Ok(())
        })?;
        Ok(dist)
    }

    /// Same result as [`Self::frequency_distribution_for`], found by scanning every pair record
    pub fn scan_frequency_distribution_for(&self, condition: &C) -> FreqResult<FrequencyDistribution<S>> {
        let prefix = codec::condition_prefix(condition)?;
        let mut dist: FrequencyDistribution<S> = FrequencyDistribution::new();
        self.pairs.for_each_count(|key, count| {
            if let Some(sample) = key.strip_prefix(prefix.as_slice()) {
                dist.increment(codec::decode_token(sample)?, count);
            }
            Ok(())
        })?;
        Ok(dist)
    }

    /// Samples with a positive count under `condition`, in order
    pub fn samples_for(&self, condition: &C) -> FreqResult<Vec<S>> {
        let prefix = codec::condition_prefix(condition)?;
        let mut samples = Vec::new();
        self.pairs.for_each_with_prefix(&prefix, |key, count| {
            if !count.is_zero() {
                samples.push(codec::decode_token(&key[prefix.len()..])?);
            }
            Ok(())
        })?;
        samples.sort();
        Ok(samples)
    }

    /// Conditions recorded in the per-condition totals file
    pub fn conditions(&self) -> FreqResult<BTreeSet<C>> {
        Ok(self.conditions.keys()?.into_iter().collect())
    }

    pub fn contains_condition(&self, condition: &C) -> FreqResult<bool> {
        self.conditions.contains(condition)
    }

    /// Number of conditions recorded
    pub fn condition_count(&self) -> FreqResult<usize> {
        Ok(self.conditions()?.len())
    }

    /// Grand total of all pair counts, rebuilt condition by condition
    ///
    /// Expensive: meant for diagnostics.
    pub fn total_count(&self) -> FreqResult<BigUint> {
        let mut total = BigUint::zero();
        for condition in self.conditions()? {
            total += self.frequency_distribution_for(&condition)?.total();
        }
        Ok(total)
    }

    pub fn flush(&mut self) -> FreqResult<()> {
        self.pairs.flush()?;
        self.conditions.flush()
    }

    /// Compact both files. Returns whether either was rewritten.
    pub fn compact(&mut self) -> FreqResult<bool> {
        let pairs = self.pairs.compact()?;
        let conditions = self.conditions.compact()?;
        Ok(pairs || conditions)
    }

    /// Pick up observations appended by another writer (read-only indexes)
    pub fn refresh(&mut self) -> FreqResult<()> {
        self.pairs.refresh()?;
        self.conditions.refresh()
    }

    /// Close both files. Idempotent.
    pub fn close(&mut self) -> FreqResult<()> {
        self.pairs.close()?;
        self.conditions.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pair(c: &str, s: &str) -> (String, String) {
        (c.to_string(), s.to_string())
    }

    fn open(dir: &TempDir) -> ConditionalFrequencyIndex<String, String> {
        ConditionalFrequencyIndex::open(dir.path().join("bigrams.db"), &TableOptions::read_write()).unwrap()
    }

    #[test]
    fn test_prefix_sharing_conditions_stay_apart() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = open(&temp_dir);
        index.update_counts([(pair("a", "x"), 3), (pair("ab", "y"), 2)]).unwrap();

        let dist = index.frequency_distribution_for(&"a".to_string()).unwrap();
        assert_eq!(dist.distinct_count(), 1);
        assert_eq!(dist.get(&"x".to_string()), BigUint::from(3u8));
        assert!(!dist.contains(&"y".to_string()));

        let scanned = index.scan_frequency_distribution_for(&"a".to_string()).unwrap();
        assert_eq!(scanned, dist);
    }

    #[test]
    fn test_separator_inside_tokens() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = open(&temp_dir);
        index.update([pair("a", "b_x"), pair("a_b", "x")]).unwrap();

        let a = index.frequency_distribution_for(&"a".to_string()).unwrap();
        let a_b = index.frequency_distribution_for(&"a_b".to_string()).unwrap();
        assert_eq!(index.samples_for(&"a".to_string()).unwrap(), vec!["b_x".to_string()]);
        assert_eq!(a.total(), &BigUint::from(1u8));
        assert_eq!(a_b.get(&"x".to_string()), BigUint::from(1u8));
    }

    #[test]
    fn test_condition_totals_track_pairs() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = open(&temp_dir);
        index.update([pair("the", "cat"), pair("the", "dog"), pair("a", "cat")]).unwrap();
        index.increment(&"the".to_string(), &"cat".to_string(), 4).unwrap();

        assert_eq!(index.condition_total(&"the".to_string()).unwrap(), BigUint::from(6u8));
        assert_eq!(index.get(&"the".to_string(), &"cat".to_string()).unwrap(), BigUint::from(5u8));
        assert_eq!(index.total_count().unwrap(), BigUint::from(7u8));
        assert!(index.contains_condition(&"a".to_string()).unwrap());
        assert!(!index.contains_condition(&"an".to_string()).unwrap());
    }

    #[test]
    fn test_samples_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut index = open(&temp_dir);
            index.update([pair("x", "1"), pair("x", "2"), pair("y", "1")]).unwrap();
            index.close().unwrap();
        }

        let path = temp_dir.path().join("bigrams.db");
        let index: ConditionalFrequencyIndex<String, String> = ConditionalFrequencyIndex::open(&path, &TableOptions::read_only()).unwrap();
        assert_eq!(index.samples_for(&"x".to_string()).unwrap(), vec!["1".to_string(), "2".to_string()]);
        assert_eq!(index.condition_count().unwrap(), 2);
    }

    #[test]
    fn test_reset_backs_up_both_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bigrams.db");
        {
            let mut index = open(&temp_dir);
            index.update([pair("x", "1")]).unwrap();
            index.close().unwrap();
        }

        let index: ConditionalFrequencyIndex<String, String> = ConditionalFrequencyIndex::open(&path, &TableOptions::reset()).unwrap();
        assert!(index.conditions().unwrap().is_empty());
        assert!(append_suffix(&path, ".bak0").exists());
        assert!(append_suffix(&path, ".cDB.bak0").exists());
    }

    #[test]
    fn test_underflow_leaves_condition_total_alone() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = open(&temp_dir);
        index.increment(&"c".to_string(), &"s".to_string(), 1).unwrap();

        assert!(index.increment(&"c".to_string(), &"s".to_string(), -2).is_err());
        assert_eq!(index.condition_total(&"c".to_string()).unwrap(), BigUint::from(1u8));
        assert_eq!(index.get(&"c".to_string(), &"s".to_string()).unwrap(), BigUint::from(1u8));
    }

    #[test]
    fn test_prefix_retrieval_matches_scan_after_writes() {
        let temp_dir = TempDir::new().unwrap();
        let mut index = open(&temp_dir);
        index.update([pair("b", "2"), pair("a", "9"), pair("b", "1"), pair("c", "1"), pair("b", "2")]).unwrap();
        index.increment(&"b".to_string(), &"1".to_string(), -1).unwrap();

        let b = index.frequency_distribution_for(&"b".to_string()).unwrap();
        assert_eq!(b, index.scan_frequency_distribution_for(&"b".to_string()).unwrap());
        assert_eq!(b.get(&"2".to_string()), BigUint::from(2u8));
        assert_eq!(index.samples_for(&"b".to_string()).unwrap(), vec!["2".to_string()]);
        assert!(index.samples_for(&"z".to_string()).unwrap().is_empty());
        assert!(index.frequency_distribution_for(&"z".to_string()).unwrap().is_empty());
    }
}
