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

//! Conditional Probability Cache
//!
//! Builds a probability distribution per condition only when it is asked
//! for, and decides per condition how long to hold on to it:
//!
//! - **Transient**: rebuilt from the frequency source on every request
//! - **Keep**: requested at least `keep_after` times, held indefinitely
//! - **Skip**: built from too few samples to be worth holding, answered with a
//!   shared distribution built from an empty frequency mapping
//!
//! In large-corpus mode every fetched mapping is first written to its own
//! table file and read back from there before the factory runs.

use crate::conditional::ConditionalFrequencyIndex;
use crate::codec::Token;
use crate::error::FreqResult;
use crate::freqdist::FrequencyDistribution;
use crate::probdist::{ProbDist, ProbDistFactory};
use crate::store::TableOptions;
use crate::table::FrequencyTable;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a condition's frequency mapping comes from
pub trait FrequencySource<C, S: Eq + Hash> {
    /// Whether the condition has ever been observed
    fn contains_condition(&self, condition: &C) -> FreqResult<bool>;

    /// Number of observed conditions
    fn condition_count(&self) -> FreqResult<usize>;

    /// Every observed condition
    fn conditions(&self) -> FreqResult<Vec<C>>;

    /// Fresh frequency mapping of the samples seen under `condition`
    fn frequency_distribution_for(&self, condition: &C) -> FreqResult<FrequencyDistribution<S>>;
}

impl<C: Token, S: Token> FrequencySource<C, S> for ConditionalFrequencyIndex<C, S> {
    fn contains_condition(&self, condition: &C) -> FreqResult<bool> {
        ConditionalFrequencyIndex::contains_condition(self, condition)
    }

    fn condition_count(&self) -> FreqResult<usize> {
        ConditionalFrequencyIndex::condition_count(self)
    }

    fn conditions(&self) -> FreqResult<Vec<C>> {
        Ok(ConditionalFrequencyIndex::conditions(self)?.into_iter().collect())
    }

    fn frequency_distribution_for(&self, condition: &C) -> FreqResult<FrequencyDistribution<S>> {
        ConditionalFrequencyIndex::frequency_distribution_for(self, condition)
    }
}

impl<C: Eq + Hash + Clone, S: Eq + Hash + Clone> FrequencySource<C, S> for HashMap<C, FrequencyDistribution<S>> {
    fn contains_condition(&self, condition: &C) -> FreqResult<bool> {
        Ok(self.contains_key(condition))
    }

    fn condition_count(&self) -> FreqResult<usize> {
        Ok(self.len())
    }

    fn conditions(&self) -> FreqResult<Vec<C>> {
        Ok(self.keys().cloned().collect())
    }

    fn frequency_distribution_for(&self, condition: &C) -> FreqResult<FrequencyDistribution<S>> {
        Ok(self.get(condition).cloned().unwrap_or_default())
    }
}

impl<C, S: Eq + Hash, T: FrequencySource<C, S> + ?Sized> FrequencySource<C, S> for &T {
    fn contains_condition(&self, condition: &C) -> FreqResult<bool> {
        (**self).contains_condition(condition)
    }

    fn condition_count(&self) -> FreqResult<usize> {
        (**self).condition_count()
    }

    fn conditions(&self) -> FreqResult<Vec<C>> {
        (**self).conditions()
    }

    fn frequency_distribution_for(&self, condition: &C) -> FreqResult<FrequencyDistribution<S>> {
        (**self).frequency_distribution_for(condition)
    }
}

/// Caching tier a condition currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Transient,
    Keep,
    Skip,
}

/// How long a condition stays in the skip tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Never re-evaluated, even if the condition gains samples later
    #[default]
    Permanent,
    /// Rebuilt from the source after this many skip-tier hits
    RevalidateAfter(u64),
}

/// Large-corpus mode: per-condition tables written under `dir`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeCorpusConfig {
    pub dir: PathBuf,
    /// Distinguishes the files of several caches sharing one directory
    pub index: u32,
}

impl LargeCorpusConfig {
    /// `<dir>/<index>_<condition>.pdb`, with path separators in the condition replaced
    pub fn table_path(&self, condition: &impl Display) -> PathBuf {
        let name: String = condition.to_string().chars().map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c }).collect();
        self.dir.join(format!("{:03}_{}.pdb", self.index, name))
    }
}

/// Cache policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Requests after which a condition's distribution is kept
    pub keep_after: u64,
    /// Conditions whose distribution has at most this many samples are skipped (0 disables)
    pub skip_threshold: usize,
    pub skip_policy: SkipPolicy,
    pub large_corpus: Option<LargeCorpusConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_after: 2,
            skip_threshold: 0,
            skip_policy: SkipPolicy::Permanent,
            large_corpus: None,
        }
    }
}

/// Lazily built, tiered per-condition probability distributions
pub struct ConditionalProbabilityCache<C, S, Src, F>
where
    S: Eq + Hash,
    F: ProbDistFactory<S>,
{
    source: Src,
    factory: F,
    config: CacheConfig,
    seen: HashMap<C, u64>,
    keep: HashMap<C, Arc<F::Dist>>,
    /// Skipped conditions with the number of skip-tier hits since they were skipped
    skip: HashMap<C, u64>,
    empty: Option<Arc<F::Dist>>,
    _samples: PhantomData<fn() -> S>,
}

impl<C, S, Src, F> ConditionalProbabilityCache<C, S, Src, F>
where
    C: Eq + Hash + Clone + Display,
    S: Token,
    Src: FrequencySource<C, S>,
    F: ProbDistFactory<S>,
{
    pub fn new(source: Src, factory: F) -> Self {
        Self::with_config(source, factory, CacheConfig::default())
    }

    pub fn with_config(source: Src, factory: F, config: CacheConfig) -> Self {
        Self {
            source,
            factory,
            config,
            seen: HashMap::new(),
            keep: HashMap::new(),
            skip: HashMap::new(),
            empty: None,
            _samples: PhantomData,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn source(&self) -> &Src {
        &self.source
    }

    /// Mutable access to the source, e.g. to record more observations
    ///
    /// Cached tiers are left as they are; use [`Self::invalidate`] to drop them.
    pub fn source_mut(&mut self) -> &mut Src {
        &mut self.source
    }

    pub fn into_source(self) -> Src {
        self.source
    }

    /// Distribution for `condition`, building or reusing it according to its tier
    pub fn probability_distribution_for(&mut self, condition: &C) -> FreqResult<Arc<F::Dist>> {
        let seen = {
            let count = self.seen.entry(condition.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(hits) = self.skip.get_mut(condition) {
            *hits += 1;
            let expired = matches!(self.config.skip_policy, SkipPolicy::RevalidateAfter(limit) if *hits > limit);
            if !expired {
                return Ok(self.empty_distribution());
            }
            self.skip.remove(condition);
            debug!("Revalidating skipped condition {}", condition);
        }

        if let Some(dist) = self.keep.get(condition) {
            return Ok(Arc::clone(dist));
        }

        if !self.source.contains_condition(condition)? {
            // Unknown condition: built every time, never cached
            return Ok(Arc::new(self.factory.build(&FrequencyDistribution::new())));
        }

        let freqs = self.fetch(condition)?;
        let dist = Arc::new(self.factory.build(&freqs));

        if seen >= self.config.keep_after {
            debug!("Keeping distribution for condition {} after {} requests", condition, seen);
            self.keep.insert(condition.clone(), Arc::clone(&dist));
        }

        let threshold = self.config.skip_threshold;
        if threshold > 0 && dist.sample_count() <= threshold {
            debug!("Skipping condition {} with {} samples", condition, dist.sample_count());
            self.keep.remove(condition);
            self.skip.insert(condition.clone(), 0);
            self.empty_distribution();
        }

        Ok(dist)
    }

    /// Frequency mapping for `condition`, routed through its own table in large-corpus mode
    fn fetch(&self, condition: &C) -> FreqResult<FrequencyDistribution<S>> {
        let freqs = self.source.frequency_distribution_for(condition)?;
        let Some(large_corpus) = self.config.large_corpus.as_ref() else {
            return Ok(freqs);
        };

        let path = large_corpus.table_path(condition);
        std::fs::create_dir_all(&large_corpus.dir)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let mut table = FrequencyTable::<S>::open(&path, &TableOptions::read_write())?;
        table.update_counts(freqs.iter().map(|(sample, count)| (sample.clone(), BigInt::from(count.clone()))))?;
        drop(freqs);
        table.flush()?;

        let rebuilt = table.to_distribution()?;
        table.close()?;
        info!("Offloaded {} samples of condition {} to {}", rebuilt.distinct_count(), condition, path.display());
        Ok(rebuilt)
    }

    /// Shared distribution built once from an empty frequency mapping
    fn empty_distribution(&mut self) -> Arc<F::Dist> {
        let factory = &self.factory;
        Arc::clone(self.empty.get_or_insert_with(|| Arc::new(factory.build(&FrequencyDistribution::new()))))
    }

    pub fn tier_of(&self, condition: &C) -> CacheTier {
        if self.skip.contains_key(condition) {
            CacheTier::Skip
        } else if self.keep.contains_key(condition) {
            CacheTier::Keep
        } else {
            CacheTier::Transient
        }
    }

    /// Number of requests made for `condition`
    pub fn seen_count(&self, condition: &C) -> u64 {
        self.seen.get(condition).copied().unwrap_or(0)
    }

    /// Drop `condition` from the keep and skip tiers so the next request rebuilds it
    pub fn invalidate(&mut self, condition: &C) {
        self.keep.remove(condition);
        self.skip.remove(condition);
    }

    /// Drop every cached distribution and request counter
    pub fn clear(&mut self) {
        self.seen.clear();
        self.keep.clear();
        self.skip.clear();
        self.empty = None;
    }

    /// Whether the source has observed `condition`
    pub fn contains(&self, condition: &C) -> FreqResult<bool> {
        self.source.contains_condition(condition)
    }

    /// Number of conditions the source has observed
    pub fn len(&self) -> FreqResult<usize> {
        self.source.condition_count()
    }

    pub fn is_empty(&self) -> FreqResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Conditions the source has observed
    pub fn conditions(&self) -> FreqResult<Vec<C>> {
        self.source.conditions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probdist::{MleFactory, MleProbDist};
    use tempfile::TempDir;

    type MemorySource = HashMap<String, FrequencyDistribution<String>>;
    type TestCache<Src, F> = ConditionalProbabilityCache<String, String, Src, F>;

    fn source(entries: &[(&str, &[&str])]) -> MemorySource {
        entries
            .iter()
            .map(|(condition, samples)| (condition.to_string(), samples.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_second_request_promotes_to_keep() {
        let mut cache = TestCache::new(source(&[("the", &["cat", "dog"])]), MleFactory);

        let first = cache.probability_distribution_for(&key("the")).unwrap();
        assert_eq!(cache.tier_of(&key("the")), CacheTier::Transient);

        let second = cache.probability_distribution_for(&key("the")).unwrap();
        let third = cache.probability_distribution_for(&key("the")).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(cache.tier_of(&key("the")), CacheTier::Keep);
        assert_eq!(cache.seen_count(&key("the")), 3);
        assert!((third.prob(&key("cat")) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_condition_is_never_cached() {
        let mut cache = TestCache::new(source(&[("the", &["cat"])]), MleFactory);

        let a = cache.probability_distribution_for(&key("zebra")).unwrap();
        let b = cache.probability_distribution_for(&key("zebra")).unwrap();
        let c = cache.probability_distribution_for(&key("zebra")).unwrap();

        assert!(!Arc::ptr_eq(&b, &c));
        assert_eq!(a.sample_count(), 0);
        assert_eq!(cache.tier_of(&key("zebra")), CacheTier::Transient);
        assert!(!cache.contains(&key("zebra")).unwrap());
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.conditions().unwrap(), vec![key("the")]);
    }

    #[test]
    fn test_small_conditions_are_skipped_permanently() {
        let config = CacheConfig {
            skip_threshold: 1,
            ..CacheConfig::default()
        };
        let mut cache = TestCache::with_config(source(&[("rare", &["x"]), ("busy", &["x", "y"])]), MleFactory, config);

        // The request that decides to skip still gets the real distribution
        let first = cache.probability_distribution_for(&key("rare")).unwrap();
        assert_eq!(first.sample_count(), 1);
        assert_eq!(cache.tier_of(&key("rare")), CacheTier::Skip);

        cache.source_mut().insert(key("rare"), ["x", "y", "z"].iter().map(|s| s.to_string()).collect());
        for _ in 0..3 {
            let dist = cache.probability_distribution_for(&key("rare")).unwrap();
            assert_eq!(dist.sample_count(), 0);
        }

        let busy = cache.probability_distribution_for(&key("busy")).unwrap();
        assert_eq!(busy.sample_count(), 2);
        assert_eq!(cache.tier_of(&key("busy")), CacheTier::Transient);
    }

    #[test]
    fn test_skip_tier_shares_one_empty_distribution() {
        let config = CacheConfig {
            skip_threshold: 2,
            ..CacheConfig::default()
        };
        let mut cache = TestCache::with_config(source(&[("a", &["x"]), ("b", &["y"])]), MleFactory, config);
        cache.probability_distribution_for(&key("a")).unwrap();
        cache.probability_distribution_for(&key("b")).unwrap();

        let a = cache.probability_distribution_for(&key("a")).unwrap();
        let b = cache.probability_distribution_for(&key("b")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_skip_revalidation() {
        let config = CacheConfig {
            skip_threshold: 1,
            skip_policy: SkipPolicy::RevalidateAfter(2),
            ..CacheConfig::default()
        };
        let mut cache = TestCache::with_config(source(&[("c", &["x"])]), MleFactory, config);
        cache.probability_distribution_for(&key("c")).unwrap();
        cache.source_mut().insert(key("c"), ["x", "y"].iter().map(|s| s.to_string()).collect());

        assert_eq!(cache.probability_distribution_for(&key("c")).unwrap().sample_count(), 0);
        assert_eq!(cache.probability_distribution_for(&key("c")).unwrap().sample_count(), 0);
        // Third skip-tier hit exceeds the limit and rebuilds from the source
        assert_eq!(cache.probability_distribution_for(&key("c")).unwrap().sample_count(), 2);
        assert_eq!(cache.tier_of(&key("c")), CacheTier::Keep);
    }

    #[test]
    fn test_invalidate_rebuilds() {
        let mut cache = TestCache::new(source(&[("c", &["x"])]), MleFactory);
        cache.probability_distribution_for(&key("c")).unwrap();
        let kept = cache.probability_distribution_for(&key("c")).unwrap();

        cache.source_mut().insert(key("c"), ["y"].iter().map(|s| s.to_string()).collect());
        assert!(Arc::ptr_eq(&kept, &cache.probability_distribution_for(&key("c")).unwrap()));

        cache.invalidate(&key("c"));
        let rebuilt = cache.probability_distribution_for(&key("c")).unwrap();
        assert_eq!(rebuilt.prob(&key("y")), 1.0);
        assert_eq!(rebuilt.prob(&key("x")), 0.0);
    }

    #[test]
    fn test_large_corpus_mode_writes_condition_table() {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig {
            large_corpus: Some(LargeCorpusConfig {
                dir: temp_dir.path().to_path_buf(),
                index: 7,
            }),
            ..CacheConfig::default()
        };
        let memory = source(&[("a/b", &["x", "x", "y"])]);
        let mut cache = TestCache::with_config(&memory, |f: &FrequencyDistribution<String>| MleProbDist::new(f), config);

        let dist = cache.probability_distribution_for(&key("a/b")).unwrap();
        assert!((dist.prob(&key("x")) - 2.0 / 3.0).abs() < 1e-12);

        let path = temp_dir.path().join("007_a_b.pdb");
        assert!(path.exists());

        // A second build replaces the table instead of adding to it
        cache.probability_distribution_for(&key("a/b")).unwrap();
        let mut table = FrequencyTable::<String>::open(&path, &TableOptions::read_only()).unwrap();
        assert_eq!(table.total().unwrap(), num_bigint::BigUint::from(3u8));
    }
}
