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

// In-memory frequency distribution handed to probability distribution factories

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::collections::HashMap;
use std::collections::hash_map;
use std::hash::Hash;

/// Lossy conversion of a count for probability arithmetic
pub fn count_to_f64(count: &BigUint) -> f64 {
    count.to_f64().unwrap_or(f64::INFINITY)
}

/// Sample -> count mapping held in memory, with a running total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyDistribution<S: Eq + Hash> {
    counts: HashMap<S, BigUint>,
    total: BigUint,
}

impl<S: Eq + Hash> Default for FrequencyDistribution<S> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            total: BigUint::zero(),
        }
    }
}

impl<S: Eq + Hash> FrequencyDistribution<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` occurrences of `sample`. Zero counts leave the distribution untouched.
    pub fn increment(&mut self, sample: S, count: BigUint) {
        if count.is_zero() {
            return;
        }
        self.total += &count;
        *self.counts.entry(sample).or_default() += count;
    }

    pub fn get(&self, sample: &S) -> BigUint {
        self.counts.get(sample).cloned().unwrap_or_default()
    }

    /// Sum of all counts
    pub fn total(&self) -> &BigUint {
        &self.total
    }

    /// Number of samples with a positive count
    pub fn distinct_count(&self) -> usize {
        self.counts.len()
    }

    /// Relative frequency of `sample`, 0 when the distribution is empty
    pub fn frequency(&self, sample: &S) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }
        count_to_f64(&self.get(sample)) / count_to_f64(&self.total)
    }

    pub fn samples(&self) -> impl Iterator<Item = &S> {
        self.counts.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, S, BigUint> {
        self.counts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn contains(&self, sample: &S) -> bool {
        self.counts.contains_key(sample)
    }
}

impl<S: Eq + Hash + Ord> FrequencyDistribution<S> {
    /// The most frequent sample; ties go to the smallest sample
    pub fn max(&self) -> Option<&S> {
        self.counts.iter().max_by(|(sa, ca), (sb, cb)| ca.cmp(cb).then_with(|| sb.cmp(sa))).map(|(sample, _)| sample)
    }

    /// Samples with their counts, most frequent first
    pub fn most_common(&self) -> Vec<(&S, &BigUint)> {
        let mut entries: Vec<_> = self.counts.iter().collect();
        entries.sort_by(|(sa, ca), (sb, cb)| cb.cmp(ca).then_with(|| sa.cmp(sb)));
        entries
    }
}

impl<S: Eq + Hash> FromIterator<S> for FrequencyDistribution<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut dist = Self::new();
        for sample in iter {
            dist.increment(sample, BigUint::from(1u8));
        }
        dist
    }
}

impl<S: Eq + Hash> FromIterator<(S, BigUint)> for FrequencyDistribution<S> {
    fn from_iter<I: IntoIterator<Item = (S, BigUint)>>(iter: I) -> Self {
        let mut dist = Self::new();
        for (sample, count) in iter {
            dist.increment(sample, count);
        }
        dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_total() {
        let dist: FrequencyDistribution<&str> = ["dog", "dog", "cat"].into_iter().collect();

        assert_eq!(dist.get(&"dog"), BigUint::from(2u8));
        assert_eq!(dist.get(&"fish"), BigUint::zero());
        assert_eq!(dist.total(), &BigUint::from(3u8));
        assert_eq!(dist.distinct_count(), 2);
        assert!((dist.frequency(&"cat") - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_increment_is_ignored() {
        let mut dist = FrequencyDistribution::new();
        dist.increment("ghost", BigUint::zero());

        assert!(dist.is_empty());
        assert!(!dist.contains(&"ghost"));
        assert_eq!(dist.frequency(&"ghost"), 0.0);
    }

    #[test]
    fn test_most_common_orders_by_count_then_sample() {
        let dist: FrequencyDistribution<&str> = ["b", "a", "c", "c", "b"].into_iter().collect();

        let order: Vec<&str> = dist.most_common().into_iter().map(|(s, _)| *s).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!(dist.max(), Some(&"b"));
    }
}
