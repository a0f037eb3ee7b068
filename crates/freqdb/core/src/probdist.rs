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

//! Probability Distributions
//!
//! The cache builds distributions through a [`ProbDistFactory`]. Any closure
//! taking a [`FrequencyDistribution`] is a factory; [`MleFactory`] and
//! [`LidstoneFactory`] cover the common estimators.

use crate::freqdist::{FrequencyDistribution, count_to_f64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Sample -> probability queries
pub trait ProbDist<S> {
    /// Probability of `sample`
    fn prob(&self, sample: &S) -> f64;

    /// Number of samples the distribution was built from
    fn sample_count(&self) -> usize;

    /// Samples the distribution was built from
    fn samples(&self) -> Vec<&S>;
}

/// Builds a distribution from a frequency mapping
///
/// Extra estimator parameters live on the factory value itself.
pub trait ProbDistFactory<S: Eq + Hash> {
    type Dist: ProbDist<S>;

    fn build(&self, freqs: &FrequencyDistribution<S>) -> Self::Dist;
}

impl<S, D, F> ProbDistFactory<S> for F
where
    D: ProbDist<S>,
    F: Fn(&FrequencyDistribution<S>) -> D,
    S: Eq + Hash,
{
    type Dist = D;

    fn build(&self, freqs: &FrequencyDistribution<S>) -> D {
        self(freqs)
    }
}

/// Observed counts as floats, shared by the estimators below
#[derive(Debug, Clone)]
struct Observed<S> {
    counts: HashMap<S, f64>,
    total: f64,
}

impl<S: Eq + Hash + Clone> Observed<S> {
    fn from_freqs(freqs: &FrequencyDistribution<S>) -> Self {
        Self {
            counts: freqs.iter().map(|(sample, count)| (sample.clone(), count_to_f64(count))).collect(),
            total: count_to_f64(freqs.total()),
        }
    }

    fn count(&self, sample: &S) -> f64 {
        self.counts.get(sample).copied().unwrap_or(0.0)
    }
}

/// Maximum likelihood estimate: the relative frequency of each sample
#[derive(Debug, Clone)]
pub struct MleProbDist<S> {
    observed: Observed<S>,
}

impl<S: Eq + Hash + Clone> MleProbDist<S> {
    pub fn new(freqs: &FrequencyDistribution<S>) -> Self {
        Self {
            observed: Observed::from_freqs(freqs),
        }
    }
}

impl<S: Eq + Hash> ProbDist<S> for MleProbDist<S> {
    fn prob(&self, sample: &S) -> f64 {
        if self.observed.total == 0.0 {
            return 0.0;
        }
        self.observed.counts.get(sample).copied().unwrap_or(0.0) / self.observed.total
    }

    fn sample_count(&self) -> usize {
        self.observed.counts.len()
    }

    fn samples(&self) -> Vec<&S> {
        self.observed.counts.keys().collect()
    }
}

/// Factory for [`MleProbDist`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MleFactory;

impl<S: Eq + Hash + Clone> ProbDistFactory<S> for MleFactory {
    type Dist = MleProbDist<S>;

    fn build(&self, freqs: &FrequencyDistribution<S>) -> MleProbDist<S> {
        MleProbDist::new(freqs)
    }
}

/// Additive smoothing: `(count + gamma) / (total + bins * gamma)`
///
/// `bins` defaults to the number of observed samples.
#[derive(Debug, Clone)]
pub struct LidstoneProbDist<S> {
    observed: Observed<S>,
    gamma: f64,
    bins: usize,
}

impl<S: Eq + Hash + Clone> LidstoneProbDist<S> {
    pub fn new(freqs: &FrequencyDistribution<S>, gamma: f64, bins: Option<usize>) -> Self {
        Self {
            observed: Observed::from_freqs(freqs),
            gamma,
            bins: bins.unwrap_or_else(|| freqs.distinct_count()),
        }
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn bins(&self) -> usize {
        self.bins
    }
}

impl<S: Eq + Hash + Clone> ProbDist<S> for LidstoneProbDist<S> {
    fn prob(&self, sample: &S) -> f64 {
        let denominator = self.observed.total + self.bins as f64 * self.gamma;
        if denominator == 0.0 {
            return 0.0;
        }
        (self.observed.count(sample) + self.gamma) / denominator
    }

    fn sample_count(&self) -> usize {
        self.observed.counts.len()
    }

    fn samples(&self) -> Vec<&S> {
        self.observed.counts.keys().collect()
    }
}

/// Factory for [`LidstoneProbDist`], holding the smoothing parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LidstoneFactory {
    pub gamma: f64,
    pub bins: Option<usize>,
}

impl LidstoneFactory {
    pub fn new(gamma: f64, bins: Option<usize>) -> Self {
        Self { gamma, bins }
    }

    /// Add-one smoothing
    pub fn laplace(bins: Option<usize>) -> Self {
        Self::new(1.0, bins)
    }

    /// Add-one-half smoothing
    pub fn expected_likelihood(bins: Option<usize>) -> Self {
        Self::new(0.5, bins)
    }
}

impl<S: Eq + Hash + Clone> ProbDistFactory<S> for LidstoneFactory {
    type Dist = LidstoneProbDist<S>;

    fn build(&self, freqs: &FrequencyDistribution<S>) -> LidstoneProbDist<S> {
        LidstoneProbDist::new(freqs, self.gamma, self.bins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn freqs(samples: &[&'static str]) -> FrequencyDistribution<&'static str> {
        samples.iter().copied().collect()
    }

    #[test]
    fn test_mle() {
        let dist = MleFactory.build(&freqs(&["a", "a", "b", "c"]));

        assert!((dist.prob(&"a") - 0.5).abs() < 1e-12);
        assert_eq!(dist.prob(&"z"), 0.0);
        assert_eq!(dist.sample_count(), 3);
    }

    #[test]
    fn test_mle_empty() {
        let dist = MleFactory.build(&FrequencyDistribution::<&str>::new());
        assert_eq!(dist.prob(&"a"), 0.0);
        assert_eq!(dist.sample_count(), 0);
    }

    #[test]
    fn test_laplace_with_bins() {
        let dist = LidstoneFactory::laplace(Some(4)).build(&freqs(&["a", "a", "b"]));

        // (2 + 1) / (3 + 4)
        assert!((dist.prob(&"a") - 3.0 / 7.0).abs() < 1e-12);
        // unseen samples still get mass
        assert!((dist.prob(&"z") - 1.0 / 7.0).abs() < 1e-12);
        assert_eq!(dist.sample_count(), 2);
        assert_eq!(dist.bins(), 4);
    }

    #[test]
    fn test_lidstone_empty_without_bins_is_zero() {
        let dist = LidstoneFactory::expected_likelihood(None).build(&FrequencyDistribution::<&str>::new());
        assert_eq!(dist.prob(&"a"), 0.0);
    }

    #[test]
    fn test_closure_is_a_factory() {
        let factory = |f: &FrequencyDistribution<&'static str>| MleProbDist::new(f);
        let dist = factory.build(&freqs(&["x"]));
        assert_eq!(dist.prob(&"x"), 1.0);
    }
}
