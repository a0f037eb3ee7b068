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

//! FreqDB Core
//!
//! Disk-resident frequency and conditional-frequency counting on top of a
//! hash-indexed key-value store, with an adaptive cache that turns per-condition
//! counts into probability distributions on demand.
//!
//! The layers, leaf first:
//!
//! - [`store`]: the append-only [`LogStore`] and the [`KvStore`] contract
//! - [`table`]: [`FrequencyTable`], a durable sample -> count mapping
//! - [`conditional`]: [`ConditionalFrequencyIndex`], counts grouped by condition
//! - [`cache`]: [`ConditionalProbabilityCache`], tiered probability distributions

pub mod cache;
pub mod codec;
pub mod conditional;
pub mod error;
pub mod freqdist;
pub mod probdist;
pub mod store;
pub mod table;

pub use cache::{CacheConfig, CacheTier, ConditionalProbabilityCache, FrequencySource, LargeCorpusConfig, SkipPolicy};
pub use codec::Token;
pub use conditional::ConditionalFrequencyIndex;
pub use error::{FreqError, FreqResult};
pub use freqdist::FrequencyDistribution;
pub use probdist::{LidstoneFactory, LidstoneProbDist, MleFactory, MleProbDist, ProbDist, ProbDistFactory};
pub use store::{AccessMode, KvStore, LogStore, StoreConfig, StoreOptions, TableOptions};
pub use table::FrequencyTable;

/// Arbitrary-precision, non-negative occurrence count
pub type Count = num_bigint::BigUint;
