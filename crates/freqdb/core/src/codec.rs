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

//! Key and Value Encoding
//!
//! Tokens (samples and conditions) are encoded with bincode. Counts are stored
//! as the little-endian magnitude of a `BigUint`, so they never overflow.
//!
//! Flat-table keys carry a one-byte tag in front of the encoded sample, which
//! keeps them apart from the reserved [`TOTAL_KEY`]. Compound keys put the
//! length of the encoded condition first, so a condition can be split off
//! without ambiguity whatever bytes the condition or the sample contain.

use crate::error::{FreqError, FreqResult};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use num_bigint::BigUint;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;

/// Reserved key holding the memoized table total
pub const TOTAL_KEY: &[u8] = b"__total__";

/// Tag byte in front of every flat-table sample key
const SAMPLE_TAG: u8 = b's';

/// Size of the condition length prefix of a compound key
const CONDITION_LEN_SIZE: usize = 4;

/// Anything that can be counted or used as a condition
pub trait Token: Serialize + DeserializeOwned + Eq + Hash + Ord + Clone {}

impl<T> Token for T where T: Serialize + DeserializeOwned + Eq + Hash + Ord + Clone {}

/// Encode a token with bincode
pub fn encode_token<T: Serialize>(token: &T) -> FreqResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(token, bincode::config::standard())?)
}

/// Decode a token, rejecting trailing bytes
pub fn decode_token<T: DeserializeOwned>(bytes: &[u8]) -> FreqResult<T> {
    let (token, read): (T, usize) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(FreqError::Serialization(format!("{} trailing bytes after token", bytes.len() - read)));
    }
    Ok(token)
}

pub fn encode_count(count: &BigUint) -> Vec<u8> {
    count.to_bytes_le()
}

pub fn decode_count(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_le(bytes)
}

/// Store key for a sample in a flat frequency table
pub fn sample_key<T: Serialize>(sample: &T) -> FreqResult<Vec<u8>> {
    let mut key = vec![SAMPLE_TAG];
    key.extend(encode_token(sample)?);
    Ok(key)
}

/// Inverse of [`sample_key`]. Returns `None` for the reserved total key.
pub fn decode_sample_key<T: DeserializeOwned>(key: &[u8]) -> FreqResult<Option<T>> {
    if key == TOTAL_KEY {
        return Ok(None);
    }
    match key.split_first() {
        Some((&SAMPLE_TAG, rest)) => decode_token(rest).map(Some),
        _ => Err(FreqError::Corruption(format!("Unrecognized sample key {key:?}"))),
    }
}

/// Prefix shared by every compound key of `condition`
pub fn condition_prefix<C: Serialize>(condition: &C) -> FreqResult<Vec<u8>> {
    let encoded = encode_token(condition)?;
    let len = u32::try_from(encoded.len()).map_err(|_| FreqError::InvalidOperation("condition is too large to encode".to_string()))?;

    let mut prefix = Vec::with_capacity(CONDITION_LEN_SIZE + encoded.len());
    prefix.write_u32::<BigEndian>(len)?;
    prefix.extend(encoded);
    Ok(prefix)
}

/// Store key for a `(condition, sample)` pair
pub fn compound_key<C: Serialize, S: Serialize>(condition: &C, sample: &S) -> FreqResult<Vec<u8>> {
    let mut key = condition_prefix(condition)?;
    key.extend(encode_token(sample)?);
    Ok(key)
}

/// Split a compound key into its raw condition and sample parts
pub fn split_compound_key(key: &[u8]) -> FreqResult<(&[u8], &[u8])> {
    if key.len() < CONDITION_LEN_SIZE {
        return Err(FreqError::Corruption(format!("Compound key {key:?} is too short")));
    }
    let len = BigEndian::read_u32(&key[..CONDITION_LEN_SIZE]) as usize;
    let rest = &key[CONDITION_LEN_SIZE..];
    if rest.len() < len {
        return Err(FreqError::Corruption(format!("Compound key {key:?} has a truncated condition")));
    }
    Ok(rest.split_at(len))
}

pub fn decode_compound_key<C: DeserializeOwned, S: DeserializeOwned>(key: &[u8]) -> FreqResult<(C, S)> {
    let (condition, sample) = split_compound_key(key)?;
    Ok((decode_token(condition)?, decode_token(sample)?))
}
