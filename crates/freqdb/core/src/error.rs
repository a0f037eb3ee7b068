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

// Error types shared by the store, the tables and the probability cache

use std::io::{self, Error, ErrorKind};

/// Error types for frequency storage operations
#[derive(Debug, thiserror::Error)]
pub enum FreqError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupted storage: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Count underflow: current count {current} cannot be adjusted by {delta}")]
    Underflow { current: String, delta: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<bincode::error::EncodeError> for FreqError {
    fn from(err: bincode::error::EncodeError) -> Self {
        FreqError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for FreqError {
    fn from(err: bincode::error::DecodeError) -> Self {
        FreqError::Serialization(err.to_string())
    }
}

/// Result type for frequency storage operations
pub type FreqResult<T> = std::result::Result<T, FreqError>;

/// Helper function to create I/O errors
pub fn io_error(kind: ErrorKind, msg: &str) -> FreqError {
    FreqError::Io(Error::new(kind, msg))
}
