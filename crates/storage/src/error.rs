// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of Granary.
//
// Granary is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// Granary is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with Granary. If not, see <https://www.gnu.org/licenses/>.

//! Error types for storage operations.

use granary_core::GrainFault;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Supplied etag does not match the stored one
    #[error("Etag conflict for {key}: expected {expected:?}")]
    Conflict {
        /// Storage key
        key: String,
        /// Etag the writer supplied
        expected: Option<String>,
    },

    /// Backend error (network, server, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether this is an etag conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::BackendError(format!("Redis error: {}", err))
    }
}

/// Conflicts stay conflicts; everything else reaches grain logic as an
/// application-level error it may choose to handle.
impl From<StorageError> for GrainFault {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { .. } => GrainFault::stale_etag(),
            other => GrainFault::application(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_stale_etag() {
        let err = StorageError::Conflict {
            key: "k".to_string(),
            expected: Some("e0".to_string()),
        };
        assert!(err.is_conflict());
        assert_eq!(GrainFault::from(err), GrainFault::stale_etag());
    }

    #[test]
    fn test_backend_error_is_not_retryable() {
        let fault = GrainFault::from(StorageError::BackendError("down".to_string()));
        assert!(!fault.is_retryable());
        assert_eq!(fault.kind(), "application");
    }
}
