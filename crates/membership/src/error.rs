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

//! Error types for membership operations.

use granary_core::GrainFault;
use thiserror::Error;

/// Result type for membership operations.
pub type MembershipResult<T> = Result<T, MembershipError>;

/// Errors that can occur during membership operations.
#[derive(Error, Debug)]
pub enum MembershipError {
    /// Node is not part of the view
    #[error("Node not a member: {0}")]
    NotMember(String),

    /// Join refused (e.g. id already declared dead, or single-node table is taken)
    #[error("Join rejected: {0}")]
    Rejected(String),

    /// Concurrent updates kept invalidating our view update
    #[error("Version conflict updating membership view (observed version {0})")]
    VersionConflict(u64),

    /// Backend error (coordination store, network, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for MembershipError {
    fn from(err: serde_json::Error) -> Self {
        MembershipError::SerializationError(err.to_string())
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for MembershipError {
    fn from(err: redis::RedisError) -> Self {
        MembershipError::BackendError(format!("Redis error: {}", err))
    }
}

impl From<MembershipError> for GrainFault {
    fn from(err: MembershipError) -> Self {
        GrainFault::membership_unavailable(err.to_string())
    }
}
