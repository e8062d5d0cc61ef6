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

//! # Granary Grain Storage
//!
//! ## Purpose
//! Durable grain state keyed by [`GrainIdentity`], written with optimistic
//! concurrency. A write names the etag it expects to replace; if the stored etag
//! differs the write is rejected and nothing is applied. This is how two
//! activations of one grain racing during failover are *detected* rather than
//! silently overwriting each other.
//!
//! ## Key Components
//! - [`StorageProvider`]: the capability interface (`load` / `save` / `clear`)
//! - [`MemoryStorageProvider`]: HashMap-based, development and tests, lost on restart
//! - `RedisStorageProvider`: networked and durable, shared by all nodes
//!   (feature: `redis-backend`)
//! - [`StorageConfig`]: backend selection from explicit config or environment
//!
//! ## Examples
//! ```rust
//! use granary_core::GrainIdentity;
//! use granary_storage::{MemoryStorageProvider, StorageProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorageProvider::new();
//! let id = GrainIdentity::new("Definition", "peace");
//!
//! assert!(storage.load(&id).await?.is_none());
//! let etag = storage.save(&id, b"{}".to_vec(), None).await?;
//! let state = storage.load(&id).await?.unwrap();
//! assert_eq!(state.etag, etag);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use granary_core::GrainIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use config::{create_storage_from_config, create_storage_from_env, StorageBackendType, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorageProvider;

#[cfg(feature = "redis-backend")]
pub use redis::RedisStorageProvider;

/// Opaque version token for optimistic-concurrency writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    /// Wrap an existing token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh, unique token.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State as stored: opaque payload plus the etag of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    /// Serialized grain state
    pub payload: Vec<u8>,
    /// Current etag
    pub etag: Etag,
}

/// Grain state storage capability.
///
/// ## Contract
/// - `load` returns `Ok(None)` when nothing is stored ("not found")
/// - `save` with `expected_etag = None` only succeeds when nothing is stored
/// - `save` with `Some(etag)` only succeeds when `etag` is the stored etag
/// - On success `save` returns a new etag that differs from every earlier one
/// - On mismatch `save` returns [`StorageError::Conflict`] and applies nothing
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Read the current state of `identity`.
    async fn load(&self, identity: &GrainIdentity) -> StorageResult<Option<StoredState>>;

    /// Replace the state of `identity` if `expected_etag` is current.
    async fn save(
        &self,
        identity: &GrainIdentity,
        payload: Vec<u8>,
        expected_etag: Option<&Etag>,
    ) -> StorageResult<Etag>;

    /// Remove the state of `identity` if `expected_etag` is current.
    async fn clear(&self, identity: &GrainIdentity, expected_etag: &Etag) -> StorageResult<()>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
