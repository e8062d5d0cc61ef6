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

//! Redis-based storage provider
//!
//! ## Purpose
//! Durable grain state shared by every node, so a grain reactivated on another
//! node after failover sees the last committed state.
//!
//! ## Layout
//! One hash per grain at `{namespace}:grain:{storage_key}` with fields
//! `payload` (bytes) and `etag` (string).
//!
//! ## Concurrency
//! The etag compare and the write run inside one Lua script, so the check and
//! the update are atomic on the server.
//!
//! ## Usage
//! ```rust,no_run
//! use granary_storage::{RedisStorageProvider, StorageProvider};
//! use granary_core::GrainIdentity;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = RedisStorageProvider::new("redis://localhost:6379", "definitions").await?;
//! let id = GrainIdentity::new("Definition", "peace");
//! let etag = storage.save(&id, b"{}".to_vec(), None).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Etag, StorageError, StorageProvider, StorageResult, StoredState};
use async_trait::async_trait;
use granary_core::GrainIdentity;
use redis::{aio::ConnectionManager, Client, Script};

/// `KEYS[1]` hash key; `ARGV[1]` "1" when the state must be absent, else "0";
/// `ARGV[2]` expected etag; `ARGV[3]` payload; `ARGV[4]` new etag.
/// Returns 1 on write, 0 on conflict.
const SAVE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'etag')
local matches
if ARGV[1] == '1' then
  matches = not current
else
  matches = current and current == ARGV[2]
end
if matches then
  redis.call('HSET', KEYS[1], 'payload', ARGV[3], 'etag', ARGV[4])
  return 1
end
return 0
"#;

/// `KEYS[1]` hash key; `ARGV[1]` expected etag. Returns 1 on delete, 0 on conflict.
const CLEAR_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'etag')
if current and current == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
"#;

/// Redis-backed storage provider.
///
/// ## Architecture
/// - `ConnectionManager` for pooled, auto-reconnecting async access
/// - Namespace prefix so several providers (or apps) can share one Redis
pub struct RedisStorageProvider {
    manager: ConnectionManager,
    namespace: String,
    save_script: Script,
    clear_script: Script,
}

impl RedisStorageProvider {
    /// Connect to Redis.
    ///
    /// ## Arguments
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `namespace` - Key prefix (e.g., the storage provider name)
    pub async fn new(url: &str, namespace: &str) -> StorageResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        tracing::info!(url = %url, namespace = %namespace, "Connected Redis grain storage");

        Ok(Self {
            manager,
            namespace: namespace.trim_end_matches(':').to_string(),
            save_script: Script::new(SAVE_SCRIPT),
            clear_script: Script::new(CLEAR_SCRIPT),
        })
    }

    fn grain_key(&self, identity: &GrainIdentity) -> String {
        format!("{}:grain:{}", self.namespace, identity.storage_key())
    }
}

#[async_trait]
impl StorageProvider for RedisStorageProvider {
    async fn load(&self, identity: &GrainIdentity) -> StorageResult<Option<StoredState>> {
        let mut conn = self.manager.clone();
        let key = self.grain_key(identity);

        let (payload, etag): (Option<Vec<u8>>, Option<String>) = redis::cmd("HMGET")
            .arg(&key)
            .arg("payload")
            .arg("etag")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::BackendError(format!("Redis HMGET failed: {}", e)))?;

        Ok(match (payload, etag) {
            (Some(payload), Some(etag)) => Some(StoredState {
                payload,
                etag: Etag::new(etag),
            }),
            _ => None,
        })
    }

    async fn save(
        &self,
        identity: &GrainIdentity,
        payload: Vec<u8>,
        expected_etag: Option<&Etag>,
    ) -> StorageResult<Etag> {
        let mut conn = self.manager.clone();
        let key = self.grain_key(identity);
        let new_etag = Etag::generate();
        let must_be_absent = if expected_etag.is_none() { "1" } else { "0" };
        let expected = expected_etag.map(|e| e.as_str()).unwrap_or_default();

        let applied: i32 = self
            .save_script
            .key(&key)
            .arg(must_be_absent)
            .arg(expected)
            .arg(payload)
            .arg(new_etag.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StorageError::BackendError(format!("Redis save script failed: {}", e)))?;

        if applied == 1 {
            Ok(new_etag)
        } else {
            tracing::debug!(grain = %identity, expected = ?expected_etag, "Rejected stale write");
            Err(StorageError::Conflict {
                key,
                expected: expected_etag.map(|e| e.to_string()),
            })
        }
    }

    async fn clear(&self, identity: &GrainIdentity, expected_etag: &Etag) -> StorageResult<()> {
        let mut conn = self.manager.clone();
        let key = self.grain_key(identity);

        let applied: i32 = self
            .clear_script
            .key(&key)
            .arg(expected_etag.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StorageError::BackendError(format!("Redis clear script failed: {}", e)))?;

        if applied == 1 {
            Ok(())
        } else {
            Err(StorageError::Conflict {
                key,
                expected: Some(expected_etag.to_string()),
            })
        }
    }

    fn name(&self) -> &str {
        "redis"
    }
}
