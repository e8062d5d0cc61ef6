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

//! In-memory storage provider.
//!
//! ## Purpose
//! HashMap-based provider for development and single-process tests.
//!
//! ## Limitations
//! - Not persistent (state lost on restart)
//! - Not shared (a second process sees nothing)

use crate::{Etag, StorageError, StorageProvider, StorageResult, StoredState};
use async_trait::async_trait;
use granary_core::GrainIdentity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage provider.
///
/// Clones share the same underlying map, so one instance can be handed to
/// several runtimes in a test to emulate shared storage.
#[derive(Clone, Default)]
pub struct MemoryStorageProvider {
    data: Arc<RwLock<HashMap<String, StoredState>>>,
}

impl MemoryStorageProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grains.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn etag_matches(current: Option<&StoredState>, expected: Option<&Etag>) -> bool {
        match (current, expected) {
            (None, None) => true,
            (Some(curr), Some(exp)) => &curr.etag == exp,
            _ => false,
        }
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn load(&self, identity: &GrainIdentity) -> StorageResult<Option<StoredState>> {
        let data = self.data.read().await;
        Ok(data.get(&identity.storage_key()).cloned())
    }

    async fn save(
        &self,
        identity: &GrainIdentity,
        payload: Vec<u8>,
        expected_etag: Option<&Etag>,
    ) -> StorageResult<Etag> {
        let key = identity.storage_key();
        let mut data = self.data.write().await;

        if !Self::etag_matches(data.get(&key), expected_etag) {
            tracing::debug!(grain = %identity, expected = ?expected_etag, "Rejected stale write");
            return Err(StorageError::Conflict {
                key,
                expected: expected_etag.map(|e| e.to_string()),
            });
        }

        let etag = Etag::generate();
        data.insert(
            key,
            StoredState {
                payload,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn clear(&self, identity: &GrainIdentity, expected_etag: &Etag) -> StorageResult<()> {
        let key = identity.storage_key();
        let mut data = self.data.write().await;

        if !Self::etag_matches(data.get(&key), Some(expected_etag)) {
            return Err(StorageError::Conflict {
                key,
                expected: Some(expected_etag.to_string()),
            });
        }

        data.remove(&key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peace() -> GrainIdentity {
        GrainIdentity::new("Definition", "peace")
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let storage = MemoryStorageProvider::new();
        assert!(storage.load(&peace()).await.unwrap().is_none());
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_save_then_load_returns_payload_and_etag() {
        let storage = MemoryStorageProvider::new();
        let etag = storage
            .save(&peace(), r#"{"zh":"和平"}"#.as_bytes().to_vec(), None)
            .await
            .unwrap();

        let state = storage.load(&peace()).await.unwrap().unwrap();
        assert_eq!(state.payload, r#"{"zh":"和平"}"#.as_bytes().to_vec());
        assert_eq!(state.etag, etag);
    }

    #[tokio::test]
    async fn test_create_requires_absent_state() {
        let storage = MemoryStorageProvider::new();
        storage.save(&peace(), b"v1".to_vec(), None).await.unwrap();

        let err = storage.save(&peace(), b"v2".to_vec(), None).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(storage.load(&peace()).await.unwrap().unwrap().payload, b"v1".to_vec());
    }

    #[tokio::test]
    async fn test_stale_etag_rejected_and_not_applied() {
        let storage = MemoryStorageProvider::new();
        let e1 = storage.save(&peace(), b"v1".to_vec(), None).await.unwrap();
        let e2 = storage.save(&peace(), b"v2".to_vec(), Some(&e1)).await.unwrap();
        assert_ne!(e1, e2);

        let err = storage.save(&peace(), b"v3".to_vec(), Some(&e1)).await.unwrap_err();
        assert!(err.is_conflict());

        let err = storage
            .save(&peace(), b"v3".to_vec(), Some(&Etag::new("e0")))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let state = storage.load(&peace()).await.unwrap().unwrap();
        assert_eq!(state.payload, b"v2".to_vec());
        assert_eq!(state.etag, e2);
    }

    #[tokio::test]
    async fn test_clear_checks_etag() {
        let storage = MemoryStorageProvider::new();
        let e1 = storage.save(&peace(), b"v1".to_vec(), None).await.unwrap();

        assert!(storage.clear(&peace(), &Etag::new("e0")).await.unwrap_err().is_conflict());
        storage.clear(&peace(), &e1).await.unwrap();
        assert!(storage.load(&peace()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = MemoryStorageProvider::new();
        let b = a.clone();
        a.save(&peace(), b"v1".to_vec(), None).await.unwrap();
        assert_eq!(b.len().await, 1);
    }
}
