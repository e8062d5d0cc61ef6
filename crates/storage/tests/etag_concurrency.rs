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

//! Optimistic-concurrency behaviour shared by every storage provider.
//!
//! The in-memory provider always runs; the Redis provider runs with
//! `--features redis-backend` and skips when no server is reachable.

use futures::future::join_all;
use granary_core::GrainIdentity;
use granary_storage::{Etag, MemoryStorageProvider, StorageProvider};
use std::sync::Arc;

async fn assert_round_trip(storage: Arc<dyn StorageProvider>, id: &GrainIdentity) {
    let etag = storage.save(id, b"payload-1".to_vec(), None).await.unwrap();
    let state = storage.load(id).await.unwrap().unwrap();
    assert_eq!(state.payload, b"payload-1".to_vec());
    assert_eq!(state.etag, etag);
}

async fn assert_single_winner(storage: Arc<dyn StorageProvider>, id: &GrainIdentity) {
    let base = storage.save(id, b"base".to_vec(), None).await.unwrap();

    let writers = (0..8).map(|i| {
        let storage = storage.clone();
        let id = id.clone();
        let base = base.clone();
        tokio::spawn(async move {
            storage
                .save(&id, format!("writer-{i}").into_bytes(), Some(&base))
                .await
        })
    });

    let results: Vec<_> = join_all(writers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_conflict()))
        .count();

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, results.len() - 1);

    let state = storage.load(id).await.unwrap().unwrap();
    assert_eq!(&state.etag, winners[0]);
}

async fn assert_stale_etag_rejected(storage: Arc<dyn StorageProvider>, id: &GrainIdentity) {
    storage.save(id, b"v1".to_vec(), None).await.unwrap();
    let err = storage
        .save(id, b"v2".to_vec(), Some(&Etag::new("e0")))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

async fn assert_empty_etag_is_not_absence(storage: Arc<dyn StorageProvider>, id: &GrainIdentity) {
    let err = storage
        .save(id, b"v1".to_vec(), Some(&Etag::new("")))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(storage.load(id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_round_trip() {
    let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
    assert_round_trip(storage, &GrainIdentity::new("Definition", "round-trip")).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_writers_single_winner() {
    let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
    assert_single_winner(storage, &GrainIdentity::new("Definition", "race")).await;
}

#[tokio::test]
async fn test_memory_stale_etag_rejected() {
    let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
    assert_stale_etag_rejected(storage, &GrainIdentity::new("Definition", "stale")).await;
}

#[tokio::test]
async fn test_memory_empty_etag_conflicts_on_absent_state() {
    let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorageProvider::new());
    assert_empty_etag_is_not_absence(storage, &GrainIdentity::new("Definition", "blank")).await;
}

#[cfg(feature = "redis-backend")]
mod redis_backend {
    use super::*;
    use granary_storage::RedisStorageProvider;

    async fn redis_storage() -> Option<Arc<dyn StorageProvider>> {
        let url = std::env::var("GRANARY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let namespace = format!("granary-test-{}", ulid::Ulid::new());
        match tokio::time::timeout(
            std::time::Duration::from_secs(2),
            RedisStorageProvider::new(&url, &namespace),
        )
        .await
        {
            Ok(Ok(storage)) => Some(Arc::new(storage)),
            _ => {
                println!("Skipping test - Redis not available at {url}");
                None
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_redis_round_trip() {
        let Some(storage) = redis_storage().await else { return };
        assert_round_trip(storage, &GrainIdentity::new("Definition", "round-trip")).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_redis_concurrent_writers_single_winner() {
        let Some(storage) = redis_storage().await else { return };
        assert_single_winner(storage, &GrainIdentity::new("Definition", "race")).await;
    }

    #[tokio::test]
    async fn test_redis_stale_etag_rejected() {
        let Some(storage) = redis_storage().await else { return };
        assert_stale_etag_rejected(storage, &GrainIdentity::new("Definition", "stale")).await;
    }

    #[tokio::test]
    async fn test_redis_empty_etag_conflicts_on_absent_state() {
        let Some(storage) = redis_storage().await else { return };
        assert_empty_etag_is_not_absence(storage, &GrainIdentity::new("Definition", "blank")).await;
    }
}
