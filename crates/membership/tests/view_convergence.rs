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

//! Nodes sharing one coordination store converge on the same view.

use granary_core::{NodeDescriptor, NodeStatus};
use granary_membership::{
    HeartbeatStatus, InMemoryMembershipBackend, MembershipBackend, MembershipProvider,
    NetworkedMembership, NetworkedMembershipConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> NetworkedMembershipConfig {
    NetworkedMembershipConfig {
        suspect_after: Duration::from_millis(200),
        dead_grace: Duration::from_millis(200),
        refresh_interval: Duration::from_millis(50),
    }
}

async fn wait_for_version(membership: &NetworkedMembership, version: u64) {
    let mut rx = membership.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while rx.borrow_and_update().version < version {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("view did not converge");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_join_is_broadcast_to_existing_members() {
    let backend: Arc<dyn MembershipBackend> = Arc::new(InMemoryMembershipBackend::new());
    let n1 = NetworkedMembership::new(backend.clone(), fast_config());
    let n2 = NetworkedMembership::new(backend.clone(), fast_config());

    let v1 = n1.join(NodeDescriptor::new("n1", "127.0.0.1:1")).await.unwrap();
    assert_eq!(v1.version, 2);
    assert_eq!(v1.status_of(&"n1".into()), Some(NodeStatus::Active));
    let v2 = n2.join(NodeDescriptor::new("n2", "127.0.0.1:2")).await.unwrap();
    assert_eq!(v2.version, 4);

    wait_for_version(&n1, 4).await;
    assert_eq!(n1.current_view(), n2.current_view());
    assert_eq!(n1.current_view().active_count(), 2);

    n1.stop();
    n2.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_node_is_declared_dead_by_peer() {
    let backend: Arc<dyn MembershipBackend> = Arc::new(InMemoryMembershipBackend::new());
    let n1 = NetworkedMembership::new(backend.clone(), fast_config());
    let n2 = NetworkedMembership::new(backend.clone(), fast_config());
    n1.join(NodeDescriptor::new("n1", "a")).await.unwrap();
    n2.join(NodeDescriptor::new("n2", "b")).await.unwrap();

    // n1 keeps heartbeating; n2 goes silent.
    n2.stop();
    let heartbeats = {
        let n1 = n1.clone();
        tokio::spawn(async move {
            loop {
                let _ = n1.heartbeat(&"n1".into()).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };

    wait_for_version(&n1, 5).await;
    let view = n1.current_view();
    assert_eq!(view.status_of(&"n1".into()), Some(NodeStatus::Active));
    assert_eq!(view.status_of(&"n2".into()), Some(NodeStatus::Dead));
    assert_eq!(
        n2.heartbeat(&"n2".into()).await.unwrap(),
        HeartbeatStatus::Dead
    );

    heartbeats.abort();
    n1.stop();
}

#[tokio::test]
async fn test_registered_member_is_placed_only_after_first_renewal() {
    let backend = InMemoryMembershipBackend::new();
    let view = backend.register(NodeDescriptor::new("n1", "a")).await.unwrap();
    assert_eq!(view.status_of(&"n1".into()), Some(NodeStatus::Joining));
    assert_eq!(view.active_count(), 0);

    assert_eq!(backend.renew(&"n1".into()).await.unwrap(), NodeStatus::Active);
    let view = backend.snapshot().await.unwrap().view;
    assert_eq!(view.version, 2);
    assert_eq!(view.active_count(), 1);

    assert_eq!(backend.renew(&"n1".into()).await.unwrap(), NodeStatus::Active);
    assert_eq!(backend.snapshot().await.unwrap().view.version, 2);
}

#[tokio::test]
async fn test_dead_id_cannot_rejoin() {
    let backend: Arc<dyn MembershipBackend> = Arc::new(InMemoryMembershipBackend::new());
    let n1 = NetworkedMembership::new(backend.clone(), fast_config());
    n1.join(NodeDescriptor::new("n1", "a")).await.unwrap();
    n1.leave(&"n1".into()).await.unwrap();

    let again = NetworkedMembership::new(backend, fast_config());
    assert!(again.join(NodeDescriptor::new("n1", "a")).await.is_err());
    n1.stop();
}

#[cfg(feature = "redis-backend")]
mod redis_backend {
    use super::*;
    use granary_membership::RedisMembershipBackend;

    async fn redis_backend() -> Option<Arc<dyn MembershipBackend>> {
        let url = std::env::var("GRANARY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let namespace = format!("granary-test-{}", ulid::Ulid::new());
        match tokio::time::timeout(
            Duration::from_secs(2),
            RedisMembershipBackend::new(&url, &namespace),
        )
        .await
        {
            Ok(Ok(backend)) => Some(Arc::new(
                backend.with_poll_interval(Duration::from_millis(50)),
            )),
            _ => {
                println!("Skipping test - Redis not available at {url}");
                None
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_redis_join_is_broadcast() {
        let Some(backend) = redis_backend().await else { return };
        let n1 = NetworkedMembership::new(backend.clone(), fast_config());
        let n2 = NetworkedMembership::new(backend.clone(), fast_config());
        n1.join(NodeDescriptor::new("n1", "a")).await.unwrap();
        n2.join(NodeDescriptor::new("n2", "b")).await.unwrap();

        wait_for_version(&n1, 4).await;
        assert_eq!(n1.current_view().active_count(), 2);
        n1.stop();
        n2.stop();
    }

    #[tokio::test]
    async fn test_redis_mark_dead_is_compare_and_set() {
        let Some(backend) = redis_backend().await else { return };
        backend.register(NodeDescriptor::new("n1", "a")).await.unwrap();
        backend.register(NodeDescriptor::new("n2", "b")).await.unwrap();

        assert!(backend.mark_dead(&"n2".into(), 1).await.unwrap().is_none());
        let view = backend.mark_dead(&"n2".into(), 2).await.unwrap().unwrap();
        assert_eq!(view.version, 3);
        assert_eq!(backend.renew(&"n2".into()).await.unwrap(), NodeStatus::Dead);
    }
}
