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

//! Networked membership over a shared coordination store.
//!
//! ## Design
//! Each node registers itself through a [`MembershipBackend`] and renews its
//! heartbeat periodically. Every node also runs a failure detector over the
//! shared heartbeat table:
//!
//! ```text
//! age <= suspect_after                      -> healthy
//! suspect_after < age <= + dead_grace       -> suspected (logged, still routable)
//! age > suspect_after + dead_grace          -> mark_dead (CAS on view version)
//! ```
//!
//! Views arrive from `backend.watch()` and from periodic snapshots; both paths go
//! through [`NetworkedMembership::apply_view`], which keeps only strictly newer
//! versions.

use crate::backend::{now_millis, MembershipBackend};
use crate::{
    publish_if_newer, HeartbeatStatus, MembershipError, MembershipProvider, MembershipResult,
};
use async_trait::async_trait;
use futures::StreamExt;
use granary_core::{ClusterMembershipView, NodeDescriptor, NodeId, NodeStatus};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const LEAVE_ATTEMPTS: usize = 3;

/// Failure-detection timing.
#[derive(Debug, Clone)]
pub struct NetworkedMembershipConfig {
    /// Heartbeat age after which a node is suspected
    pub suspect_after: Duration,
    /// Additional time without a heartbeat before a suspect is declared dead
    pub dead_grace: Duration,
    /// How often the detector runs and the view is re-read
    pub refresh_interval: Duration,
}

impl Default for NetworkedMembershipConfig {
    fn default() -> Self {
        Self {
            suspect_after: Duration::from_secs(3),
            dead_grace: Duration::from_secs(6),
            refresh_interval: Duration::from_secs(1),
        }
    }
}

/// Networked membership provider.
#[derive(Clone)]
pub struct NetworkedMembership {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn MembershipBackend>,
    config: NetworkedMembershipConfig,
    view_tx: watch::Sender<Arc<ClusterMembershipView>>,
    local_node: Mutex<Option<NodeId>>,
    suspects: Mutex<HashSet<NodeId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NetworkedMembership {
    /// Create a provider over `backend`.
    pub fn new(backend: Arc<dyn MembershipBackend>, config: NetworkedMembershipConfig) -> Self {
        let (view_tx, _) = watch::channel(Arc::new(ClusterMembershipView::empty()));
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                view_tx,
                local_node: Mutex::new(None),
                suspects: Mutex::new(HashSet::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Incorporate `view` if it is newer than the current one.
    pub fn apply_view(&self, view: ClusterMembershipView) -> bool {
        self.inner.apply_view(view)
    }

    /// Nodes currently suspected but not yet declared dead.
    pub fn suspects(&self) -> Vec<NodeId> {
        let mut suspects: Vec<_> = lock(&self.inner.suspects).iter().cloned().collect();
        suspects.sort();
        suspects
    }

    /// Run one failure-detection pass as of `now_ms`.
    ///
    /// Returns the nodes this pass declared dead.
    pub async fn detect_failures(&self, now_ms: i64) -> MembershipResult<Vec<NodeId>> {
        self.inner.detect_failures(now_ms).await
    }

    fn start_background(&self) {
        let mut tasks = lock(&self.inner.tasks);
        if !tasks.is_empty() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let mut views = self.inner.backend.watch();
        tasks.push(tokio::spawn(async move {
            while let Some(view) = views.next().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.apply_view(view);
            }
        }));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.refresh_interval.max(Duration::from_millis(1));
        tasks.push(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if let Err(e) = inner.detect_failures(now_millis()).await {
                    tracing::warn!(error = %e, "Membership refresh failed");
                }
            }
        }));
    }
}

impl Inner {
    fn apply_view(&self, view: ClusterMembershipView) -> bool {
        let version = view.version;
        let applied = publish_if_newer(&self.view_tx, view);
        if applied {
            tracing::debug!(version, "Applied membership view");
        }
        applied
    }

    fn is_local(&self, node_id: &NodeId) -> bool {
        lock(&self.local_node).as_ref() == Some(node_id)
    }

    async fn detect_failures(&self, now_ms: i64) -> MembershipResult<Vec<NodeId>> {
        let table = self.backend.snapshot().await?;
        self.apply_view(table.view.clone());

        let suspect_ms = self.config.suspect_after.as_millis() as i64;
        let dead_ms = suspect_ms + self.config.dead_grace.as_millis() as i64;

        let mut observed_version = table.view.version;
        let mut declared = Vec::new();

        for node in table.view.nodes.values() {
            if node.status == NodeStatus::Dead || self.is_local(&node.node_id) {
                lock(&self.suspects).remove(&node.node_id);
                continue;
            }
            let Some(age) = table.heartbeat_age_ms(&node.node_id, now_ms) else {
                continue;
            };

            if age > dead_ms {
                match self.backend.mark_dead(&node.node_id, observed_version).await? {
                    Some(view) => {
                        tracing::warn!(
                            node_id = %node.node_id,
                            heartbeat_age_ms = age,
                            version = view.version,
                            "Declared node dead"
                        );
                        observed_version = view.version;
                        self.apply_view(view);
                        lock(&self.suspects).remove(&node.node_id);
                        declared.push(node.node_id.clone());
                    }
                    // Another detector moved the view first; the next pass re-reads it.
                    None => break,
                }
            } else if age > suspect_ms {
                if lock(&self.suspects).insert(node.node_id.clone()) {
                    tracing::warn!(node_id = %node.node_id, heartbeat_age_ms = age, "Node suspected");
                }
            } else if lock(&self.suspects).remove(&node.node_id) {
                tracing::info!(node_id = %node.node_id, "Suspected node renewed its heartbeat");
            }
        }

        Ok(declared)
    }
}

#[async_trait]
impl MembershipProvider for NetworkedMembership {
    async fn join(&self, node: NodeDescriptor) -> MembershipResult<Arc<ClusterMembershipView>> {
        let node_id = node.node_id.clone();
        let view = self.inner.backend.register(node).await?;
        *lock(&self.inner.local_node) = Some(node_id.clone());
        self.inner.apply_view(view);

        // Placement only targets active members, so join completes with the first renewal.
        if self.inner.backend.renew(&node_id).await? == NodeStatus::Dead {
            return Err(MembershipError::Rejected(format!(
                "node {node_id} was declared dead while joining"
            )));
        }
        self.inner.apply_view(self.inner.backend.snapshot().await?.view);
        self.start_background();

        let view = self.current_view();
        tracing::info!(
            node_id = %node_id,
            version = view.version,
            active = view.active_count(),
            backend = self.inner.backend.name(),
            "Joined cluster"
        );
        Ok(view)
    }

    async fn heartbeat(&self, node_id: &NodeId) -> MembershipResult<HeartbeatStatus> {
        match self.inner.backend.renew(node_id).await? {
            NodeStatus::Dead => Ok(HeartbeatStatus::Dead),
            NodeStatus::Active | NodeStatus::Joining => Ok(HeartbeatStatus::Ok),
        }
    }

    async fn leave(&self, node_id: &NodeId) -> MembershipResult<()> {
        for _ in 0..LEAVE_ATTEMPTS {
            let table = self.inner.backend.snapshot().await?;
            match table.view.status_of(node_id) {
                None | Some(NodeStatus::Dead) => return Ok(()),
                Some(_) => {}
            }
            if let Some(view) = self
                .inner
                .backend
                .mark_dead(node_id, table.view.version)
                .await?
            {
                self.inner.apply_view(view);
                tracing::info!(node_id = %node_id, "Left cluster");
                return Ok(());
            }
        }
        Err(MembershipError::VersionConflict(self.current_view().version))
    }

    fn current_view(&self) -> Arc<ClusterMembershipView> {
        self.inner.view_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<ClusterMembershipView>> {
        self.inner.view_tx.subscribe()
    }

    fn stop(&self) {
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
    }

    fn name(&self) -> &str {
        "networked"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryMembershipBackend;

    fn config() -> NetworkedMembershipConfig {
        NetworkedMembershipConfig {
            suspect_after: Duration::from_millis(100),
            dead_grace: Duration::from_millis(200),
            refresh_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_apply_view_ignores_same_and_older_versions() {
        let membership =
            NetworkedMembership::new(Arc::new(InMemoryMembershipBackend::new()), config());
        let v1 = ClusterMembershipView::new(
            1,
            vec![NodeDescriptor::new("n1", "a").with_status(NodeStatus::Active)],
        );
        let v2 = v1.with_node(NodeDescriptor::new("n2", "b").with_status(NodeStatus::Active));

        assert!(membership.apply_view(v2.clone()));
        assert!(!membership.apply_view(v2.clone()));
        assert!(!membership.apply_view(v1));
        assert_eq!(*membership.current_view(), v2);
    }

    #[tokio::test]
    async fn test_suspect_then_dead() {
        let backend = InMemoryMembershipBackend::new();
        let n1 = NetworkedMembership::new(Arc::new(backend.clone()), config());
        let n2 = NetworkedMembership::new(Arc::new(backend.clone()), config());
        n1.join(NodeDescriptor::new("n1", "a")).await.unwrap();
        n2.join(NodeDescriptor::new("n2", "b")).await.unwrap();

        let now = now_millis();
        backend.set_heartbeat(&"n2".into(), now - 150).await;
        assert!(n1.detect_failures(now).await.unwrap().is_empty());
        assert_eq!(n1.suspects(), vec![NodeId::from("n2")]);

        backend.set_heartbeat(&"n2".into(), now - 400).await;
        let dead = n1.detect_failures(now).await.unwrap();
        assert_eq!(dead, vec![NodeId::from("n2")]);
        assert!(n1.suspects().is_empty());
        assert_eq!(
            n1.current_view().status_of(&"n2".into()),
            Some(NodeStatus::Dead)
        );
        assert_eq!(
            n2.heartbeat(&"n2".into()).await.unwrap(),
            HeartbeatStatus::Dead
        );
    }

    #[tokio::test]
    async fn test_renewed_heartbeat_clears_suspicion() {
        let backend = InMemoryMembershipBackend::new();
        let n1 = NetworkedMembership::new(Arc::new(backend.clone()), config());
        let n2 = NetworkedMembership::new(Arc::new(backend.clone()), config());
        n1.join(NodeDescriptor::new("n1", "a")).await.unwrap();
        n2.join(NodeDescriptor::new("n2", "b")).await.unwrap();

        let now = now_millis();
        backend.set_heartbeat(&"n2".into(), now - 150).await;
        n1.detect_failures(now).await.unwrap();
        assert_eq!(n1.suspects().len(), 1);

        backend.set_heartbeat(&"n2".into(), now).await;
        n1.detect_failures(now).await.unwrap();
        assert!(n1.suspects().is_empty());
        assert_eq!(n1.current_view().active_count(), 2);
    }

    #[tokio::test]
    async fn test_leave_marks_node_dead() {
        let backend = InMemoryMembershipBackend::new();
        let n1 = NetworkedMembership::new(Arc::new(backend.clone()), config());
        n1.join(NodeDescriptor::new("n1", "a")).await.unwrap();
        n1.leave(&"n1".into()).await.unwrap();

        assert_eq!(
            n1.current_view().status_of(&"n1".into()),
            Some(NodeStatus::Dead)
        );
        // Leaving twice is harmless.
        n1.leave(&"n1".into()).await.unwrap();
        n1.stop();
    }
}
