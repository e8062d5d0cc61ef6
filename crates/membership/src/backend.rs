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

//! Coordination-store protocol used by [`crate::NetworkedMembership`].
//!
//! ## Protocol
//! - `register(node)`: add a member as `Joining` (or refresh a known one), bumping the view version
//! - `renew(node_id)`: record a heartbeat, answering with the member's status; the first
//!   renewal of a `Joining` member promotes it to `Active`
//! - `watch()`: stream of views, each newer than the last one delivered
//! - `snapshot()`: view plus last-heartbeat times, used by failure detection
//! - `mark_dead(node_id, observed_version)`: compare-and-set on the view version, so
//!   two detectors racing on the same expiry produce one version bump

use crate::MembershipResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use granary_core::{ClusterMembershipView, NodeDescriptor, NodeId, NodeStatus};
use std::collections::BTreeMap;

/// View plus heartbeat bookkeeping, as stored in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipTable {
    /// Current view
    pub view: ClusterMembershipView,
    /// Last heartbeat per node, unix epoch milliseconds
    pub heartbeats: BTreeMap<NodeId, i64>,
}

impl MembershipTable {
    /// Milliseconds since `node_id` last renewed, if it ever did.
    pub fn heartbeat_age_ms(&self, node_id: &NodeId, now_ms: i64) -> Option<i64> {
        self.heartbeats.get(node_id).map(|last| now_ms - last)
    }
}

/// Shared coordination store for networked membership.
#[async_trait]
pub trait MembershipBackend: Send + Sync {
    /// Register `node` as joining and return the new view.
    async fn register(&self, node: NodeDescriptor) -> MembershipResult<ClusterMembershipView>;

    /// Renew `node_id`'s heartbeat; returns the member's status after any promotion.
    async fn renew(&self, node_id: &NodeId) -> MembershipResult<NodeStatus>;

    /// Current table.
    async fn snapshot(&self) -> MembershipResult<MembershipTable>;

    /// Declare `node_id` dead if the view is still at `observed_version`.
    ///
    /// Returns the new view, or `None` when the view moved on or the node is
    /// already dead.
    async fn mark_dead(
        &self,
        node_id: &NodeId,
        observed_version: u64,
    ) -> MembershipResult<Option<ClusterMembershipView>>;

    /// Stream of views with strictly increasing versions.
    fn watch(&self) -> BoxStream<'static, ClusterMembershipView>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

/// Milliseconds since the unix epoch, the unit heartbeats are recorded in.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Next view after registering `node`, or why registration is refused.
pub(crate) fn view_with_registered(
    view: &ClusterMembershipView,
    node: NodeDescriptor,
) -> Result<Option<ClusterMembershipView>, String> {
    match view.get(&node.node_id) {
        Some(existing) if existing.status == NodeStatus::Dead => Err(format!(
            "node {} was declared dead; rejoin under a new id",
            node.node_id
        )),
        Some(existing) => {
            let node = node.with_status(existing.status);
            if *existing == node {
                Ok(None)
            } else {
                Ok(Some(view.with_node(node)))
            }
        }
        None => Ok(Some(view.with_node(node.with_status(NodeStatus::Joining)))),
    }
}

/// Next view after `node_id` renews, if that renewal promotes it out of `Joining`.
pub(crate) fn view_with_renewed(
    view: &ClusterMembershipView,
    node_id: &NodeId,
) -> Option<ClusterMembershipView> {
    match view.status_of(node_id) {
        Some(NodeStatus::Joining) => view.with_status(node_id, NodeStatus::Active),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_for_same_descriptor() {
        let view = ClusterMembershipView::empty();
        let next = view_with_registered(&view, NodeDescriptor::new("n1", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(next.version, 1);
        assert!(view_with_registered(&next, NodeDescriptor::new("n1", "a"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_new_member_joins_then_first_renewal_promotes() {
        let empty = ClusterMembershipView::empty();
        let view = view_with_registered(&empty, NodeDescriptor::new("n1", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(view.status_of(&"n1".into()), Some(NodeStatus::Joining));
        assert_eq!(view.active_count(), 0);

        let promoted = view_with_renewed(&view, &"n1".into()).unwrap();
        assert_eq!(promoted.version, 2);
        assert_eq!(promoted.status_of(&"n1".into()), Some(NodeStatus::Active));
        assert!(view_with_renewed(&promoted, &"n1".into()).is_none());
    }

    #[test]
    fn test_reregistering_keeps_active_status() {
        let view = ClusterMembershipView::new(
            3,
            vec![NodeDescriptor::new("n1", "a").with_status(NodeStatus::Active)],
        );
        assert!(view_with_registered(&view, NodeDescriptor::new("n1", "a"))
            .unwrap()
            .is_none());

        let moved = view_with_registered(&view, NodeDescriptor::new("n1", "b"))
            .unwrap()
            .unwrap();
        assert_eq!(moved.version, 4);
        assert_eq!(moved.get(&"n1".into()).unwrap().address, "b");
        assert_eq!(moved.status_of(&"n1".into()), Some(NodeStatus::Active));
    }

    #[test]
    fn test_dead_node_cannot_reregister() {
        let view = ClusterMembershipView::new(
            4,
            vec![NodeDescriptor::new("n1", "a").with_status(NodeStatus::Dead)],
        );
        assert!(view_with_registered(&view, NodeDescriptor::new("n1", "a")).is_err());
    }

    #[test]
    fn test_heartbeat_age() {
        let mut table = MembershipTable::default();
        table.heartbeats.insert("n1".into(), 1_000);
        assert_eq!(table.heartbeat_age_ms(&"n1".into(), 1_250), Some(250));
        assert_eq!(table.heartbeat_age_ms(&"n2".into(), 1_250), None);
    }
}
