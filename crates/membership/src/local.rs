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

//! Single-node membership.
//!
//! ## Purpose
//! Development and single-node testing: the local process is the only member,
//! and the view never changes after the first join.

use crate::{HeartbeatStatus, MembershipError, MembershipProvider, MembershipResult};
use async_trait::async_trait;
use granary_core::{ClusterMembershipView, NodeDescriptor, NodeId, NodeStatus};
use std::sync::Arc;
use tokio::sync::watch;

/// Single-node membership table.
pub struct LocalMembership {
    view_tx: watch::Sender<Arc<ClusterMembershipView>>,
}

impl LocalMembership {
    /// Create an empty table.
    pub fn new() -> Self {
        let (view_tx, _) = watch::channel(Arc::new(ClusterMembershipView::empty()));
        Self { view_tx }
    }
}

impl Default for LocalMembership {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipProvider for LocalMembership {
    async fn join(&self, node: NodeDescriptor) -> MembershipResult<Arc<ClusterMembershipView>> {
        let current = self.current_view();
        if let Some(member) = current.nodes.values().next() {
            if member.node_id == node.node_id {
                return Ok(current);
            }
            return Err(MembershipError::Rejected(format!(
                "local membership already owned by {}",
                member.node_id
            )));
        }

        let view = Arc::new(ClusterMembershipView::new(
            1,
            vec![node.with_status(NodeStatus::Active)],
        ));
        self.view_tx.send_replace(view.clone());
        tracing::info!(version = view.version, "Joined local membership");
        Ok(view)
    }

    async fn heartbeat(&self, node_id: &NodeId) -> MembershipResult<HeartbeatStatus> {
        match self.current_view().status_of(node_id) {
            Some(NodeStatus::Active) | Some(NodeStatus::Joining) => Ok(HeartbeatStatus::Ok),
            Some(NodeStatus::Dead) => Ok(HeartbeatStatus::Dead),
            None => Err(MembershipError::NotMember(node_id.to_string())),
        }
    }

    async fn leave(&self, _node_id: &NodeId) -> MembershipResult<()> {
        // The single-node view is frozen after join; leaving just stops the process.
        Ok(())
    }

    fn current_view(&self) -> Arc<ClusterMembershipView> {
        self.view_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<ClusterMembershipView>> {
        self.view_tx.subscribe()
    }

    fn name(&self) -> &str {
        "local"
    }
}
