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

//! In-memory coordination store.
//!
//! ## Purpose
//! Shared by several in-process nodes (one `Arc` handed to each node's
//! [`crate::NetworkedMembership`]), so networked membership, failure detection and
//! view broadcast can run without Redis.
//!
//! ## Limitations
//! - Not persistent
//! - Not shared across processes

use crate::backend::{
    now_millis, view_with_registered, view_with_renewed, MembershipBackend, MembershipTable,
};
use crate::{MembershipError, MembershipResult};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use granary_core::{ClusterMembershipView, NodeDescriptor, NodeId, NodeStatus};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;

/// In-memory coordination store.
#[derive(Clone)]
pub struct InMemoryMembershipBackend {
    table: Arc<Mutex<MembershipTable>>,
    views: Arc<watch::Sender<ClusterMembershipView>>,
}

impl InMemoryMembershipBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        let (views, _) = watch::channel(ClusterMembershipView::empty());
        Self {
            table: Arc::new(Mutex::new(MembershipTable::default())),
            views: Arc::new(views),
        }
    }

    /// Overwrite a node's last heartbeat (tests use this to age a node).
    pub async fn set_heartbeat(&self, node_id: &NodeId, at_ms: i64) {
        self.table.lock().await.heartbeats.insert(node_id.clone(), at_ms);
    }

    fn broadcast(&self, view: &ClusterMembershipView) {
        self.views.send_replace(view.clone());
    }
}

impl Default for InMemoryMembershipBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipBackend for InMemoryMembershipBackend {
    async fn register(&self, node: NodeDescriptor) -> MembershipResult<ClusterMembershipView> {
        let mut table = self.table.lock().await;
        let node_id = node.node_id.clone();

        let next = view_with_registered(&table.view, node).map_err(MembershipError::Rejected)?;
        table.heartbeats.insert(node_id, now_millis());

        if let Some(next) = next {
            table.view = next;
            self.broadcast(&table.view);
        }
        Ok(table.view.clone())
    }

    async fn renew(&self, node_id: &NodeId) -> MembershipResult<NodeStatus> {
        let mut table = self.table.lock().await;
        let status = table
            .view
            .status_of(node_id)
            .ok_or_else(|| MembershipError::NotMember(node_id.to_string()))?;

        if status == NodeStatus::Dead {
            return Ok(status);
        }
        table.heartbeats.insert(node_id.clone(), now_millis());

        match view_with_renewed(&table.view, node_id) {
            Some(next) => {
                table.view = next;
                self.broadcast(&table.view);
                tracing::info!(
                    node_id = %node_id,
                    version = table.view.version,
                    "Promoted member to active"
                );
                Ok(NodeStatus::Active)
            }
            None => Ok(status),
        }
    }

    async fn snapshot(&self) -> MembershipResult<MembershipTable> {
        Ok(self.table.lock().await.clone())
    }

    async fn mark_dead(
        &self,
        node_id: &NodeId,
        observed_version: u64,
    ) -> MembershipResult<Option<ClusterMembershipView>> {
        let mut table = self.table.lock().await;
        if table.view.version != observed_version {
            return Ok(None);
        }

        match table.view.with_status(node_id, NodeStatus::Dead) {
            Some(next) => {
                table.view = next;
                self.broadcast(&table.view);
                Ok(Some(table.view.clone()))
            }
            None => Ok(None),
        }
    }

    fn watch(&self) -> BoxStream<'static, ClusterMembershipView> {
        WatchStream::new(self.views.subscribe())
            .filter(|view| futures::future::ready(view.version > 0))
            .boxed()
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
