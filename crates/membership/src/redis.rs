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

//! Redis coordination store for networked membership.
//!
//! ## Layout
//! - `{namespace}:membership:view`: hash with `version` (integer) and `view` (JSON)
//! - `{namespace}:membership:heartbeats`: hash of node id to last heartbeat (epoch ms)
//!
//! ## Concurrency
//! View updates are read-modify-write guarded by a Lua compare-and-set on
//! `version`; a losing writer re-reads and retries a bounded number of times.
//! `watch()` polls the version, since a view change is rare and must never be
//! missed (pub/sub would drop messages while a node reconnects).

use crate::backend::{
    now_millis, view_with_registered, view_with_renewed, MembershipBackend, MembershipTable,
};
use crate::{MembershipError, MembershipResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use granary_core::{ClusterMembershipView, NodeDescriptor, NodeId, NodeStatus};
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Duration;

const MAX_CAS_ATTEMPTS: usize = 8;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `KEYS[1]` view hash; `ARGV[1]` expected version; `ARGV[2]` new version;
/// `ARGV[3]` view JSON. Returns 1 when applied, 0 when the version moved.
const CAS_VIEW_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], 'version') or '0')
if current == tonumber(ARGV[1]) then
  redis.call('HSET', KEYS[1], 'version', ARGV[2], 'view', ARGV[3])
  return 1
end
return 0
"#;

/// Redis-backed membership store.
pub struct RedisMembershipBackend {
    manager: ConnectionManager,
    view_key: String,
    heartbeats_key: String,
    cas_script: Script,
    poll_interval: Duration,
}

impl RedisMembershipBackend {
    /// Connect to Redis.
    ///
    /// ## Arguments
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `namespace` - Key prefix shared by every node of one cluster
    pub async fn new(url: &str, namespace: &str) -> MembershipResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        let namespace = namespace.trim_end_matches(':');

        tracing::info!(url = %url, namespace = %namespace, "Connected Redis membership store");

        Ok(Self {
            manager,
            view_key: format!("{}:membership:view", namespace),
            heartbeats_key: format!("{}:membership:heartbeats", namespace),
            cas_script: Script::new(CAS_VIEW_SCRIPT),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override how often `watch()` polls for a new view.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn compare_and_set(
        &self,
        expected_version: u64,
        next: &ClusterMembershipView,
    ) -> MembershipResult<bool> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(next)?;
        let applied: i32 = self
            .cas_script
            .key(&self.view_key)
            .arg(expected_version)
            .arg(next.version)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn touch(&self, node_id: &NodeId) -> MembershipResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .hset(&self.heartbeats_key, node_id.as_str(), now_millis())
            .await?;
        Ok(())
    }
}

async fn read_view(
    conn: &mut ConnectionManager,
    view_key: &str,
) -> MembershipResult<ClusterMembershipView> {
    let json: Option<String> = conn.hget(view_key, "view").await?;
    match json {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(ClusterMembershipView::empty()),
    }
}

#[async_trait]
impl MembershipBackend for RedisMembershipBackend {
    async fn register(&self, node: NodeDescriptor) -> MembershipResult<ClusterMembershipView> {
        let mut conn = self.manager.clone();
        let node_id = node.node_id.clone();

        for _ in 0..MAX_CAS_ATTEMPTS {
            let view = read_view(&mut conn, &self.view_key).await?;
            let next = view_with_registered(&view, node.clone()).map_err(MembershipError::Rejected)?;
            self.touch(&node_id).await?;

            let Some(next) = next else {
                return Ok(view);
            };
            if self.compare_and_set(view.version, &next).await? {
                return Ok(next);
            }
            tracing::debug!(node_id = %node_id, version = view.version, "Membership CAS lost, retrying");
        }
        Err(MembershipError::VersionConflict(
            read_view(&mut conn, &self.view_key).await?.version,
        ))
    }

    async fn renew(&self, node_id: &NodeId) -> MembershipResult<NodeStatus> {
        let mut conn = self.manager.clone();

        for _ in 0..MAX_CAS_ATTEMPTS {
            let view = read_view(&mut conn, &self.view_key).await?;
            let status = view
                .status_of(node_id)
                .ok_or_else(|| MembershipError::NotMember(node_id.to_string()))?;
            if status == NodeStatus::Dead {
                return Ok(status);
            }
            self.touch(node_id).await?;

            let Some(next) = view_with_renewed(&view, node_id) else {
                return Ok(status);
            };
            if self.compare_and_set(view.version, &next).await? {
                tracing::info!(node_id = %node_id, version = next.version, "Promoted member to active");
                return Ok(NodeStatus::Active);
            }
        }
        Err(MembershipError::VersionConflict(
            read_view(&mut conn, &self.view_key).await?.version,
        ))
    }

    async fn snapshot(&self) -> MembershipResult<MembershipTable> {
        let mut conn = self.manager.clone();
        let view = read_view(&mut conn, &self.view_key).await?;
        let heartbeats: HashMap<String, i64> = conn.hgetall(&self.heartbeats_key).await?;

        Ok(MembershipTable {
            view,
            heartbeats: heartbeats
                .into_iter()
                .map(|(id, at)| (NodeId::from(id), at))
                .collect(),
        })
    }

    async fn mark_dead(
        &self,
        node_id: &NodeId,
        observed_version: u64,
    ) -> MembershipResult<Option<ClusterMembershipView>> {
        let mut conn = self.manager.clone();
        let view = read_view(&mut conn, &self.view_key).await?;
        if view.version != observed_version {
            return Ok(None);
        }
        let Some(next) = view.with_status(node_id, NodeStatus::Dead) else {
            return Ok(None);
        };

        if self.compare_and_set(observed_version, &next).await? {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    fn watch(&self) -> BoxStream<'static, ClusterMembershipView> {
        let state = (
            self.manager.clone(),
            self.view_key.clone(),
            0u64,
            self.poll_interval,
        );

        stream::unfold(state, |(mut conn, key, last_version, period)| async move {
            loop {
                match read_view(&mut conn, &key).await {
                    Ok(view) if view.version > last_version => {
                        let version = view.version;
                        return Some((view, (conn, key, version, period)));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Failed to poll membership view"),
                }
                tokio::time::sleep(period).await;
            }
        })
        .boxed()
    }

    fn name(&self) -> &str {
        "redis"
    }
}
