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

//! A running Granary node: the grain runtime plus its heartbeat loop and span pipeline.

use crate::config::NodeConfig;
use crate::error::NodeResult;
use granary_core::{GrainIdentity, NodeId};
use granary_membership::{HeartbeatStatus, MembershipProvider};
use granary_runtime::{GrainRef, GrainRuntime};
use granary_telemetry::TracingPipeline;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One process hosting grains.
pub struct GranaryNode {
    config: NodeConfig,
    runtime: GrainRuntime,
    membership: Arc<dyn MembershipProvider>,
    pipeline: Option<TracingPipeline>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl GranaryNode {
    pub(crate) fn new(
        config: NodeConfig,
        runtime: GrainRuntime,
        membership: Arc<dyn MembershipProvider>,
        pipeline: Option<TracingPipeline>,
    ) -> Self {
        Self {
            config,
            runtime,
            membership,
            pipeline,
            heartbeat: Mutex::new(None),
        }
    }

    /// Join the cluster, start serving grains and begin heartbeating.
    pub async fn start(&self) -> NodeResult<()> {
        self.runtime.start().await?;

        let period = Duration::from_millis(self.config.membership.heartbeat_interval_ms.max(1));
        let handle = spawn_heartbeat(self.membership.clone(), self.node_id().clone(), period);
        if let Some(previous) = self.lock_heartbeat().replace(handle) {
            previous.abort();
        }

        info!(
            node_id = %self.node_id(),
            environment = ?self.config.environment,
            membership = self.membership.name(),
            "Granary node started"
        );
        Ok(())
    }

    /// Stop heartbeating, deactivate every grain, leave the cluster and flush spans.
    pub async fn shutdown(&self) {
        if let Some(heartbeat) = self.lock_heartbeat().take() {
            heartbeat.abort();
        }
        self.runtime.shutdown().await;
        if let Some(pipeline) = &self.pipeline {
            pipeline.shutdown().await;
        }
        info!(node_id = %self.node_id(), "Granary node stopped");
    }

    /// The grain runtime.
    pub fn runtime(&self) -> &GrainRuntime {
        &self.runtime
    }

    /// Reference to a grain; see [`GrainRuntime::grain`].
    pub fn grain(&self, identity: GrainIdentity) -> GrainRef {
        self.runtime.grain(identity)
    }

    /// Configuration the node was built from.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// This node's id.
    pub fn node_id(&self) -> &NodeId {
        &self.runtime.local_node().node_id
    }

    /// Span pipeline, when spans are exported.
    pub fn tracing_pipeline(&self) -> Option<&TracingPipeline> {
        self.pipeline.as_ref()
    }

    fn lock_heartbeat(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.heartbeat.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn spawn_heartbeat(
    membership: Arc<dyn MembershipProvider>,
    node_id: NodeId,
    period: Duration,
) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            match membership.heartbeat(&node_id).await {
                Ok(HeartbeatStatus::Ok) => debug!(node_id = %node_id, "Heartbeat renewed"),
                Ok(HeartbeatStatus::Dead) => {
                    error!(
                        node_id = %node_id,
                        "Node was declared dead; it must restart under a new id"
                    );
                    break;
                }
                Err(e) => warn!(node_id = %node_id, error = %e, "Heartbeat failed"),
            }
        }
    })
}
