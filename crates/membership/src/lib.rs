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

//! # Granary Cluster Membership
//!
//! ## Purpose
//! Maintains the list of live nodes and detects failures. The grain directory
//! routes purely from the [`ClusterMembershipView`] published here, so only
//! membership changes need agreement; routing itself needs no consensus round.
//!
//! ## Key Components
//! - [`MembershipProvider`]: capability interface (`join` / `heartbeat` / `current_view`)
//! - [`LocalMembership`]: the process is the only member; the view never changes
//!   after join
//! - [`NetworkedMembership`]: nodes register in a shared coordination store through a
//!   [`MembershipBackend`]; failures are detected by heartbeat expiry
//! - [`InMemoryMembershipBackend`]: coordination store shared by in-process nodes
//! - `RedisMembershipBackend`: coordination store in Redis (feature: `redis-backend`)
//!
//! ## Publication
//! Views are published through a `tokio::sync::watch` channel holding an
//! `Arc<ClusterMembershipView>`: readers always get a complete view, and a view is
//! only replaced by one with a strictly higher version.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use granary_core::{ClusterMembershipView, NodeDescriptor, NodeId};
use std::sync::Arc;
use tokio::sync::watch;

pub mod backend;
pub mod error;
pub mod local;
pub mod networked;
pub mod shared;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use backend::{MembershipBackend, MembershipTable};
pub use error::{MembershipError, MembershipResult};
pub use local::LocalMembership;
pub use networked::{NetworkedMembership, NetworkedMembershipConfig};
pub use shared::InMemoryMembershipBackend;

#[cfg(feature = "redis-backend")]
pub use redis::RedisMembershipBackend;

/// Answer to a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// The node is a live member
    Ok,
    /// The node has been declared dead and must not serve grains under this id
    Dead,
}

/// Cluster membership capability.
///
/// Any implementation satisfying this contract can back the grain runtime.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// Register `node` as an active member and return the resulting view.
    async fn join(&self, node: NodeDescriptor) -> MembershipResult<Arc<ClusterMembershipView>>;

    /// Renew `node_id`'s liveness.
    async fn heartbeat(&self, node_id: &NodeId) -> MembershipResult<HeartbeatStatus>;

    /// Leave the cluster gracefully.
    async fn leave(&self, node_id: &NodeId) -> MembershipResult<()>;

    /// Latest view (atomic snapshot).
    fn current_view(&self) -> Arc<ClusterMembershipView>;

    /// Receiver notified whenever a newer view is published.
    fn subscribe(&self) -> watch::Receiver<Arc<ClusterMembershipView>>;

    /// Stop background work.
    fn stop(&self) {}

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Publish `view` on `tx` if it is newer than the current one.
///
/// Returns whether the view was applied. Applying the same or an older version
/// is a no-op, which makes view delivery idempotent and monotonic.
pub fn publish_if_newer(
    tx: &watch::Sender<Arc<ClusterMembershipView>>,
    view: ClusterMembershipView,
) -> bool {
    tx.send_if_modified(|current| {
        if view.is_newer_than(current) {
            *current = Arc::new(view);
            true
        } else {
            false
        }
    })
}
