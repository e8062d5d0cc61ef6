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

//! Grain directory.
//!
//! ## Placement
//! Rendezvous (highest-random-weight) hashing: every active node gets a score for
//! the identity and the highest score owns it. The score is a pure function of
//! node id and identity, so every node holding the same view version computes the
//! same owner, and a membership change only moves identities owned by the nodes
//! that joined or left.
//!
//! ## Publication
//! The routing table is rebuilt from a view and swapped in whole behind an
//! `Arc`; readers clone the `Arc` and never observe a partial table.

use granary_core::{
    ClusterMembershipView, GrainFault, GrainIdentity, GrainResult, NodeDescriptor, NodeId,
};
use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

/// Active nodes of one membership version, ordered by node id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingTable {
    /// Membership version the table was built from
    pub version: u64,
    /// Nodes eligible for placement
    pub nodes: Vec<NodeDescriptor>,
}

impl RoutingTable {
    /// Build from `view`, keeping active nodes only.
    pub fn from_view(view: &ClusterMembershipView) -> Self {
        Self {
            version: view.version,
            nodes: view.active_nodes().cloned().collect(),
        }
    }

    /// Owner of `identity`, if any node is active.
    pub fn owner(&self, identity: &GrainIdentity) -> Option<&NodeDescriptor> {
        let key = identity.storage_key();
        self.nodes.iter().max_by(|a, b| {
            placement_score(&a.node_id, &key)
                .cmp(&placement_score(&b.node_id, &key))
                .then_with(|| b.node_id.cmp(&a.node_id))
        })
    }
}

/// Placement score of `node_id` for a grain storage key.
///
/// FNV-1a style mixing finished with the murmur3 64-bit finalizer, so node ids
/// that differ in one trailing byte still get independent scores. Stable across
/// processes and releases.
pub fn placement_score(node_id: &NodeId, key: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for b in key.as_bytes().iter().chain(node_id.as_str().as_bytes()) {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        hash ^= hash >> 32;
    }
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^ (hash >> 33)
}

/// Routing table holder shared by every call on a node.
#[derive(Debug, Default)]
pub struct GrainDirectory {
    table: RwLock<Arc<RoutingTable>>,
}

impl GrainDirectory {
    /// Empty directory (version 0, no nodes).
    pub fn new() -> Self {
        Self::default()
    }

    /// Current routing table.
    pub fn table(&self) -> Arc<RoutingTable> {
        match self.table.read() {
            Ok(table) => table.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Membership version the directory routes with.
    pub fn version(&self) -> u64 {
        self.table().version
    }

    /// Rebuild from `view` if it is newer than the current table.
    ///
    /// Applying the same or an older version leaves the table untouched.
    pub fn apply_view(&self, view: &ClusterMembershipView) -> bool {
        let mut table = match self.table.write() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        match view.version.cmp(&table.version) {
            Ordering::Greater => {
                *table = Arc::new(RoutingTable::from_view(view));
                tracing::debug!(
                    version = view.version,
                    active = table.nodes.len(),
                    "Directory routing table updated"
                );
                true
            }
            _ => false,
        }
    }

    /// Node that owns `identity` under the current view.
    pub fn resolve(&self, identity: &GrainIdentity) -> GrainResult<NodeDescriptor> {
        let table = self.table();
        table.owner(identity).cloned().ok_or_else(|| {
            GrainFault::membership_unavailable(format!(
                "no active nodes in membership view {}",
                table.version
            ))
        })
    }
}
