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

//! Cluster membership data model.
//!
//! A [`ClusterMembershipView`] is replaced wholesale on every membership change.
//! Its `version` is a monotonic counter: consumers ignore any view whose version
//! is not newer than the one they already hold.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Liveness status of a node within a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Registered, not yet serving grains
    Joining,
    /// Serving grains; eligible for placement
    Active,
    /// Declared failed; never placed on again under this id
    Dead,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Joining => "joining",
            NodeStatus::Active => "active",
            NodeStatus::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// A node as seen in a membership view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Node identifier
    pub node_id: NodeId,
    /// Transport address (opaque to the runtime, interpreted by the transport)
    pub address: String,
    /// Current status
    pub status: NodeStatus,
}

impl NodeDescriptor {
    /// Create a descriptor in `Joining` state.
    pub fn new(node_id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            status: NodeStatus::Joining,
        }
    }

    /// Same descriptor with a different status.
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether the node is eligible for grain placement.
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// Versioned snapshot of cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMembershipView {
    /// Monotonic version, bumped on every change
    pub version: u64,
    /// Nodes keyed by id
    pub nodes: BTreeMap<NodeId, NodeDescriptor>,
}

impl ClusterMembershipView {
    /// Empty view at version 0.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a view from an explicit version and node list.
    pub fn new(version: u64, nodes: impl IntoIterator<Item = NodeDescriptor>) -> Self {
        Self {
            version,
            nodes: nodes
                .into_iter()
                .map(|n| (n.node_id.clone(), n))
                .collect(),
        }
    }

    /// Look up a node.
    pub fn get(&self, node_id: &NodeId) -> Option<&NodeDescriptor> {
        self.nodes.get(node_id)
    }

    /// Status of a node, if present.
    pub fn status_of(&self, node_id: &NodeId) -> Option<NodeStatus> {
        self.nodes.get(node_id).map(|n| n.status)
    }

    /// Active nodes, ordered by node id.
    pub fn active_nodes(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.values().filter(|n| n.is_active())
    }

    /// Number of active nodes.
    pub fn active_count(&self) -> usize {
        self.active_nodes().count()
    }

    /// Whether `self` supersedes `other`.
    pub fn is_newer_than(&self, other: &ClusterMembershipView) -> bool {
        self.version > other.version
    }

    /// Next view with `node` inserted or replaced.
    pub fn with_node(&self, node: NodeDescriptor) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.nodes.insert(node.node_id.clone(), node);
        next
    }

    /// Next view with the status of `node_id` changed.
    ///
    /// Returns `None` when the node is absent or already in `status`, so callers
    /// never publish a version bump that carries no change.
    pub fn with_status(&self, node_id: &NodeId, status: NodeStatus) -> Option<Self> {
        match self.nodes.get(node_id) {
            Some(existing) if existing.status != status => {
                let mut next = self.clone();
                next.version += 1;
                if let Some(node) = next.nodes.get_mut(node_id) {
                    node.status = status;
                }
                Some(next)
            }
            _ => None,
        }
    }
}
