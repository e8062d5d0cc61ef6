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

//! Cluster transport.
//!
//! ## Envelope
//! A forwarded call travels as a [`CallEnvelope`]: target, method, arguments, the
//! caller's current span as a W3C `traceparent`, the time left until the caller's
//! deadline and the membership version the caller routed with. The receiver
//! rebuilds its [`CallContext`] from these; no process-local state crosses the
//! wire.
//!
//! ## Implementations
//! [`InProcessTransport`] connects runtimes living in one process. It still
//! encodes every envelope and response with `serde_json`, so whatever works
//! in-process also survives a real wire.

use async_trait::async_trait;
use granary_core::{CallContext, GrainFault, GrainIdentity, GrainResult, NodeDescriptor, NodeId, TraceContext};
use granary_filters::GrainCall;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A grain call forwarded to its owning node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Node that forwarded the call
    pub sender: NodeId,
    /// Target grain
    pub target: GrainIdentity,
    /// Method name
    pub method: String,
    /// Serialized arguments
    pub args: Vec<u8>,
    /// Caller's current span (W3C `traceparent`)
    pub traceparent: Option<String>,
    /// Milliseconds left until the caller's deadline
    pub deadline_ms: u64,
    /// Membership version the caller resolved the owner with
    pub membership_version: u64,
}

impl CallEnvelope {
    /// Envelope for `call`.
    pub fn from_call(sender: NodeId, call: &GrainCall, membership_version: u64) -> Self {
        Self {
            sender,
            target: call.context.target().clone(),
            method: call.context.method().to_string(),
            args: call.args.clone(),
            traceparent: call.context.trace().map(TraceContext::to_traceparent),
            deadline_ms: u64::try_from(call.context.remaining().as_millis()).unwrap_or(u64::MAX),
            membership_version,
        }
    }

    /// Rebuild the call on the receiving node.
    ///
    /// An unparsable `traceparent` is logged and dropped; the call then starts a
    /// new trace.
    pub fn into_call(self) -> GrainCall {
        let mut context = CallContext::new(
            self.target,
            self.method,
            Duration::from_millis(self.deadline_ms),
        );
        if let Some(header) = self.traceparent.as_deref() {
            match TraceContext::from_traceparent(header) {
                Ok(trace) => context = context.with_trace(trace),
                Err(e) => tracing::warn!(
                    sender = %self.sender,
                    traceparent = %header,
                    error = %e,
                    "Ignoring malformed trace context"
                ),
            }
        }
        GrainCall::new(context, self.args)
    }
}

/// Outcome of a forwarded call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    /// Result bytes or the fault raised on the owning node
    pub result: Result<Vec<u8>, GrainFault>,
}

impl From<GrainResult<Vec<u8>>> for CallResponse {
    fn from(result: GrainResult<Vec<u8>>) -> Self {
        Self { result }
    }
}

/// Receiving side of a transport: a runtime accepting forwarded calls.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Handle a call forwarded by a peer.
    async fn handle_envelope(&self, envelope: CallEnvelope) -> CallResponse;
}

/// Carries envelopes between nodes.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Forward `envelope` to `target`.
    ///
    /// An unreachable node is `Retryable(StaleRouting)`: the caller's view is
    /// presumably behind, and a re-resolve may pick a live owner.
    async fn send(&self, target: &NodeDescriptor, envelope: CallEnvelope) -> GrainResult<CallResponse>;

    /// Start delivering envelopes addressed to `node_id` to `handler`.
    fn bind(&self, _node_id: &NodeId, _handler: Arc<dyn EnvelopeHandler>) {}

    /// Stop delivering envelopes addressed to `node_id`.
    fn unbind(&self, _node_id: &NodeId) {}

    /// Transport name for logs.
    fn name(&self) -> &str;
}

/// Transport between runtimes in one process.
///
/// Clones share the same endpoint table.
#[derive(Clone, Default)]
pub struct InProcessTransport {
    endpoints: Arc<RwLock<HashMap<NodeId, Arc<dyn EnvelopeHandler>>>>,
}

impl InProcessTransport {
    /// Create a transport with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes with a bound endpoint.
    pub fn bound_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = match self.endpoints.read() {
            Ok(endpoints) => endpoints.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        nodes.sort();
        nodes
    }

    fn endpoint(&self, node_id: &NodeId) -> Option<Arc<dyn EnvelopeHandler>> {
        match self.endpoints.read() {
            Ok(endpoints) => endpoints.get(node_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(node_id).cloned(),
        }
    }
}

fn encoding_fault(what: &str, err: serde_json::Error) -> GrainFault {
    GrainFault::application(format!("{what} encoding failed: {err}"))
}

#[async_trait]
impl ClusterTransport for InProcessTransport {
    async fn send(&self, target: &NodeDescriptor, envelope: CallEnvelope) -> GrainResult<CallResponse> {
        let Some(endpoint) = self.endpoint(&target.node_id) else {
            tracing::debug!(node_id = %target.node_id, "No endpoint bound for node");
            return Err(GrainFault::stale_routing());
        };

        let wire = serde_json::to_vec(&envelope).map_err(|e| encoding_fault("envelope", e))?;
        let envelope: CallEnvelope =
            serde_json::from_slice(&wire).map_err(|e| encoding_fault("envelope", e))?;

        let response = endpoint.handle_envelope(envelope).await;

        let wire = serde_json::to_vec(&response).map_err(|e| encoding_fault("response", e))?;
        serde_json::from_slice(&wire).map_err(|e| encoding_fault("response", e))
    }

    fn bind(&self, node_id: &NodeId, handler: Arc<dyn EnvelopeHandler>) {
        match self.endpoints.write() {
            Ok(mut endpoints) => endpoints.insert(node_id.clone(), handler),
            Err(poisoned) => poisoned.into_inner().insert(node_id.clone(), handler),
        };
    }

    fn unbind(&self, node_id: &NodeId) {
        match self.endpoints.write() {
            Ok(mut endpoints) => endpoints.remove(node_id),
            Err(poisoned) => poisoned.into_inner().remove(node_id),
        };
    }

    fn name(&self) -> &str {
        "in-process"
    }
}
