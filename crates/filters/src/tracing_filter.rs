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

//! # Trace-propagating call filters
//!
//! ## Purpose
//! Give every grain call a client span on the caller's node and a server span on
//! the callee's node, linked into one trace:
//!
//! ```text
//! server(A)                      <- current span while A's method runs
//!   └─ client(A -> B)            <- OutgoingTracingFilter on A's node
//!        └─ server(B)            <- IncomingTracingFilter on B's node
//! ```
//!
//! ## Design
//! - The current span travels in [`CallContext::trace`]; a filter replaces it with
//!   its own span before calling `next`, so everything downstream (including the
//!   wire envelope) sees the new span as parent
//! - With no current span the filter starts a new trace; the [`Sampler`] decides
//!   sampling once, at the root
//! - The span is closed after `next` returns and handed to the [`SpanSink`]; the
//!   call's result is returned unchanged

use crate::chain::{GrainCall, GrainCallFilter, Next};
use async_trait::async_trait;
use granary_core::{CallContext, GrainResult, NodeId, Span, SpanKind, SpanStatus};
use granary_telemetry::{Sampler, SpanSink};
use std::sync::Arc;

/// Attributes stamped on every span a tracing filter opens.
#[derive(Debug, Clone, Default)]
pub struct SpanAttributes {
    /// `service.name`
    pub service_name: Option<String>,
    /// `node.id`
    pub node_id: Option<NodeId>,
}

impl SpanAttributes {
    /// Attributes for `service_name` running on `node_id`.
    pub fn new(service_name: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            service_name: Some(service_name.into()),
            node_id: Some(node_id),
        }
    }
}

struct SpanRecorder {
    sink: Arc<dyn SpanSink>,
    sampler: Sampler,
    attributes: SpanAttributes,
}

impl SpanRecorder {
    async fn traced(&self, kind: SpanKind, call: GrainCall, next: Next<'_>) -> GrainResult<Vec<u8>> {
        let trace = self.sampler.child_or_root(call.context.trace());
        let mut span = Span::start(&trace, span_name(&call.context), kind);
        self.stamp(&mut span, &call.context);

        let result = next.run(call.map_context(|ctx| ctx.with_trace(trace))).await;

        match &result {
            Ok(_) => span.end(SpanStatus::Ok),
            Err(fault) => {
                span.set_attribute("error.kind", fault.kind());
                span.end(SpanStatus::Error(fault.to_string()));
                tracing::debug!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    fault = %fault,
                    "Grain call failed"
                );
            }
        }
        self.sink.record(span);
        result
    }

    fn stamp(&self, span: &mut Span, ctx: &CallContext) {
        if let Some(service) = &self.attributes.service_name {
            span.set_attribute("service.name", service.as_str());
        }
        if let Some(node_id) = &self.attributes.node_id {
            span.set_attribute("node.id", node_id.as_str());
        }
        span.set_attribute("grain.type", ctx.target().grain_type());
        span.set_attribute("grain.key", ctx.target().key());
        span.set_attribute("grain.method", ctx.method());
    }
}

fn span_name(ctx: &CallContext) -> String {
    format!("{}.{}", ctx.target().grain_type(), ctx.method())
}

/// Caller-side filter: opens a client span around the outbound call.
pub struct OutgoingTracingFilter {
    recorder: SpanRecorder,
}

impl OutgoingTracingFilter {
    /// Create the filter.
    pub fn new(sink: Arc<dyn SpanSink>, sampler: Sampler, attributes: SpanAttributes) -> Self {
        Self {
            recorder: SpanRecorder {
                sink,
                sampler,
                attributes,
            },
        }
    }
}

#[async_trait]
impl GrainCallFilter for OutgoingTracingFilter {
    async fn invoke(&self, call: GrainCall, next: Next<'_>) -> GrainResult<Vec<u8>> {
        self.recorder.traced(SpanKind::Client, call, next).await
    }

    fn name(&self) -> &str {
        "outgoing-tracing"
    }

    fn priority(&self) -> i32 {
        100
    }
}

/// Callee-side filter: opens a server span whose parent is the caller's span.
pub struct IncomingTracingFilter {
    recorder: SpanRecorder,
}

impl IncomingTracingFilter {
    /// Create the filter.
    pub fn new(sink: Arc<dyn SpanSink>, sampler: Sampler, attributes: SpanAttributes) -> Self {
        Self {
            recorder: SpanRecorder {
                sink,
                sampler,
                attributes,
            },
        }
    }
}

#[async_trait]
impl GrainCallFilter for IncomingTracingFilter {
    async fn invoke(&self, call: GrainCall, next: Next<'_>) -> GrainResult<Vec<u8>> {
        self.recorder.traced(SpanKind::Server, call, next).await
    }

    fn name(&self) -> &str {
        "incoming-tracing"
    }

    fn priority(&self) -> i32 {
        100
    }
}
