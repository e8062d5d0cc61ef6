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

//! # Granary Telemetry
//!
//! ## Purpose
//! Collects spans closed by the call filters and hands them to a span exporter in
//! batches, without ever blocking the call path.
//!
//! ## Key Components
//! - [`Sampler`]: parent-based sampling with a trace-id ratio decision at the root
//! - [`TracingPipeline`]: bounded queue plus background batch worker
//! - [`SpanExporter`]: sink for finished spans ([`LoggingSpanExporter`],
//!   [`InMemorySpanExporter`])
//! - [`SpanSink`]: what the filters depend on; `record` is fire-and-forget
//!   ([`DiscardingSpanSink`] when nothing is exported)
//!
//! ## Backpressure
//! The queue is bounded. When it is full the oldest span is dropped and counted
//! (`granary_tracing_spans_dropped_total`); a slow exporter costs spans, never
//! call latency.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod exporter;
pub mod pipeline;
pub mod sampler;

pub use error::{TelemetryError, TelemetryResult};
pub use exporter::{InMemorySpanExporter, LoggingSpanExporter, SpanExporter};
pub use pipeline::{TracingPipeline, TracingPipelineConfig};
pub use sampler::Sampler;

use granary_core::Span;

/// Destination for closed spans.
pub trait SpanSink: Send + Sync {
    /// Accept a closed span. Must not block or fail the caller.
    fn record(&self, span: Span);
}

/// Sink that drops every span.
///
/// Lets the tracing filters create and propagate trace context on nodes that
/// export nowhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardingSpanSink;

impl SpanSink for DiscardingSpanSink {
    fn record(&self, _span: Span) {}
}
