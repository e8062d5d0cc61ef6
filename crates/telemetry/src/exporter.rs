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

//! Span exporters.

use crate::TelemetryResult;
use async_trait::async_trait;
use granary_core::{Span, SpanStatus};
use std::sync::{Arc, Mutex};

/// Sink for batches of finished spans.
///
/// Encoding and network transport to a collector live behind this trait.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Export one batch.
    async fn export(&self, batch: Vec<Span>) -> TelemetryResult<()>;

    /// Release resources; called once when the pipeline shuts down.
    async fn shutdown(&self) -> TelemetryResult<()> {
        Ok(())
    }

    /// Exporter name for logs.
    fn name(&self) -> &str;
}

/// Writes every span as a structured `tracing` event.
#[derive(Debug, Default, Clone)]
pub struct LoggingSpanExporter;

impl LoggingSpanExporter {
    /// Create the exporter.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SpanExporter for LoggingSpanExporter {
    async fn export(&self, batch: Vec<Span>) -> TelemetryResult<()> {
        for span in batch {
            let duration_us = span.duration().map(|d| d.as_micros() as u64).unwrap_or(0);
            let parent = span
                .parent_span_id
                .map(|id| id.to_string())
                .unwrap_or_default();
            let error = match &span.status {
                SpanStatus::Error(msg) => msg.as_str(),
                _ => "",
            };
            tracing::info!(
                target: "granary::spans",
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = %parent,
                kind = ?span.kind,
                duration_us,
                error,
                "{}",
                span.name
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Keeps exported spans in memory for inspection.
#[derive(Debug, Default, Clone)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<Span>>>,
}

impl InMemorySpanExporter {
    /// Create an empty exporter; clones share the same buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// All spans exported so far, in export order.
    pub fn spans(&self) -> Vec<Span> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Exported spans with the given name.
    pub fn spans_named(&self, name: &str) -> Vec<Span> {
        self.spans().into_iter().filter(|s| s.name == name).collect()
    }

    /// Forget exported spans.
    pub fn reset(&self) {
        match self.spans.lock() {
            Ok(mut spans) => spans.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[async_trait]
impl SpanExporter for InMemorySpanExporter {
    async fn export(&self, batch: Vec<Span>) -> TelemetryResult<()> {
        match self.spans.lock() {
            Ok(mut spans) => spans.extend(batch),
            Err(poisoned) => poisoned.into_inner().extend(batch),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
