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

//! Batching span pipeline.
//!
//! ## Design
//! ```text
//! filters --record()--> [bounded queue] --worker (size or interval)--> exporter
//! ```
//! - `record` takes a short synchronous lock and never awaits
//! - the worker wakes when a batch is full or every `flush_interval`
//! - exports are serialized, so `flush()` returning means every span recorded
//!   before the call has been handed to the exporter

use crate::{SpanExporter, SpanSink};
use granary_core::Span;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Pipeline sizing.
#[derive(Debug, Clone)]
pub struct TracingPipelineConfig {
    /// Maximum queued spans before the oldest is dropped
    pub queue_capacity: usize,
    /// Spans per export call
    pub max_batch_size: usize,
    /// Longest a span waits in the queue when batches do not fill up
    pub flush_interval: Duration,
}

impl Default for TracingPipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2048,
            max_batch_size: 512,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Bounded, batching span pipeline.
#[derive(Clone)]
pub struct TracingPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    exporter: Arc<dyn SpanExporter>,
    config: TracingPipelineConfig,
    queue: Mutex<VecDeque<Span>>,
    wake: Arc<Notify>,
    export_lock: tokio::sync::Mutex<()>,
    dropped: AtomicU64,
    exported: AtomicU64,
    overflowing: AtomicBool,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TracingPipeline {
    /// Create the pipeline and start its batch worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(exporter: Arc<dyn SpanExporter>, config: TracingPipelineConfig) -> Self {
        let config = TracingPipelineConfig {
            queue_capacity: config.queue_capacity.max(1),
            max_batch_size: config.max_batch_size.max(1),
            ..config
        };
        let inner = Arc::new(Inner {
            exporter,
            queue: Mutex::new(VecDeque::with_capacity(config.queue_capacity)),
            wake: Arc::new(Notify::new()),
            export_lock: tokio::sync::Mutex::new(()),
            dropped: AtomicU64::new(0),
            exported: AtomicU64::new(0),
            overflowing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            worker: Mutex::new(None),
            config,
        });

        let period = inner.config.flush_interval.max(Duration::from_millis(1));
        let handle = spawn_worker(Arc::downgrade(&inner), inner.wake.clone(), period);
        *inner.lock_worker() = Some(handle);

        tracing::debug!(
            exporter = inner.exporter.name(),
            queue_capacity = inner.config.queue_capacity,
            max_batch_size = inner.config.max_batch_size,
            "Tracing pipeline started"
        );
        Self { inner }
    }

    /// Queue a closed span for export. Unsampled spans are discarded.
    pub fn record(&self, span: Span) {
        self.inner.record(span);
    }

    /// Export everything queued so far.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Spans dropped because the queue was full or the pipeline was closed.
    pub fn dropped_spans(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Spans handed to the exporter successfully.
    pub fn exported_spans(&self) -> u64 {
        self.inner.exported.load(Ordering::Relaxed)
    }

    /// Spans waiting in the queue.
    pub fn queued_spans(&self) -> usize {
        self.inner.lock_queue().len()
    }

    /// Stop the worker, export what is queued and shut the exporter down.
    ///
    /// Spans recorded afterwards are dropped.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.inner.lock_worker().take() {
            worker.abort();
        }
        self.inner.flush().await;
        if let Err(e) = self.inner.exporter.shutdown().await {
            tracing::warn!(error = %e, exporter = self.inner.exporter.name(), "Span exporter shutdown failed");
        }
        tracing::debug!(
            exported = self.exported_spans(),
            dropped = self.dropped_spans(),
            "Tracing pipeline shut down"
        );
    }
}

impl SpanSink for TracingPipeline {
    fn record(&self, span: Span) {
        self.inner.record(span);
    }
}

fn spawn_worker(inner: Weak<Inner>, wake: Arc<Notify>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = wake.notified() => {}
                _ = ticker.tick() => {}
            }
            let Some(inner) = inner.upgrade() else { break };
            inner.flush().await;
        }
    })
}

impl Inner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Span>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn count_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
        metrics::counter!("granary_tracing_spans_dropped_total").increment(n);
    }

    fn record(&self, span: Span) {
        if !span.sampled {
            return;
        }
        if self.closed.load(Ordering::Acquire) {
            self.count_dropped(1);
            return;
        }

        let batch_ready = {
            let mut queue = self.lock_queue();
            if queue.len() >= self.config.queue_capacity {
                queue.pop_front();
                self.count_dropped(1);
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        queue_capacity = self.config.queue_capacity,
                        "Span queue full, dropping oldest spans"
                    );
                }
            }
            queue.push_back(span);
            queue.len() >= self.config.max_batch_size
        };

        if batch_ready {
            self.wake.notify_one();
        }
    }

    async fn flush(&self) {
        while self.export_batch().await > 0 {}
    }

    async fn export_batch(&self) -> usize {
        let _exporting = self.export_lock.lock().await;
        let batch: Vec<Span> = {
            let mut queue = self.lock_queue();
            let n = queue.len().min(self.config.max_batch_size);
            let batch = queue.drain(..n).collect();
            if queue.is_empty() {
                self.overflowing.store(false, Ordering::Relaxed);
            }
            batch
        };
        let n = batch.len();
        if n == 0 {
            return 0;
        }

        match self.exporter.export(batch).await {
            Ok(()) => {
                self.exported.fetch_add(n as u64, Ordering::Relaxed);
                metrics::counter!("granary_tracing_spans_exported_total").increment(n as u64);
            }
            Err(e) => {
                // Spans in a failed batch are lost; the pipeline keeps running.
                tracing::warn!(
                    error = %e,
                    exporter = self.exporter.name(),
                    spans = n,
                    "Span export failed"
                );
                self.count_dropped(n as u64);
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemorySpanExporter, TelemetryError, TelemetryResult};
    use async_trait::async_trait;
    use granary_core::{SpanKind, SpanStatus, TraceContext};

    fn span(name: &str, sampled: bool) -> Span {
        let mut span = Span::start(&TraceContext::new_root(sampled), name, SpanKind::Server);
        span.end(SpanStatus::Ok);
        span
    }

    fn config(capacity: usize, batch: usize) -> TracingPipelineConfig {
        TracingPipelineConfig {
            queue_capacity: capacity,
            max_batch_size: batch,
            flush_interval: Duration::from_secs(3600),
        }
    }

    struct FailingExporter;

    #[async_trait]
    impl SpanExporter for FailingExporter {
        async fn export(&self, _batch: Vec<Span>) -> TelemetryResult<()> {
            Err(TelemetryError::ExportFailed("collector unreachable".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_flush_exports_sampled_spans_only() {
        let exporter = InMemorySpanExporter::new();
        let pipeline = TracingPipeline::new(Arc::new(exporter.clone()), config(16, 8));

        pipeline.record(span("kept", true));
        pipeline.record(span("discarded", false));
        pipeline.flush().await;

        let names: Vec<_> = exporter.spans().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["kept".to_string()]);
        assert_eq!(pipeline.exported_spans(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let exporter = InMemorySpanExporter::new();
        // Batch size above capacity so the worker is never woken by size.
        let pipeline = TracingPipeline::new(Arc::new(exporter.clone()), config(2, 100));

        pipeline.record(span("first", true));
        pipeline.record(span("second", true));
        pipeline.record(span("third", true));
        assert_eq!(pipeline.dropped_spans(), 1);
        assert_eq!(pipeline.queued_spans(), 2);

        pipeline.flush().await;
        let names: Vec<_> = exporter.spans().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["second".to_string(), "third".to_string()]);
    }

    #[tokio::test]
    async fn test_export_failure_is_counted_not_raised() {
        let pipeline = TracingPipeline::new(Arc::new(FailingExporter), config(16, 8));
        pipeline.record(span("lost", true));
        pipeline.flush().await;

        assert_eq!(pipeline.exported_spans(), 0);
        assert_eq!(pipeline.dropped_spans(), 1);
        assert_eq!(pipeline.queued_spans(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_rejects_late_spans() {
        let exporter = InMemorySpanExporter::new();
        let pipeline = TracingPipeline::new(Arc::new(exporter.clone()), config(16, 8));
        pipeline.record(span("before", true));
        pipeline.shutdown().await;
        pipeline.record(span("after", true));

        assert_eq!(exporter.spans().len(), 1);
        assert_eq!(pipeline.dropped_spans(), 1);
    }
}
