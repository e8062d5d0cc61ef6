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

//! Per-call context.
//!
//! ## Purpose
//! A [`CallContext`] is created for every grain invocation and carries the target
//! identity, the method name, the caller's deadline and the trace context of the
//! span that is current at call entry. Filters derive new contexts with the
//! `with_*` methods instead of mutating a shared one.
//!
//! Deadlines use `tokio::time::Instant` so paused-clock tests drive them.

use crate::{GrainIdentity, TraceContext};
use std::time::Duration;
use tokio::time::Instant;

/// Roughly thirty years; stands in for deadlines too far out to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `timeout` from now, saturating for timeouts such as `Duration::MAX`.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Context of a single grain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    target: GrainIdentity,
    method: String,
    deadline: Instant,
    trace: Option<TraceContext>,
}

impl CallContext {
    /// New context for a call originating outside any trace.
    pub fn new(target: GrainIdentity, method: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target,
            method: method.into(),
            deadline: deadline_after(timeout),
            trace: None,
        }
    }

    /// Context for a nested call made while handling `self`.
    ///
    /// Inherits the deadline and the current span, so the nested call's span
    /// becomes a child of whatever span is current for `self`.
    pub fn nested(&self, target: GrainIdentity, method: impl Into<String>) -> Self {
        Self {
            target,
            method: method.into(),
            deadline: self.deadline,
            trace: self.trace,
        }
    }

    /// Same call with a different current span.
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Same call with a different absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    /// Target grain.
    pub fn target(&self) -> &GrainIdentity {
        &self.target
    }

    /// Method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Absolute deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Span current at this point of the call path, if any.
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Time left before the deadline (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_and_remaining() {
        let ctx = CallContext::new(GrainIdentity::new("T", "k"), "get", Duration::from_secs(2));
        assert!(!ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_saturates() {
        let ctx = CallContext::new(GrainIdentity::new("T", "k"), "get", Duration::MAX);
        assert!(!ctx.is_expired());
        assert!(ctx.remaining() >= Duration::from_secs(86_400 * 365));

        let from_wire = CallContext::new(
            GrainIdentity::new("T", "k"),
            "get",
            Duration::from_millis(u64::MAX),
        );
        assert!(!from_wire.is_expired());
    }

    #[test]
    fn test_nested_inherits_trace_and_deadline() {
        let trace = TraceContext::new_root(true);
        let outer = CallContext::new(GrainIdentity::new("A", "1"), "run", Duration::from_secs(5))
            .with_trace(trace);
        let inner = outer.nested(GrainIdentity::new("B", "2"), "step");

        assert_eq!(inner.target(), &GrainIdentity::new("B", "2"));
        assert_eq!(inner.method(), "step");
        assert_eq!(inner.deadline(), outer.deadline());
        assert_eq!(inner.trace(), Some(&trace));
    }
}
