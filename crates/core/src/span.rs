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

//! Finished span records.
//!
//! A [`Span`] is opened by a call filter when it intercepts a call and closed when
//! the call (and everything nested under it) completes. Closed spans are handed to
//! the tracing pipeline, which decides whether they are exported.

use crate::trace::{SpanId, TraceContext, TraceId};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Role of a span relative to the call it measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Caller side of a grain call (outgoing filter)
    Client,
    /// Callee side of a grain call (incoming filter)
    Server,
    /// Work that is not a call boundary
    Internal,
}

/// Outcome recorded on a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    /// Not yet set
    Unset,
    /// Call completed successfully
    Ok,
    /// Call failed; carries the fault description
    Error(String),
}

/// Span attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Integer value
    I64(i64),
    /// Float value
    F64(f64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(v) => f.write_str(v),
            AttributeValue::Bool(v) => write!(f, "{v}"),
            AttributeValue::I64(v) => write!(f, "{v}"),
            AttributeValue::F64(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::I64(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::I64(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::F64(v)
    }
}

/// A timed operation within a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Trace this span belongs to
    pub trace_id: TraceId,
    /// This span's id
    pub span_id: SpanId,
    /// Parent span, `None` for the trace root
    pub parent_span_id: Option<SpanId>,
    /// Operation name (the target method for call spans)
    pub name: String,
    /// Client/server/internal
    pub kind: SpanKind,
    /// Wall-clock start
    pub start_time: SystemTime,
    /// Wall-clock end, `None` while open
    pub end_time: Option<SystemTime>,
    /// Attributes
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Outcome
    pub status: SpanStatus,
    /// Sampling decision inherited from the trace root
    pub sampled: bool,
}

impl Span {
    /// Open a span for `context`, which must already hold this span's own id.
    pub fn start(context: &TraceContext, name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            trace_id: context.trace_id,
            span_id: context.span_id,
            parent_span_id: context.parent_span_id,
            name: name.into(),
            kind,
            start_time: SystemTime::now(),
            end_time: None,
            attributes: BTreeMap::new(),
            status: SpanStatus::Unset,
            sampled: context.sampled,
        }
    }

    /// Set an attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Read an attribute.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Close the span with `status`.
    pub fn end(&mut self, status: SpanStatus) {
        self.status = status;
        self.end_time = Some(SystemTime::now());
    }

    /// Whether the span has been closed.
    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Elapsed time between start and end, if closed.
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.end_time
            .and_then(|end| end.duration_since(self.start_time).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_lifecycle() {
        let ctx = TraceContext::new_root(true).child();
        let mut span = Span::start(&ctx, "lookup", SpanKind::Server);
        assert_eq!(span.parent_span_id, ctx.parent_span_id);
        assert!(!span.is_closed());

        span.set_attribute("grain.key", "peace");
        span.set_attribute("attempt", 2i64);
        span.end(SpanStatus::Ok);

        assert!(span.is_closed());
        assert!(span.duration().is_some());
        assert_eq!(span.attribute("grain.key"), Some(&AttributeValue::from("peace")));
        assert_eq!(span.attribute("attempt").map(|v| v.to_string()), Some("2".to_string()));
    }
}
