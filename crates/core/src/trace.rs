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

//! Trace context and W3C `traceparent` propagation.
//!
//! ## Purpose
//! [`TraceContext`] identifies the span that is "current" for a call. It is carried
//! explicitly in [`crate::CallContext`] and crosses process boundaries as a W3C
//! `traceparent` header string:
//!
//! ```text
//! 00-{trace_id: 32 hex}-{span_id: 16 hex}-{flags: 2 hex}
//! ```
//!
//! Id types are the OpenTelemetry ones so spans can be handed to any OTel-aware
//! exporter without conversion.

use rand::Rng;
use thiserror::Error;

pub use opentelemetry::trace::{SpanId, TraceId};

const TRACEPARENT_VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

/// Errors parsing a `traceparent` header.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceParentError {
    /// Wrong number of `-` separated fields
    #[error("traceparent must have 4 fields, got {0}")]
    FieldCount(usize),

    /// Unsupported version field
    #[error("unsupported traceparent version: {0}")]
    Version(String),

    /// A field has the wrong length or is not lowercase hex
    #[error("malformed traceparent field {field}: {value}")]
    Malformed {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },

    /// All-zero trace or span id
    #[error("traceparent carries an all-zero {0}")]
    ZeroId(&'static str),
}

/// Trace context of the span that is current for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceContext {
    /// 128-bit trace id shared by every span of one trace
    pub trace_id: TraceId,
    /// 64-bit id of the current span
    pub span_id: SpanId,
    /// Parent span, `None` for a root or for a context received from a remote peer
    pub parent_span_id: Option<SpanId>,
    /// Sampling decision, fixed at the root and inherited by every descendant
    pub sampled: bool,
}

impl TraceContext {
    /// Start a new trace with fresh ids.
    pub fn new_root(sampled: bool) -> Self {
        Self::root_with_trace_id(generate_trace_id(), sampled)
    }

    /// Start a new trace with a caller-chosen trace id.
    pub fn root_with_trace_id(trace_id: TraceId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id: generate_span_id(),
            parent_span_id: None,
            sampled,
        }
    }

    /// Child context: same trace and sampling decision, new span id, parent = `self`.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: generate_span_id(),
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
        }
    }

    /// Render as a W3C `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { FLAG_SAMPLED } else { 0 };
        format!(
            "{}-{}-{}-{:02x}",
            TRACEPARENT_VERSION, self.trace_id, self.span_id, flags
        )
    }

    /// Parse a W3C `traceparent` header value.
    ///
    /// The returned context describes the *remote* span: its `span_id` is the
    /// sender's span and `parent_span_id` is `None` (the sender's parent is not
    /// transmitted).
    pub fn from_traceparent(header: &str) -> Result<Self, TraceParentError> {
        let fields: Vec<&str> = header.trim().split('-').collect();
        if fields.len() != 4 {
            return Err(TraceParentError::FieldCount(fields.len()));
        }
        if fields[0] != TRACEPARENT_VERSION {
            return Err(TraceParentError::Version(fields[0].to_string()));
        }

        let trace_hex = checked_hex("trace_id", fields[1], 32)?;
        let span_hex = checked_hex("span_id", fields[2], 16)?;
        let flags_hex = checked_hex("flags", fields[3], 2)?;

        let malformed = |field: &'static str, value: &str| TraceParentError::Malformed {
            field,
            value: value.to_string(),
        };

        let trace_id = TraceId::from_hex(trace_hex).map_err(|_| malformed("trace_id", trace_hex))?;
        let span_id = SpanId::from_hex(span_hex).map_err(|_| malformed("span_id", span_hex))?;
        let flags = u8::from_str_radix(flags_hex, 16).map_err(|_| malformed("flags", flags_hex))?;

        if trace_id == TraceId::INVALID {
            return Err(TraceParentError::ZeroId("trace_id"));
        }
        if span_id == SpanId::INVALID {
            return Err(TraceParentError::ZeroId("span_id"));
        }

        Ok(Self {
            trace_id,
            span_id,
            parent_span_id: None,
            sampled: flags & FLAG_SAMPLED == FLAG_SAMPLED,
        })
    }
}

fn checked_hex<'a>(
    field: &'static str,
    value: &'a str,
    len: usize,
) -> Result<&'a str, TraceParentError> {
    let ok = value.len() == len
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if ok {
        Ok(value)
    } else {
        Err(TraceParentError::Malformed {
            field,
            value: value.to_string(),
        })
    }
}

/// Random non-zero trace id.
pub fn generate_trace_id() -> TraceId {
    let mut rng = rand::thread_rng();
    loop {
        let value: u128 = rng.gen();
        if value != 0 {
            return TraceId::from_bytes(value.to_be_bytes());
        }
    }
}

/// Random non-zero span id.
pub fn generate_span_id() -> SpanId {
    let mut rng = rand::thread_rng();
    loop {
        let value: u64 = rng.gen();
        if value != 0 {
            return SpanId::from_bytes(value.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_keeps_trace_and_sampling() {
        let root = TraceContext::new_root(true);
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id, Some(root.span_id));
        assert_ne!(child.span_id, root.span_id);
        assert!(child.sampled);

        let unsampled = TraceContext::new_root(false).child();
        assert!(!unsampled.sampled);
    }

    #[test]
    fn test_traceparent_format() {
        let ctx = TraceContext {
            trace_id: TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            span_id: SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            parent_span_id: None,
            sampled: true,
        };
        assert_eq!(
            ctx.to_traceparent(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        );
        assert_eq!(TraceContext::from_traceparent(&ctx.to_traceparent()).unwrap(), ctx);
    }

    #[test]
    fn test_parse_drops_parent_and_reads_flags() {
        let ctx = TraceContext::new_root(false).child();
        let parsed = TraceContext::from_traceparent(&ctx.to_traceparent()).unwrap();
        assert_eq!(parsed.trace_id, ctx.trace_id);
        assert_eq!(parsed.span_id, ctx.span_id);
        assert_eq!(parsed.parent_span_id, None);
        assert!(!parsed.sampled);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            TraceContext::from_traceparent("00-abc"),
            Err(TraceParentError::FieldCount(2))
        );
        assert!(matches!(
            TraceContext::from_traceparent("01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
            Err(TraceParentError::Version(_))
        ));
        assert!(matches!(
            TraceContext::from_traceparent("00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01"),
            Err(TraceParentError::Malformed { field: "trace_id", .. })
        ));
        assert_eq!(
            TraceContext::from_traceparent("00-00000000000000000000000000000000-00f067aa0ba902b7-01"),
            Err(TraceParentError::ZeroId("trace_id"))
        );
    }
}
