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

//! Sampling decisions.
//!
//! The decision is made once, when a trace starts, from the trace id; every
//! descendant span inherits it through [`TraceContext::sampled`]. Because the
//! decision is a pure function of the trace id, two nodes starting spans for the
//! same trace id agree without coordination.

use granary_core::trace::generate_trace_id;
use granary_core::{TraceContext, TraceId};

/// Parent-based sampler with a trace-id ratio at the root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    ratio: f64,
}

impl Sampler {
    /// Sample every trace.
    pub fn always_on() -> Self {
        Self { ratio: 1.0 }
    }

    /// Sample no trace.
    pub fn always_off() -> Self {
        Self { ratio: 0.0 }
    }

    /// Sample roughly `ratio` of traces; clamped to `[0.0, 1.0]`.
    pub fn ratio(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        Self { ratio }
    }

    /// Configured ratio.
    pub fn sampling_ratio(&self) -> f64 {
        self.ratio
    }

    /// Root decision for `trace_id`.
    pub fn should_sample(&self, trace_id: TraceId) -> bool {
        if self.ratio >= 1.0 {
            return true;
        }
        if self.ratio <= 0.0 {
            return false;
        }
        let bytes = trace_id.to_bytes();
        let mut low = [0u8; 8];
        low.copy_from_slice(&bytes[8..]);
        let threshold = (self.ratio * u64::MAX as f64) as u64;
        u64::from_be_bytes(low) < threshold
    }

    /// Start a new trace, deciding whether it is sampled.
    pub fn start_trace(&self) -> TraceContext {
        let trace_id = generate_trace_id();
        TraceContext::root_with_trace_id(trace_id, self.should_sample(trace_id))
    }

    /// Child of `parent` if present, otherwise a new root.
    pub fn child_or_root(&self, parent: Option<&TraceContext>) -> TraceContext {
        match parent {
            Some(parent) => parent.child(),
            None => self.start_trace(),
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::always_on()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_id(low: u64) -> TraceId {
        TraceId::from_bytes((u128::from(low)).to_be_bytes())
    }

    #[test]
    fn test_always_on_and_off() {
        assert!(Sampler::always_on().start_trace().sampled);
        assert!(!Sampler::always_off().start_trace().sampled);
    }

    #[test]
    fn test_ratio_uses_low_trace_id_bits() {
        let sampler = Sampler::ratio(0.5);
        assert!(sampler.should_sample(trace_id(1)));
        assert!(!sampler.should_sample(trace_id(u64::MAX)));
    }

    #[test]
    fn test_ratio_is_clamped() {
        assert_eq!(Sampler::ratio(7.0).sampling_ratio(), 1.0);
        assert_eq!(Sampler::ratio(-1.0).sampling_ratio(), 0.0);
        assert_eq!(Sampler::ratio(f64::NAN).sampling_ratio(), 0.0);
    }

    #[test]
    fn test_child_inherits_parent_decision() {
        let parent = TraceContext::new_root(false);
        let child = Sampler::always_on().child_or_root(Some(&parent));
        assert!(!child.sampled);
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.parent_span_id, Some(parent.span_id));
    }
}
