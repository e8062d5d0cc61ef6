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

//! # Granary Call Filters
//!
//! ## Purpose
//! Every grain invocation passes through two filter chains: the outgoing chain on
//! the caller's node and the incoming chain on the callee's node. Filters wrap the
//! rest of the chain, so they observe both the call and its outcome.
//!
//! ## Key Components
//! - [`GrainCallFilter`]: one interception step; calls `next.run(call)` to proceed
//! - [`FilterChain`]: ordered filters ending in a [`CallHandler`]
//! - [`OutgoingTracingFilter`] / [`IncomingTracingFilter`]: open a client/server
//!   span per call, propagate the trace context and close the span with the
//!   call's outcome
//!
//! ## Fault Propagation
//! A filter that observes a fault must return it unchanged. Filters may record
//! the fault (span status, logs); they never swallow it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod tracing_filter;

pub use chain::{CallHandler, FilterChain, GrainCall, GrainCallFilter, Next};
pub use tracing_filter::{IncomingTracingFilter, OutgoingTracingFilter, SpanAttributes};
