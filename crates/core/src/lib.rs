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

//! # Granary Core
//!
//! ## Purpose
//! Shared data model for the Granary grain runtime. Every other crate in the
//! workspace speaks in these types:
//!
//! - [`GrainIdentity`]: logical name of a grain (type + key), used as directory key
//!   and storage key
//! - [`ClusterMembershipView`] / [`NodeDescriptor`]: the versioned set of cluster nodes
//! - [`TraceContext`] / [`CallContext`]: per-call context threaded through the filter
//!   chain and across process boundaries
//! - [`Span`]: a finished unit of traced work handed to the tracing pipeline
//! - [`GrainFault`]: the call-path error taxonomy (retryable, conflict, fatal)
//!
//! ## Design Principles
//! - **Explicit context**: the "current span" travels inside [`CallContext`], never in
//!   thread-local or task-local state
//! - **Immutable values**: contexts and views are replaced, not mutated in place
//! - **Backend agnostic**: nothing here knows about Redis, transports or exporters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call_context;
pub mod cluster;
pub mod environment;
pub mod fault;
pub mod identity;
pub mod span;
pub mod trace;

pub use call_context::{deadline_after, CallContext};
pub use cluster::{ClusterMembershipView, NodeDescriptor, NodeId, NodeStatus};
pub use environment::DeploymentEnvironment;
pub use fault::{ConflictReason, FatalReason, GrainFault, GrainResult, RetryReason};
pub use identity::GrainIdentity;
pub use span::{AttributeValue, Span, SpanKind, SpanStatus};
pub use trace::{SpanId, TraceContext, TraceId, TraceParentError};
