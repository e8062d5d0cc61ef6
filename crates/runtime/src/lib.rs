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

//! # Granary Grain Runtime
//!
//! ## Purpose
//! Location-transparent grain invocation. A caller names a grain by
//! [`GrainIdentity`](granary_core::GrainIdentity); the runtime finds the owning node,
//! activates the grain there if needed, runs the call with single-writer semantics
//! and returns the result or a [`GrainFault`](granary_core::GrainFault).
//!
//! ## Architecture
//! ```text
//! GrainRef::call
//!   -> outgoing FilterChain -> Router (resolve, retry, deadline)
//!        local:  incoming FilterChain -> Dispatcher -> activation mailbox
//!        remote: ClusterTransport -> peer handle_envelope (fencing)
//!                  -> incoming FilterChain -> Dispatcher -> activation mailbox
//! ```
//!
//! ## Key Components
//! - [`GrainDirectory`]: rendezvous hashing over the active membership view
//! - [`GrainRuntime`]: invoke, activation catalog, idle collection, rebalance
//! - [`Grain`] / [`GrainFactory`]: user grain logic
//! - [`GrainState`]: etag-guarded persistent state of one activation
//! - [`GrainContext`] / [`GrainRef`]: call-scoped handle for nested calls
//! - [`ClusterTransport`] / [`InProcessTransport`]: forwarding of [`CallEnvelope`]s
//!
//! ## Single-writer execution
//! Each activation is a task draining an ordered mailbox. Calls to one activation
//! run one at a time in arrival order; different activations run concurrently.
//! A caller that times out stops waiting, but its call stays queued and runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod activation;
pub mod config;
pub mod context;
pub mod directory;
pub mod grain;
pub mod runtime;
pub mod state;
pub mod transport;

pub use activation::ActivationStatus;
pub use config::RuntimeConfig;
pub use context::{GrainContext, GrainRef};
pub use directory::{placement_score, GrainDirectory, RoutingTable};
pub use grain::{FnGrainFactory, Grain, GrainFactory};
pub use runtime::{GrainRuntime, GrainRuntimeBuilder, WeakGrainRuntime};
pub use state::GrainState;
pub use transport::{
    CallEnvelope, CallResponse, ClusterTransport, EnvelopeHandler, InProcessTransport,
};
