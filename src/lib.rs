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

//! # Granary
//!
//! A virtual-actor runtime substrate. Grains are addressed by a logical
//! identity, activated on demand on whichever node owns them under the current
//! membership view, called through an interceptor chain that propagates trace
//! context, and persist state through a pluggable provider with etag-based
//! optimistic concurrency.
//!
//! ## Crates
//! - [`core`]: identities, membership views, call context, spans, the fault taxonomy
//! - [`storage`]: grain state providers (in-memory, Redis)
//! - [`membership`]: local and networked membership
//! - [`telemetry`]: span sampling, batching and export
//! - [`filters`]: the call filter chain and tracing filters
//! - [`runtime`]: directory, activations, routing, transport
//! - [`node`]: configuration presets and node wiring
//!
//! ## Examples
//! ```rust,ignore
//! use granary::prelude::*;
//!
//! let node = NodeBuilder::new(NodeConfig::from_env()?)
//!     .register(FnGrainFactory::new("Definition", |_| Box::new(Definition) as Box<dyn Grain>)
//!         .with_storage(DEFINITIONS_STORAGE))
//!     .build()
//!     .await?;
//! node.start().await?;
//! let zh: String = node
//!     .grain(GrainIdentity::new("Definition", "peace"))
//!     .call_json("lookup", &"zh")
//!     .await?;
//! ```

pub use granary_core as core;
pub use granary_filters as filters;
pub use granary_membership as membership;
pub use granary_node as node;
pub use granary_runtime as runtime;
pub use granary_storage as storage;
pub use granary_telemetry as telemetry;

/// The types most applications need.
pub mod prelude {
    pub use granary_core::{CallContext, DeploymentEnvironment, GrainFault, GrainIdentity, GrainResult};
    pub use granary_filters::{GrainCall, GrainCallFilter, Next};
    pub use granary_node::{init_tracing, GranaryNode, NodeBuilder, NodeConfig, DEFINITIONS_STORAGE};
    pub use granary_runtime::{FnGrainFactory, Grain, GrainContext, GrainFactory, GrainRef, GrainState};
}
