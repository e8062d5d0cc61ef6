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

//! # Granary Node
//!
//! ## Purpose
//! Process-level wiring for the grain runtime: configuration presets per
//! deployment environment, backend selection, the membership heartbeat loop,
//! span export and log output.
//!
//! ## Components
//! - [`NodeConfig`]: environment presets, env var overrides and TOML loading
//! - [`NodeBuilder`]: assembles a [`GranaryNode`] from configuration
//! - [`GranaryNode`]: start, heartbeat, shutdown
//! - [`init_tracing`]: structured log output

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod node;
pub mod node_builder;
pub mod tracing_setup;

pub use config::{
    ConfigError, ConfigResult, MembershipBackendConfig, MembershipSection, NodeConfig, NodeSection,
    RuntimeSection, SpanExporterConfig, StorageSection, TracingSection, DEFINITIONS_STORAGE,
};
pub use error::{NodeError, NodeResult};
pub use node::GranaryNode;
pub use node_builder::NodeBuilder;
pub use tracing_setup::init_tracing;
