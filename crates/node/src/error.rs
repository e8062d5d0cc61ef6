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

//! Node error types.

use crate::config::ConfigError;
use granary_core::GrainFault;
use granary_membership::MembershipError;
use granary_storage::StorageError;
use thiserror::Error;

/// Errors raised while building or starting a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A storage provider could not be created
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The membership backend could not be created
    #[error("Membership error: {0}")]
    Membership(#[from] MembershipError),

    /// The grain runtime refused to start
    #[error("Runtime error: {0}")]
    Runtime(#[from] GrainFault),
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
