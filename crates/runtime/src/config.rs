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

//! Runtime tuning.

use std::time::Duration;

/// Grain runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Activations idle this long are deactivated
    pub idle_timeout: Duration,
    /// How often idle activations are collected
    pub collection_interval: Duration,
    /// Deadline for calls made outside any other call
    pub default_call_timeout: Duration,
    /// Automatic retries of a `Retryable` fault (never past the deadline)
    pub max_call_retries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            collection_interval: Duration::from_secs(60),
            default_call_timeout: Duration::from_secs(30),
            max_call_retries: 2,
        }
    }
}
