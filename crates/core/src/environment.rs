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

//! Deployment environment switch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment environment, selected once at process start.
///
/// The environment only chooses *defaults* for the membership and storage
/// backends; each backend remains individually configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEnvironment {
    /// Single node: local membership, in-memory storage, console span exporter
    #[default]
    Development,
    /// Multi node: networked membership and storage
    Production,
}

impl DeploymentEnvironment {
    /// Whether this is the development environment.
    pub fn is_development(&self) -> bool {
        matches!(self, DeploymentEnvironment::Development)
    }
}

impl fmt::Display for DeploymentEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentEnvironment::Development => f.write_str("development"),
            DeploymentEnvironment::Production => f.write_str("production"),
        }
    }
}

impl FromStr for DeploymentEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(DeploymentEnvironment::Development),
            "production" | "prod" => Ok(DeploymentEnvironment::Production),
            other => Err(format!(
                "Unknown environment: {}. Valid options: development, production",
                other
            )),
        }
    }
}
