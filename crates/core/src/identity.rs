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

//! Grain identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique logical name of a grain.
///
/// ## Purpose
/// A grain reference is nothing more than an identity plus the directory's
/// `resolve()` function, so this type is the whole "address" of a grain.
/// It doubles as the directory key and the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrainIdentity {
    /// Grain type, e.g. `"Definition"`
    pub grain_type: String,
    /// Key within the type, e.g. `"peace"`
    pub key: String,
}

impl GrainIdentity {
    /// Create a new identity.
    pub fn new(grain_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            grain_type: grain_type.into(),
            key: key.into(),
        }
    }

    /// Grain type.
    pub fn grain_type(&self) -> &str {
        &self.grain_type
    }

    /// Grain key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stable string used as the storage key and as placement hash input.
    ///
    /// The type is length-prefixed so `("a/b", "c")` and `("a", "b/c")` never collide.
    pub fn storage_key(&self) -> String {
        format!("{}:{}/{}", self.grain_type.len(), self.grain_type, self.key)
    }
}

impl fmt::Display for GrainIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.grain_type, self.key)
    }
}
