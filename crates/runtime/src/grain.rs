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

//! Grain logic and factories.

use crate::context::GrainContext;
use crate::state::GrainState;
use async_trait::async_trait;
use granary_core::{GrainIdentity, GrainResult};

/// Logic of one grain type.
///
/// An instance lives for one activation. Methods run one at a time, so the
/// grain may keep plain mutable fields without locking.
#[async_trait]
pub trait Grain: Send + 'static {
    /// Called once after state is loaded, before the first call.
    ///
    /// A fault here fails the activation; the grain returns to unactivated and
    /// the next call tries again.
    async fn on_activate(&mut self, _state: &mut GrainState) -> GrainResult<()> {
        Ok(())
    }

    /// Handle one call.
    async fn handle(
        &mut self,
        ctx: &mut GrainContext<'_>,
        method: &str,
        args: Vec<u8>,
    ) -> GrainResult<Vec<u8>>;

    /// Called once when the activation is discarded, before dirty state is
    /// persisted.
    async fn on_deactivate(&mut self, _state: &mut GrainState) -> GrainResult<()> {
        Ok(())
    }
}

/// Creates grains of one type.
pub trait GrainFactory: Send + Sync {
    /// Grain type this factory serves (matches [`GrainIdentity::grain_type`]).
    fn grain_type(&self) -> &str;

    /// New grain instance for `identity`.
    fn create(&self, identity: &GrainIdentity) -> Box<dyn Grain>;

    /// Named storage provider for this type; `None` uses the default provider.
    fn storage_name(&self) -> Option<&str> {
        None
    }
}

/// [`GrainFactory`] built from a closure.
pub struct FnGrainFactory<F> {
    grain_type: String,
    storage_name: Option<String>,
    create: F,
}

impl<F> FnGrainFactory<F>
where
    F: Fn(&GrainIdentity) -> Box<dyn Grain> + Send + Sync,
{
    /// Factory for `grain_type` calling `create` per activation.
    pub fn new(grain_type: impl Into<String>, create: F) -> Self {
        Self {
            grain_type: grain_type.into(),
            storage_name: None,
            create,
        }
    }

    /// Store this type's state in the named provider.
    pub fn with_storage(mut self, storage_name: impl Into<String>) -> Self {
        self.storage_name = Some(storage_name.into());
        self
    }
}

impl<F> GrainFactory for FnGrainFactory<F>
where
    F: Fn(&GrainIdentity) -> Box<dyn Grain> + Send + Sync,
{
    fn grain_type(&self) -> &str {
        &self.grain_type
    }

    fn create(&self, identity: &GrainIdentity) -> Box<dyn Grain> {
        (self.create)(identity)
    }

    fn storage_name(&self) -> Option<&str> {
        self.storage_name.as_deref()
    }
}
