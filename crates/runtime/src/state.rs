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

//! Persistent state of one activation.
//!
//! ## Design
//! The state remembers the etag it last read or wrote. `write()` hands that etag to
//! the storage provider as the expected version, so a write racing another
//! activation of the same grain fails with `Conflict(StaleEtag)` instead of
//! overwriting it. `set()` only marks the state dirty; dirty state is persisted on
//! `write()` or when the activation is deactivated.

use granary_core::{GrainFault, GrainIdentity, GrainResult};
use granary_storage::{Etag, StorageProvider};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Etag-guarded state blob of a grain.
pub struct GrainState {
    identity: GrainIdentity,
    provider: Arc<dyn StorageProvider>,
    value: Option<Vec<u8>>,
    etag: Option<Etag>,
    dirty: bool,
}

impl GrainState {
    /// Unloaded state bound to `provider`.
    pub fn new(identity: GrainIdentity, provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            identity,
            provider,
            value: None,
            etag: None,
            dirty: false,
        }
    }

    /// Grain this state belongs to.
    pub fn identity(&self) -> &GrainIdentity {
        &self.identity
    }

    /// Current value, `None` when nothing has been stored or set.
    pub fn get(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Current value decoded from JSON.
    pub fn get_json<T: DeserializeOwned>(&self) -> GrainResult<Option<T>> {
        self.value
            .as_deref()
            .map(|bytes| serde_json::from_slice::<T>(bytes))
            .transpose()
            .map_err(|e| GrainFault::application(format!("corrupt state for {}: {}", self.identity, e)))
    }

    /// Replace the value and mark it dirty.
    pub fn set(&mut self, value: Vec<u8>) {
        self.value = Some(value);
        self.dirty = true;
    }

    /// Replace the value with `value` encoded as JSON.
    pub fn set_json<T: Serialize>(&mut self, value: &T) -> GrainResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| GrainFault::application(format!("unserializable state: {e}")))?;
        self.set(bytes);
        Ok(())
    }

    /// Etag of the last read or write, `None` if nothing is stored.
    pub fn etag(&self) -> Option<&Etag> {
        self.etag.as_ref()
    }

    /// Whether a stored record exists.
    pub fn exists(&self) -> bool {
        self.etag.is_some()
    }

    /// Whether there are unpersisted changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Name of the backing provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Persist the current value, expecting the etag last seen.
    pub async fn write(&mut self) -> GrainResult<()> {
        let payload = self.value.clone().unwrap_or_default();
        let etag = self
            .provider
            .save(&self.identity, payload, self.etag.as_ref())
            .await?;
        self.etag = Some(etag);
        self.dirty = false;
        Ok(())
    }

    /// Discard local changes and read the stored record.
    pub async fn reload(&mut self) -> GrainResult<()> {
        match self.provider.load(&self.identity).await? {
            Some(stored) => {
                self.value = Some(stored.payload);
                self.etag = Some(stored.etag);
            }
            None => {
                self.value = None;
                self.etag = None;
            }
        }
        self.dirty = false;
        Ok(())
    }

    /// Delete the stored record.
    pub async fn clear(&mut self) -> GrainResult<()> {
        if let Some(etag) = &self.etag {
            self.provider.clear(&self.identity, etag).await?;
        }
        self.value = None;
        self.etag = None;
        self.dirty = false;
        Ok(())
    }
}
