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

//! Call-scoped grain context and grain references.
//!
//! A [`GrainRef`] obtained from a [`GrainContext`] is bound to the call being
//! handled: nested calls inherit its deadline and its current span, so their spans
//! become children of the span that was current when the grain made the call.

use crate::runtime::GrainRuntime;
use crate::state::GrainState;
use granary_core::{deadline_after, CallContext, GrainFault, GrainIdentity, GrainResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// What a grain sees while handling one call.
pub struct GrainContext<'a> {
    call: CallContext,
    state: &'a mut GrainState,
    runtime: GrainRuntime,
}

impl<'a> GrainContext<'a> {
    pub(crate) fn new(call: CallContext, state: &'a mut GrainState, runtime: GrainRuntime) -> Self {
        Self {
            call,
            state,
            runtime,
        }
    }

    /// Identity of the grain handling the call.
    pub fn identity(&self) -> &GrainIdentity {
        self.call.target()
    }

    /// Method being handled.
    pub fn method(&self) -> &str {
        self.call.method()
    }

    /// Context of the call being handled.
    pub fn call_context(&self) -> &CallContext {
        &self.call
    }

    /// Persistent state of this activation.
    pub fn state(&self) -> &GrainState {
        &*self.state
    }

    /// Persistent state of this activation, mutably.
    pub fn state_mut(&mut self) -> &mut GrainState {
        &mut *self.state
    }

    /// Reference to another grain, bound to this call.
    pub fn grain(&self, identity: GrainIdentity) -> GrainRef {
        GrainRef {
            runtime: self.runtime.clone(),
            identity,
            parent: Some(self.call.clone()),
            timeout: None,
        }
    }

    /// Runtime hosting this activation.
    pub fn runtime(&self) -> &GrainRuntime {
        &self.runtime
    }
}

/// Location-transparent reference to a grain.
///
/// Holds only the identity; the owner is resolved on every call.
#[derive(Clone)]
pub struct GrainRef {
    runtime: GrainRuntime,
    identity: GrainIdentity,
    parent: Option<CallContext>,
    timeout: Option<Duration>,
}

impl GrainRef {
    pub(crate) fn new(runtime: GrainRuntime, identity: GrainIdentity) -> Self {
        Self {
            runtime,
            identity,
            parent: None,
            timeout: None,
        }
    }

    /// Target grain.
    pub fn identity(&self) -> &GrainIdentity {
        &self.identity
    }

    /// Bound calls through this reference by `timeout`.
    ///
    /// A nested call never outlives the deadline of the call that made it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn context(&self, method: &str) -> CallContext {
        match &self.parent {
            Some(parent) => {
                let nested = parent.nested(self.identity.clone(), method);
                match self.timeout {
                    Some(timeout) => {
                        let deadline = deadline_after(timeout).min(parent.deadline());
                        nested.with_deadline(deadline)
                    }
                    None => nested,
                }
            }
            None => CallContext::new(
                self.identity.clone(),
                method,
                self.timeout
                    .unwrap_or(self.runtime.config().default_call_timeout),
            ),
        }
    }

    /// Call `method` with raw argument bytes.
    pub async fn call(&self, method: &str, args: Vec<u8>) -> GrainResult<Vec<u8>> {
        self.runtime.invoke(self.context(method), args).await
    }

    /// Call `method` with JSON-encoded arguments and decode the JSON result.
    pub async fn call_json<A, R>(&self, method: &str, args: &A) -> GrainResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(args)
            .map_err(|e| GrainFault::application(format!("unserializable arguments: {e}")))?;
        let reply = self.call(method, bytes).await?;
        serde_json::from_slice(&reply).map_err(|e| {
            GrainFault::application(format!(
                "undecodable reply from {}.{}: {}",
                self.identity, method, e
            ))
        })
    }
}
