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

//! # FilterChain - Composable Grain Call Interception
//!
//! ## Design
//! - Filters run in priority order (highest first); equal priorities keep
//!   registration order
//! - Each filter receives a [`Next`] and decides when to continue the chain, so
//!   code after `next.run(call).await` runs on the way back out, in reverse order
//! - The chain ends in a [`CallHandler`] (routing on the caller side, grain
//!   dispatch on the callee side)
//!
//! ```text
//! filter[0] -> filter[1] -> ... -> terminal
//! filter[0] <- filter[1] <- ... <- result
//! ```

use async_trait::async_trait;
use granary_core::{CallContext, GrainResult};
use std::sync::Arc;

/// A grain invocation in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrainCall {
    /// Target, method, deadline and current span
    pub context: CallContext,
    /// Serialized arguments
    pub args: Vec<u8>,
}

impl GrainCall {
    /// Create a call.
    pub fn new(context: CallContext, args: Vec<u8>) -> Self {
        Self { context, args }
    }

    /// Same call with its context replaced.
    pub fn map_context(self, f: impl FnOnce(CallContext) -> CallContext) -> Self {
        Self {
            context: f(self.context),
            args: self.args,
        }
    }
}

/// End of a filter chain.
#[async_trait]
pub trait CallHandler: Send + Sync {
    /// Handle a call that passed every filter.
    async fn handle(&self, call: GrainCall) -> GrainResult<Vec<u8>>;
}

/// One interception step in a [`FilterChain`].
///
/// Dyn-compatible; filters are held as `Arc<dyn GrainCallFilter>`.
#[async_trait]
pub trait GrainCallFilter: Send + Sync {
    /// Intercept `call`. Continue with `next.run(call)`; return its fault unchanged.
    async fn invoke(&self, call: GrainCall, next: Next<'_>) -> GrainResult<Vec<u8>>;

    /// Filter name for logs.
    fn name(&self) -> &str;

    /// Execution order (higher = outermost).
    ///
    /// ## Default Priorities
    /// - Tracing: 100 (outermost, so spans cover every other filter)
    /// - Everything else: 50
    fn priority(&self) -> i32 {
        50
    }
}

/// Remainder of the chain after the current filter.
pub struct Next<'a> {
    filters: &'a [Arc<dyn GrainCallFilter>],
    terminal: &'a dyn CallHandler,
}

impl<'a> Next<'a> {
    /// Run the remaining filters, then the terminal handler.
    pub async fn run(self, call: GrainCall) -> GrainResult<Vec<u8>> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                filter
                    .invoke(
                        call,
                        Next {
                            filters: rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => self.terminal.handle(call).await,
        }
    }
}

/// Ordered grain call filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn GrainCallFilter>>,
}

impl FilterChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter and re-sort by priority.
    pub fn add(&mut self, filter: Arc<dyn GrainCallFilter>) {
        tracing::debug!(filter = filter.name(), priority = filter.priority(), "Registered call filter");
        self.filters.push(filter);
        self.filters.sort_by_key(|f| std::cmp::Reverse(f.priority()));
    }

    /// Builder form of [`FilterChain::add`].
    pub fn with(mut self, filter: Arc<dyn GrainCallFilter>) -> Self {
        self.add(filter);
        self
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.name().to_string()).collect()
    }

    /// Run `call` through every filter and then `terminal`.
    pub async fn execute(&self, call: GrainCall, terminal: &dyn CallHandler) -> GrainResult<Vec<u8>> {
        Next {
            filters: &self.filters,
            terminal,
        }
        .run(call)
        .await
    }
}
