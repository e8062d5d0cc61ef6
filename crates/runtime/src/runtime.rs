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

//! Grain runtime.
//!
//! ## Purpose
//! Owns the activations hosted by one node and routes every grain call, local or
//! forwarded, to the single activation of its target.
//!
//! ## Call path
//! [`GrainRuntime::invoke`] runs the outgoing filter chain around the router. The
//! router resolves the owner from the directory and either dispatches locally
//! (incoming filter chain, then the activation mailbox) or forwards a
//! [`CallEnvelope`] through the [`ClusterTransport`]. `Retryable` faults are retried
//! by the router up to `max_call_retries` times, never past the call's deadline.
//!
//! ## Fencing
//! A forwarded call carries the membership version its sender routed with. If it
//! differs from the receiver's version by more than one, even after the receiver
//! refreshed its own view, the call is rejected with `Retryable(StaleRouting)` and
//! the sender refreshes and re-resolves. An activation is only ever created on the
//! node that owns the identity under the receiver's current table.

use crate::activation::{ActivationHandle, ActivationSeed, ActivationStatus, Catalog, Delivery};
use crate::config::RuntimeConfig;
use crate::context::GrainRef;
use crate::directory::GrainDirectory;
use crate::grain::GrainFactory;
use crate::transport::{CallEnvelope, CallResponse, ClusterTransport, EnvelopeHandler, InProcessTransport};
use crate::state::GrainState;
use async_trait::async_trait;
use futures::future::join_all;
use granary_core::{CallContext, GrainFault, GrainIdentity, GrainResult, NodeDescriptor};
use granary_filters::{CallHandler, FilterChain, GrainCall, GrainCallFilter};
use granary_membership::MembershipProvider;
use granary_storage::StorageProvider;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct RuntimeInner {
    local: NodeDescriptor,
    config: RuntimeConfig,
    directory: GrainDirectory,
    membership: Arc<dyn MembershipProvider>,
    default_storage: Arc<dyn StorageProvider>,
    named_storage: HashMap<String, Arc<dyn StorageProvider>>,
    factories: HashMap<String, Arc<dyn GrainFactory>>,
    outgoing: FilterChain,
    incoming: FilterChain,
    transport: Arc<dyn ClusterTransport>,
    catalog: Arc<Catalog>,
    shutting_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Grain runtime of one node. Clones share the same runtime.
#[derive(Clone)]
pub struct GrainRuntime {
    inner: Arc<RuntimeInner>,
}

/// Non-owning handle to a [`GrainRuntime`].
#[derive(Clone)]
pub struct WeakGrainRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakGrainRuntime {
    /// The runtime, if it is still alive.
    pub fn upgrade(&self) -> Option<GrainRuntime> {
        self.inner.upgrade().map(|inner| GrainRuntime { inner })
    }
}

/// Builder for [`GrainRuntime`].
pub struct GrainRuntimeBuilder {
    local: NodeDescriptor,
    membership: Arc<dyn MembershipProvider>,
    default_storage: Arc<dyn StorageProvider>,
    named_storage: HashMap<String, Arc<dyn StorageProvider>>,
    factories: HashMap<String, Arc<dyn GrainFactory>>,
    outgoing: FilterChain,
    incoming: FilterChain,
    transport: Option<Arc<dyn ClusterTransport>>,
    config: RuntimeConfig,
}

impl GrainRuntimeBuilder {
    /// Runtime for `local`, with its membership and default storage provider.
    pub fn new(
        local: NodeDescriptor,
        membership: Arc<dyn MembershipProvider>,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        Self {
            local,
            membership,
            default_storage: storage,
            named_storage: HashMap::new(),
            factories: HashMap::new(),
            outgoing: FilterChain::new(),
            incoming: FilterChain::new(),
            transport: None,
            config: RuntimeConfig::default(),
        }
    }

    /// Register a storage provider grain factories can select by name.
    pub fn with_named_storage(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn StorageProvider>,
    ) -> Self {
        self.named_storage.insert(name.into(), provider);
        self
    }

    /// Register a grain type. A later factory for the same type replaces the earlier one.
    pub fn register(self, factory: impl GrainFactory + 'static) -> Self {
        self.register_shared(Arc::new(factory))
    }

    /// Register an already shared grain factory.
    pub fn register_shared(mut self, factory: Arc<dyn GrainFactory>) -> Self {
        self.factories.insert(factory.grain_type().to_string(), factory);
        self
    }

    /// Add a filter wrapping calls this node makes.
    pub fn with_outgoing_filter(mut self, filter: Arc<dyn GrainCallFilter>) -> Self {
        self.outgoing.add(filter);
        self
    }

    /// Add a filter wrapping calls this node serves.
    pub fn with_incoming_filter(mut self, filter: Arc<dyn GrainCallFilter>) -> Self {
        self.incoming.add(filter);
        self
    }

    /// Transport to peers (default: a private [`InProcessTransport`]).
    pub fn with_transport(mut self, transport: Arc<dyn ClusterTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Runtime tuning.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime. Nothing runs until [`GrainRuntime::start`].
    pub fn build(self) -> GrainRuntime {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(InProcessTransport::new()));
        GrainRuntime {
            inner: Arc::new(RuntimeInner {
                local: self.local,
                config: self.config,
                directory: GrainDirectory::new(),
                membership: self.membership,
                default_storage: self.default_storage,
                named_storage: self.named_storage,
                factories: self.factories,
                outgoing: self.outgoing,
                incoming: self.incoming,
                transport,
                catalog: Arc::new(Catalog::default()),
                shutting_down: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl GrainRuntime {
    /// Shorthand for [`GrainRuntimeBuilder::new`].
    pub fn builder(
        local: NodeDescriptor,
        membership: Arc<dyn MembershipProvider>,
        storage: Arc<dyn StorageProvider>,
    ) -> GrainRuntimeBuilder {
        GrainRuntimeBuilder::new(local, membership, storage)
    }

    /// Non-owning handle, for background tasks and activations.
    pub fn downgrade(&self) -> WeakGrainRuntime {
        WeakGrainRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Node this runtime runs on.
    pub fn local_node(&self) -> &NodeDescriptor {
        &self.inner.local
    }

    /// Runtime tuning.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Routing directory.
    pub fn directory(&self) -> &GrainDirectory {
        &self.inner.directory
    }

    /// Membership provider.
    pub fn membership(&self) -> &Arc<dyn MembershipProvider> {
        &self.inner.membership
    }

    /// Join the cluster, accept forwarded calls and start background work.
    ///
    /// Spawns the view watcher (directory refresh and rebalance) and the idle
    /// collector.
    pub async fn start(&self) -> GrainResult<()> {
        let inner = &self.inner;
        let view = inner.membership.join(inner.local.clone()).await?;
        inner.directory.apply_view(&view);
        inner.directory.apply_view(&inner.membership.current_view());

        let endpoint: Arc<dyn EnvelopeHandler> = Arc::new(RuntimeEndpoint {
            inner: Arc::downgrade(inner),
        });
        inner.transport.bind(&inner.local.node_id, endpoint);

        let watcher = self.spawn_view_watcher();
        let collector = self.spawn_idle_collector();
        lock_tasks(&inner.tasks).extend([watcher, collector]);

        tracing::info!(
            node_id = %inner.local.node_id,
            membership = inner.membership.name(),
            transport = inner.transport.name(),
            version = inner.directory.version(),
            grain_types = inner.factories.len(),
            "Grain runtime started"
        );
        Ok(())
    }

    /// Reference to `identity`, for calls made outside any grain.
    pub fn grain(&self, identity: GrainIdentity) -> GrainRef {
        GrainRef::new(self.clone(), identity)
    }

    /// Invoke a grain method, wherever the grain lives.
    pub async fn invoke(&self, context: CallContext, args: Vec<u8>) -> GrainResult<Vec<u8>> {
        let router = Router { runtime: self };
        self.inner
            .outgoing
            .execute(GrainCall::new(context, args), &router)
            .await
    }

    /// Serve a call forwarded by a peer.
    pub async fn handle_envelope(&self, envelope: CallEnvelope) -> CallResponse {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return CallResponse::from(Err(GrainFault::stale_routing()));
        }

        let mut local_version = self.inner.directory.version();
        if envelope.membership_version.abs_diff(local_version) > 1 {
            self.refresh_view();
            local_version = self.inner.directory.version();
        }
        if envelope.membership_version.abs_diff(local_version) > 1 {
            tracing::debug!(
                sender = %envelope.sender,
                grain = %envelope.target,
                sender_version = envelope.membership_version,
                local_version,
                "Rejecting call routed with a stale membership view"
            );
            metrics::counter!("granary_grain_calls_fenced_total").increment(1);
            return CallResponse::from(Err(GrainFault::stale_routing()));
        }

        self.dispatch_local(envelope.into_call()).await.into()
    }

    /// Deactivate `identity` after its queued calls. Returns whether it was active here.
    pub async fn deactivate(&self, identity: &GrainIdentity) -> bool {
        match self.inner.catalog.get(identity) {
            Some(handle) => deactivate_handle(&handle).await,
            None => false,
        }
    }

    /// Deactivate every activation idle since `now - idle_timeout`.
    pub async fn deactivate_idle(&self, now: Instant) -> usize {
        let idle_timeout = self.inner.config.idle_timeout;
        let idle: Vec<_> = self
            .inner
            .catalog
            .snapshot()
            .into_iter()
            .filter(|handle| handle.is_idle(now, idle_timeout))
            .collect();
        if !idle.is_empty() {
            tracing::debug!(count = idle.len(), "Collecting idle activations");
        }
        deactivate_all(&idle).await
    }

    /// Deactivate activations this node no longer owns under the current table.
    ///
    /// When the local node is missing from a non-empty view (declared dead or
    /// departed), every activation goes.
    pub async fn rebalance(&self) -> usize {
        let table = self.inner.directory.table();
        let local_id = &self.inner.local.node_id;
        let local_active = table.nodes.iter().any(|node| &node.node_id == local_id);

        let moved: Vec<_> = self
            .inner
            .catalog
            .snapshot()
            .into_iter()
            .filter(|handle| {
                if table.version == 0 {
                    return false;
                }
                !local_active
                    || table
                        .owner(handle.identity())
                        .is_some_and(|owner| &owner.node_id != local_id)
            })
            .collect();
        if moved.is_empty() {
            return 0;
        }

        tracing::info!(
            node_id = %local_id,
            version = table.version,
            count = moved.len(),
            "Rebalancing activations owned elsewhere"
        );
        for handle in &moved {
            tracing::debug!(
                grain = %handle.identity(),
                activated_at_version = handle.membership_version(),
                "Grain moved to another node"
            );
        }
        deactivate_all(&moved).await
    }

    /// Drain and persist every activation, then leave the cluster.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in lock_tasks(&inner.tasks).drain(..) {
            task.abort();
        }

        let handles = inner.catalog.snapshot();
        let drained = deactivate_all(&handles).await;
        inner.transport.unbind(&inner.local.node_id);
        if let Err(e) = inner.membership.leave(&inner.local.node_id).await {
            tracing::warn!(node_id = %inner.local.node_id, error = %e, "Failed to leave membership");
        }
        inner.membership.stop();
        tracing::info!(
            node_id = %inner.local.node_id,
            deactivated = drained,
            "Grain runtime stopped"
        );
    }

    /// Lifecycle state of `identity` on this node, `None` if not activated here.
    pub fn activation_status(&self, identity: &GrainIdentity) -> Option<ActivationStatus> {
        self.inner.catalog.get(identity).map(|handle| handle.status())
    }

    /// Number of activations on this node.
    pub fn activation_count(&self) -> usize {
        self.inner.catalog.len()
    }

    /// Identities activated on this node.
    pub fn activations(&self) -> Vec<GrainIdentity> {
        let mut identities: Vec<_> = self
            .inner
            .catalog
            .snapshot()
            .iter()
            .map(|handle| handle.identity().clone())
            .collect();
        identities.sort();
        identities
    }

    fn refresh_view(&self) -> bool {
        self.inner
            .directory
            .apply_view(&self.inner.membership.current_view())
    }

    async fn dispatch_local(&self, call: GrainCall) -> GrainResult<Vec<u8>> {
        let dispatcher = Dispatcher { runtime: self };
        self.inner.incoming.execute(call, &dispatcher).await
    }

    async fn forward(&self, owner: &NodeDescriptor, call: &GrainCall) -> GrainResult<Vec<u8>> {
        let envelope = CallEnvelope::from_call(
            self.inner.local.node_id.clone(),
            call,
            self.inner.directory.version(),
        );
        metrics::counter!("granary_grain_calls_forwarded_total").increment(1);
        match tokio::time::timeout_at(
            call.context.deadline(),
            self.inner.transport.send(owner, envelope),
        )
        .await
        {
            Ok(Ok(response)) => response.result,
            Ok(Err(fault)) => Err(fault),
            Err(_) => Err(GrainFault::timeout()),
        }
    }

    fn storage_for(&self, factory: &dyn GrainFactory) -> GrainResult<Arc<dyn StorageProvider>> {
        match factory.storage_name() {
            None => Ok(self.inner.default_storage.clone()),
            Some(name) => self.inner.named_storage.get(name).cloned().ok_or_else(|| {
                GrainFault::activation_failure(format!(
                    "grain type {} uses unknown storage provider '{}'",
                    factory.grain_type(),
                    name
                ))
            }),
        }
    }

    /// Activation for `identity`, created if this node owns it.
    fn activation_for(&self, identity: &GrainIdentity) -> GrainResult<Arc<ActivationHandle>> {
        let inner = &self.inner;
        if let Some(handle) = inner.catalog.get(identity) {
            return Ok(handle);
        }
        if inner.shutting_down.load(Ordering::Acquire) {
            return Err(GrainFault::stale_routing());
        }

        let table = inner.directory.table();
        if !table
            .owner(identity)
            .is_some_and(|owner| owner.node_id == inner.local.node_id)
        {
            return Err(GrainFault::stale_routing());
        }

        let factory = inner
            .factories
            .get(identity.grain_type())
            .cloned()
            .ok_or_else(|| {
                GrainFault::activation_failure(format!(
                    "no grain factory registered for type {}",
                    identity.grain_type()
                ))
            })?;
        let provider = self.storage_for(factory.as_ref())?;

        inner.catalog.get_or_activate(identity, table.version, || {
            Ok(ActivationSeed {
                grain: factory.create(identity),
                state: GrainState::new(identity.clone(), provider),
                runtime: self.downgrade(),
            })
        })
    }

    fn spawn_view_watcher(&self) -> JoinHandle<()> {
        let mut views = self.inner.membership.subscribe();
        let runtime = self.downgrade();
        tokio::spawn(async move {
            while views.changed().await.is_ok() {
                let view = views.borrow_and_update().clone();
                let Some(runtime) = runtime.upgrade() else {
                    break;
                };
                runtime.inner.directory.apply_view(&view);
                runtime.rebalance().await;
            }
        })
    }

    fn spawn_idle_collector(&self) -> JoinHandle<()> {
        let period = self.inner.config.collection_interval.max(Duration::from_millis(1));
        let runtime = self.downgrade();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(runtime) = runtime.upgrade() else {
                    break;
                };
                runtime.deactivate_idle(Instant::now()).await;
            }
        })
    }
}

fn lock_tasks(tasks: &Mutex<Vec<JoinHandle<()>>>) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn deactivate_handle(handle: &ActivationHandle) -> bool {
    match handle.request_deactivation() {
        Some(done) => {
            let drained = done.await.is_ok();
            if drained {
                metrics::counter!("granary_grain_deactivations_total").increment(1);
            }
            drained
        }
        None => false,
    }
}

async fn deactivate_all(handles: &[Arc<ActivationHandle>]) -> usize {
    join_all(handles.iter().map(|handle| deactivate_handle(handle)))
        .await
        .into_iter()
        .filter(|drained| *drained)
        .count()
}

/// Terminal of the outgoing chain: resolve, dispatch or forward, retry.
struct Router<'a> {
    runtime: &'a GrainRuntime,
}

#[async_trait]
impl CallHandler for Router<'_> {
    async fn handle(&self, call: GrainCall) -> GrainResult<Vec<u8>> {
        let inner = &self.runtime.inner;
        let mut attempt = 0u32;
        loop {
            if call.context.is_expired() {
                return Err(GrainFault::timeout());
            }

            let owner = inner.directory.resolve(call.context.target())?;
            let result = if owner.node_id == inner.local.node_id {
                self.runtime.dispatch_local(call.clone()).await
            } else {
                self.runtime.forward(&owner, &call).await
            };

            match result {
                Err(fault)
                    if fault.is_retryable()
                        && attempt < inner.config.max_call_retries
                        && !call.context.is_expired() =>
                {
                    attempt += 1;
                    metrics::counter!("granary_grain_call_retries_total", "reason" => fault.kind())
                        .increment(1);
                    tracing::debug!(
                        grain = %call.context.target(),
                        method = call.context.method(),
                        attempt,
                        fault = %fault,
                        "Retrying grain call"
                    );
                    if fault == GrainFault::stale_routing() {
                        self.runtime.refresh_view();
                    }
                    let backoff = Duration::from_millis(5 * u64::from(attempt));
                    tokio::time::sleep(backoff.min(call.context.remaining())).await;
                }
                other => return other,
            }
        }
    }
}

/// Terminal of the incoming chain: hands the call to the target's activation.
struct Dispatcher<'a> {
    runtime: &'a GrainRuntime,
}

#[async_trait]
impl CallHandler for Dispatcher<'_> {
    async fn handle(&self, call: GrainCall) -> GrainResult<Vec<u8>> {
        let identity = call.context.target();
        let deadline = call.context.deadline();
        loop {
            if call.context.is_expired() {
                return Err(GrainFault::timeout());
            }

            let handle = self.runtime.activation_for(identity)?;
            let Some(reply) = handle.enqueue(call.context.clone(), call.args.clone()) else {
                // Mailbox closed between lookup and send; the catalog entry is gone.
                tokio::task::yield_now().await;
                continue;
            };

            let result = match tokio::time::timeout_at(deadline, reply).await {
                Ok(Ok(Delivery::Done(result))) => result,
                Ok(Ok(Delivery::Discarded)) => {
                    tracing::debug!(grain = %identity, "Activation discarded before call ran, retrying");
                    continue;
                }
                Ok(Err(_)) => {
                    tracing::error!(grain = %identity, "Activation task stopped while a call was queued");
                    self.runtime.inner.catalog.remove(&handle);
                    Err(GrainFault::application(format!("activation of {identity} stopped")))
                }
                Err(_) => {
                    tracing::debug!(
                        grain = %identity,
                        method = call.context.method(),
                        "Grain call timed out; the call stays queued"
                    );
                    Err(GrainFault::timeout())
                }
            };

            let outcome = match &result {
                Ok(_) => "ok",
                Err(fault) => fault.kind(),
            };
            metrics::counter!(
                "granary_grain_calls_total",
                "grain_type" => identity.grain_type().to_string(),
                "outcome" => outcome
            )
            .increment(1);
            return result;
        }
    }
}

/// Transport endpoint of a runtime; does not keep the runtime alive.
struct RuntimeEndpoint {
    inner: Weak<RuntimeInner>,
}

#[async_trait]
impl EnvelopeHandler for RuntimeEndpoint {
    async fn handle_envelope(&self, envelope: CallEnvelope) -> CallResponse {
        match self.inner.upgrade() {
            Some(inner) => GrainRuntime { inner }.handle_envelope(envelope).await,
            None => CallResponse::from(Err(GrainFault::stale_routing())),
        }
    }
}
