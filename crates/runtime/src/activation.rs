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

//! Activation catalog and per-activation task.
//!
//! ## Lifecycle
//! ```text
//! (absent) --first call--> Activating --load + on_activate--> Active
//! Active --idle / eviction / rebalance--> Deactivating --persist--> (absent)
//! Activating --fault--> (absent)   queued calls get Fatal(ActivationFailure)
//! ```
//!
//! Each activation owns an unbounded mailbox drained by one task, which is the
//! only code touching the grain and its state. A deactivation request is a
//! mailbox message, so it runs after every call queued before it.

use crate::context::GrainContext;
use crate::grain::Grain;
use crate::runtime::WeakGrainRuntime;
use crate::state::GrainState;
use granary_core::{CallContext, GrainFault, GrainIdentity, GrainResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Observable lifecycle state of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationStatus {
    /// Loading state and running `on_activate`
    Activating,
    /// Serving calls
    Active,
    /// Draining, running `on_deactivate` and persisting state
    Deactivating,
}

pub(crate) enum Command {
    Call {
        context: CallContext,
        args: Vec<u8>,
        reply: oneshot::Sender<Delivery>,
    },
    Deactivate {
        reply: oneshot::Sender<()>,
    },
}

/// Answer to a queued call.
pub(crate) enum Delivery {
    /// The grain ran the call
    Done(GrainResult<Vec<u8>>),
    /// The activation was discarded before the call ran; route it again
    Discarded,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Catalog entry for one activation.
pub(crate) struct ActivationHandle {
    seq: u64,
    identity: GrainIdentity,
    membership_version: u64,
    mailbox: mpsc::UnboundedSender<Command>,
    status: Mutex<ActivationStatus>,
    pending: AtomicUsize,
    last_used: Mutex<Instant>,
}

impl ActivationHandle {
    pub(crate) fn identity(&self) -> &GrainIdentity {
        &self.identity
    }

    pub(crate) fn membership_version(&self) -> u64 {
        self.membership_version
    }

    pub(crate) fn status(&self) -> ActivationStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: ActivationStatus) {
        *lock(&self.status) = status;
    }

    /// Queue a call. `None` when the mailbox is already closed.
    pub(crate) fn enqueue(
        &self,
        context: CallContext,
        args: Vec<u8>,
    ) -> Option<oneshot::Receiver<Delivery>> {
        let (reply, rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.mailbox.send(Command::Call {
            context,
            args,
            reply,
        }) {
            Ok(()) => Some(rx),
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                None
            }
        }
    }

    /// Ask the activation to deactivate after the calls queued so far.
    pub(crate) fn request_deactivation(&self) -> Option<oneshot::Receiver<()>> {
        let (reply, rx) = oneshot::channel();
        self.mailbox.send(Command::Deactivate { reply }).ok()?;
        Some(rx)
    }

    /// Active, nothing queued and unused for at least `idle_timeout`.
    pub(crate) fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.status() == ActivationStatus::Active
            && self.pending.load(Ordering::Acquire) == 0
            && now.saturating_duration_since(*lock(&self.last_used)) >= idle_timeout
    }

    fn finish_call(&self) {
        *lock(&self.last_used) = Instant::now();
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Activations hosted by this node, keyed by identity.
#[derive(Default)]
pub(crate) struct Catalog {
    activations: Mutex<HashMap<GrainIdentity, Arc<ActivationHandle>>>,
    next_seq: AtomicU64,
}

/// Everything the activation task needs besides its handle.
pub(crate) struct ActivationSeed {
    pub(crate) grain: Box<dyn Grain>,
    pub(crate) state: GrainState,
    pub(crate) runtime: WeakGrainRuntime,
}

impl Catalog {
    pub(crate) fn get(&self, identity: &GrainIdentity) -> Option<Arc<ActivationHandle>> {
        lock(&self.activations).get(identity).cloned()
    }

    /// Existing activation, or a new one started from `seed()`.
    ///
    /// `seed` runs under the catalog lock, so two concurrent first calls create a
    /// single activation.
    pub(crate) fn get_or_activate(
        self: &Arc<Self>,
        identity: &GrainIdentity,
        membership_version: u64,
        seed: impl FnOnce() -> GrainResult<ActivationSeed>,
    ) -> GrainResult<Arc<ActivationHandle>> {
        let mut activations = lock(&self.activations);
        if let Some(existing) = activations.get(identity) {
            return Ok(existing.clone());
        }

        let seed = seed()?;
        let (mailbox, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(ActivationHandle {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            identity: identity.clone(),
            membership_version,
            mailbox,
            status: Mutex::new(ActivationStatus::Activating),
            pending: AtomicUsize::new(0),
            last_used: Mutex::new(Instant::now()),
        });
        activations.insert(identity.clone(), handle.clone());
        drop(activations);

        metrics::counter!("granary_grain_activations_total", "grain_type" => identity.grain_type().to_string())
            .increment(1);
        tokio::spawn(run(handle.clone(), rx, seed, Arc::downgrade(self)));
        Ok(handle)
    }

    /// Remove `handle` unless a newer activation already replaced it.
    pub(crate) fn remove(&self, handle: &ActivationHandle) {
        let mut activations = lock(&self.activations);
        if activations
            .get(&handle.identity)
            .is_some_and(|current| current.seq == handle.seq)
        {
            activations.remove(&handle.identity);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<ActivationHandle>> {
        lock(&self.activations).values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.activations).len()
    }
}

async fn activate(grain: &mut Box<dyn Grain>, state: &mut GrainState) -> GrainResult<()> {
    state.reload().await.map_err(|fault| {
        GrainFault::activation_failure(format!("loading state of {}: {}", state.identity(), fault))
    })?;
    grain.on_activate(state).await.map_err(|fault| match fault {
        GrainFault::Fatal(_) => fault,
        other => GrainFault::activation_failure(other.to_string()),
    })
}

async fn run(
    handle: Arc<ActivationHandle>,
    mut mailbox: mpsc::UnboundedReceiver<Command>,
    seed: ActivationSeed,
    catalog: Weak<Catalog>,
) {
    let ActivationSeed {
        mut grain,
        mut state,
        runtime,
    } = seed;
    let identity = handle.identity.clone();

    if let Err(fault) = activate(&mut grain, &mut state).await {
        tracing::warn!(grain = %identity, fault = %fault, "Activation failed");
        if let Some(catalog) = catalog.upgrade() {
            catalog.remove(&handle);
        }
        mailbox.close();
        while let Some(command) = mailbox.recv().await {
            match command {
                Command::Call { reply, .. } => {
                    handle.finish_call();
                    let _ = reply.send(Delivery::Done(Err(fault.clone())));
                }
                Command::Deactivate { reply } => {
                    let _ = reply.send(());
                }
            }
        }
        return;
    }

    handle.set_status(ActivationStatus::Active);
    tracing::debug!(
        grain = %identity,
        membership_version = handle.membership_version,
        "Grain activated"
    );

    let mut deactivation_reply = None;
    while let Some(command) = mailbox.recv().await {
        match command {
            Command::Call {
                context,
                args,
                reply,
            } => {
                let result = match runtime.upgrade() {
                    Some(runtime) => {
                        let method = context.method().to_string();
                        let mut ctx = GrainContext::new(context, &mut state, runtime);
                        grain.handle(&mut ctx, &method, args).await
                    }
                    None => Err(GrainFault::membership_unavailable("runtime has been dropped")),
                };
                handle.finish_call();
                let _ = reply.send(Delivery::Done(result));
            }
            Command::Deactivate { reply } => {
                deactivation_reply = Some(reply);
                break;
            }
        }
    }

    handle.set_status(ActivationStatus::Deactivating);
    if let Err(fault) = grain.on_deactivate(&mut state).await {
        tracing::warn!(grain = %identity, fault = %fault, "on_deactivate failed");
    }
    if state.is_dirty() {
        match state.write().await {
            Ok(()) => tracing::debug!(grain = %identity, "Persisted state on deactivation"),
            Err(GrainFault::Conflict(_)) => tracing::warn!(
                grain = %identity,
                "State changed elsewhere; discarding unpersisted changes"
            ),
            Err(fault) => tracing::warn!(
                grain = %identity,
                fault = %fault,
                "Failed to persist state on deactivation"
            ),
        }
    }

    if let Some(catalog) = catalog.upgrade() {
        catalog.remove(&handle);
    }
    mailbox.close();
    while let Some(command) = mailbox.recv().await {
        match command {
            Command::Call { reply, .. } => {
                handle.finish_call();
                let _ = reply.send(Delivery::Discarded);
            }
            Command::Deactivate { reply } => {
                let _ = reply.send(());
            }
        }
    }

    tracing::debug!(grain = %identity, "Grain deactivated");
    if let Some(reply) = deactivation_reply {
        let _ = reply.send(());
    }
}
