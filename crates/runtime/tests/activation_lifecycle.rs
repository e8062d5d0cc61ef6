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

//! Single-node activation lifecycle: serialization, ordering, failure, idle collection.

use async_trait::async_trait;
use futures::future::join_all;
use granary_core::{FatalReason, GrainFault, GrainIdentity, GrainResult, NodeDescriptor};
use granary_membership::LocalMembership;
use granary_runtime::{
    ActivationStatus, FnGrainFactory, Grain, GrainContext, GrainRuntime, GrainRuntimeBuilder,
    GrainState, RuntimeConfig,
};
use granary_storage::{MemoryStorageProvider, StorageProvider};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Counts overlapping executions and keeps a persisted counter.
struct Counter {
    in_flight: Arc<AtomicUsize>,
    max_overlap: Arc<AtomicUsize>,
    log: Vec<u64>,
}

#[async_trait]
impl Grain for Counter {
    async fn handle(
        &mut self,
        ctx: &mut GrainContext<'_>,
        method: &str,
        args: Vec<u8>,
    ) -> GrainResult<Vec<u8>> {
        match method {
            "incr" => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_overlap.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                let count = ctx.state().get_json::<u64>()?.unwrap_or(0) + 1;
                ctx.state_mut().set_json(&count)?;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(serde_json::to_vec(&count).unwrap())
            }
            "append" => {
                self.log.push(serde_json::from_slice(&args).unwrap());
                Ok(Vec::new())
            }
            "log" => Ok(serde_json::to_vec(&self.log).unwrap()),
            "get" => Ok(serde_json::to_vec(&ctx.state().get_json::<u64>()?.unwrap_or(0)).unwrap()),
            "slow_incr" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let count = ctx.state().get_json::<u64>()?.unwrap_or(0) + 1;
                ctx.state_mut().set_json(&count)?;
                Ok(Vec::new())
            }
            "relay" => {
                let key: String = serde_json::from_slice(&args).unwrap();
                let count: u64 = ctx
                    .grain(GrainIdentity::new("Counter", key))
                    .with_timeout(Duration::MAX)
                    .call_json("incr", &())
                    .await?;
                Ok(serde_json::to_vec(&count).unwrap())
            }
            other => Err(GrainFault::application(format!("unknown method {other}"))),
        }
    }
}

struct OverlapGauges {
    in_flight: Arc<AtomicUsize>,
    max_overlap: Arc<AtomicUsize>,
}

fn counter_factory() -> (FnGrainFactory<impl Fn(&GrainIdentity) -> Box<dyn Grain> + Send + Sync>, OverlapGauges) {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_overlap = Arc::new(AtomicUsize::new(0));
    let gauges = OverlapGauges {
        in_flight: in_flight.clone(),
        max_overlap: max_overlap.clone(),
    };
    let factory = FnGrainFactory::new("Counter", move |_id: &GrainIdentity| {
        Box::new(Counter {
            in_flight: in_flight.clone(),
            max_overlap: max_overlap.clone(),
            log: Vec::new(),
        }) as Box<dyn Grain>
    });
    (factory, gauges)
}

fn builder(storage: &MemoryStorageProvider) -> GrainRuntimeBuilder {
    GrainRuntime::builder(
        NodeDescriptor::new("n1", "mem://n1"),
        Arc::new(LocalMembership::new()),
        Arc::new(storage.clone()),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_never_overlap() {
    let storage = MemoryStorageProvider::new();
    let (factory, gauges) = counter_factory();
    let runtime = builder(&storage).register(factory).build();
    runtime.start().await.unwrap();

    let counter = runtime.grain(GrainIdentity::new("Counter", "c1"));
    let calls = (0..50).map(|_| {
        let counter = counter.clone();
        tokio::spawn(async move { counter.call_json::<_, u64>("incr", &()).await })
    });
    let mut results: Vec<u64> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    results.sort_unstable();

    assert_eq!(results, (1..=50).collect::<Vec<_>>());
    assert_eq!(gauges.max_overlap.load(Ordering::SeqCst), 1);
    assert_eq!(gauges.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.activation_count(), 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_calls_run_in_arrival_order() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage).register(factory).build();
    runtime.start().await.unwrap();

    let counter = runtime.grain(GrainIdentity::new("Counter", "ordered"));
    let appends = (0..20u64).map(|i| {
        let counter = counter.clone();
        async move { counter.call_json::<_, ()>("append", &i).await }
    });
    for result in join_all(appends).await {
        result.unwrap();
    }

    let log: Vec<u64> = counter.call_json("log", &()).await.unwrap();
    assert_eq!(log, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_different_activations_run_independently() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage).register(factory).build();
    runtime.start().await.unwrap();

    let slow = runtime
        .grain(GrainIdentity::new("Counter", "slow"))
        .with_timeout(Duration::from_secs(5));
    let fast = runtime.grain(GrainIdentity::new("Counter", "fast"));

    let started = std::time::Instant::now();
    let slow_call = tokio::spawn(async move { slow.call("slow_incr", Vec::new()).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let count: u64 = fast.call_json("incr", &()).await.unwrap();
    assert_eq!(count, 1);
    assert!(started.elapsed() < Duration::from_millis(150));

    slow_call.await.unwrap().unwrap();
}

struct FlakyActivation {
    fail_next: Arc<AtomicBool>,
}

#[async_trait]
impl Grain for FlakyActivation {
    async fn on_activate(&mut self, _state: &mut GrainState) -> GrainResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GrainFault::application("backing data unavailable"));
        }
        Ok(())
    }

    async fn handle(
        &mut self,
        _ctx: &mut GrainContext<'_>,
        _method: &str,
        _args: Vec<u8>,
    ) -> GrainResult<Vec<u8>> {
        Ok(b"ok".to_vec())
    }
}

#[tokio::test]
async fn test_failed_activation_reverts_and_next_call_retries() {
    let storage = MemoryStorageProvider::new();
    let fail_next = Arc::new(AtomicBool::new(true));
    let flag = fail_next.clone();
    let runtime = builder(&storage)
        .register(FnGrainFactory::new("Flaky", move |_id: &GrainIdentity| {
            Box::new(FlakyActivation {
                fail_next: flag.clone(),
            }) as Box<dyn Grain>
        }))
        .build();
    runtime.start().await.unwrap();

    let id = GrainIdentity::new("Flaky", "f1");
    let err = runtime.grain(id.clone()).call("get", Vec::new()).await.unwrap_err();
    assert!(matches!(
        err,
        GrainFault::Fatal(FatalReason::ActivationFailure(_))
    ));
    assert_eq!(runtime.activation_status(&id), None);

    let reply = runtime.grain(id.clone()).call("get", Vec::new()).await.unwrap();
    assert_eq!(reply, b"ok".to_vec());
    assert_eq!(runtime.activation_status(&id), Some(ActivationStatus::Active));
}

#[tokio::test]
async fn test_unknown_grain_type_fails_activation() {
    let runtime = builder(&MemoryStorageProvider::new()).build();
    runtime.start().await.unwrap();

    let err = runtime
        .grain(GrainIdentity::new("Nope", "x"))
        .call("get", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GrainFault::Fatal(FatalReason::ActivationFailure(_))
    ));
    assert_eq!(runtime.activation_count(), 0);
}

#[tokio::test]
async fn test_idle_activation_persists_dirty_state() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage)
        .register(factory)
        .with_config(RuntimeConfig {
            idle_timeout: Duration::from_secs(60),
            collection_interval: Duration::from_secs(3600),
            ..RuntimeConfig::default()
        })
        .build();
    runtime.start().await.unwrap();

    let id = GrainIdentity::new("Counter", "idle");
    let counter = runtime.grain(id.clone());
    let _: u64 = counter.call_json("incr", &()).await.unwrap();
    assert!(storage.load(&id).await.unwrap().is_none());

    assert_eq!(runtime.deactivate_idle(Instant::now()).await, 0);
    let later = Instant::now() + Duration::from_secs(61);
    assert_eq!(runtime.deactivate_idle(later).await, 1);
    assert_eq!(runtime.activation_count(), 0);

    let stored = storage.load(&id).await.unwrap().unwrap();
    assert_eq!(serde_json::from_slice::<u64>(&stored.payload).unwrap(), 1);

    let count: u64 = counter.call_json("incr", &()).await.unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_zero_collection_interval_still_collects() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage)
        .register(factory)
        .with_config(RuntimeConfig {
            idle_timeout: Duration::from_millis(10),
            collection_interval: Duration::ZERO,
            ..RuntimeConfig::default()
        })
        .build();
    runtime.start().await.unwrap();

    let id = GrainIdentity::new("Counter", "busy-collector");
    let _: u64 = runtime.grain(id.clone()).call_json("incr", &()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while runtime.activation_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("idle activation was never collected");
    assert!(storage.load(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_timed_out_call_still_completes() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage).register(factory).build();
    runtime.start().await.unwrap();

    let id = GrainIdentity::new("Counter", "late");
    let impatient = runtime.grain(id.clone()).with_timeout(Duration::from_millis(50));
    let err = impatient.call("slow_incr", Vec::new()).await.unwrap_err();
    assert_eq!(err, GrainFault::timeout());

    // Queued behind the timed-out call, so it observes its effect.
    let count: u64 = runtime.grain(id).call_json("get", &()).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_unbounded_timeout_is_accepted() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage).register(factory).build();
    runtime.start().await.unwrap();

    let patient = runtime
        .grain(GrainIdentity::new("Counter", "patient"))
        .with_timeout(Duration::MAX);
    let count: u64 = patient.call_json("incr", &()).await.unwrap();
    assert_eq!(count, 1);

    let relayed: u64 = patient.call_json("relay", &"downstream").await.unwrap();
    assert_eq!(relayed, 1);
}

#[tokio::test]
async fn test_explicit_deactivation_drains_queued_calls() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage).register(factory).build();
    runtime.start().await.unwrap();

    let id = GrainIdentity::new("Counter", "evicted");
    let counter = runtime.grain(id.clone());
    let _: u64 = counter.call_json("incr", &()).await.unwrap();

    let queued = {
        let counter = counter.clone();
        tokio::spawn(async move { counter.call("slow_incr", Vec::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(runtime.deactivate(&id).await);
    queued.await.unwrap().unwrap();

    let stored = storage.load(&id).await.unwrap().unwrap();
    assert_eq!(serde_json::from_slice::<u64>(&stored.payload).unwrap(), 2);
    assert!(!runtime.deactivate(&id).await);
}

struct Catalogue;

#[async_trait]
impl Grain for Catalogue {
    async fn handle(
        &mut self,
        ctx: &mut GrainContext<'_>,
        _method: &str,
        args: Vec<u8>,
    ) -> GrainResult<Vec<u8>> {
        ctx.state_mut().set(args);
        ctx.state_mut().write().await?;
        Ok(ctx.state().provider_name().as_bytes().to_vec())
    }
}

#[tokio::test]
async fn test_named_storage_is_selected_by_factory() {
    let default_storage = MemoryStorageProvider::new();
    let definitions = MemoryStorageProvider::new();
    let runtime = builder(&default_storage)
        .with_named_storage("definitions", Arc::new(definitions.clone()))
        .register(
            FnGrainFactory::new("Definition", |_id: &GrainIdentity| {
                Box::new(Catalogue) as Box<dyn Grain>
            })
            .with_storage("definitions"),
        )
        .register(
            FnGrainFactory::new("Orphan", |_id: &GrainIdentity| {
                Box::new(Catalogue) as Box<dyn Grain>
            })
            .with_storage("missing"),
        )
        .build();
    runtime.start().await.unwrap();

    runtime
        .grain(GrainIdentity::new("Definition", "peace"))
        .call("set", r#"{"zh":"和平"}"#.as_bytes().to_vec())
        .await
        .unwrap();
    assert_eq!(definitions.len().await, 1);
    assert!(default_storage.is_empty().await);

    let err = runtime
        .grain(GrainIdentity::new("Orphan", "x"))
        .call("set", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GrainFault::Fatal(FatalReason::ActivationFailure(_))
    ));
}

#[tokio::test]
async fn test_shutdown_persists_and_refuses_new_activations() {
    let storage = MemoryStorageProvider::new();
    let (factory, _) = counter_factory();
    let runtime = builder(&storage)
        .register(factory)
        .with_config(RuntimeConfig {
            max_call_retries: 0,
            ..RuntimeConfig::default()
        })
        .build();
    runtime.start().await.unwrap();

    let ids: Vec<_> = (0..5)
        .map(|i| GrainIdentity::new("Counter", format!("s{i}")))
        .collect();
    for id in &ids {
        let _: u64 = runtime.grain(id.clone()).call_json("incr", &()).await.unwrap();
    }
    runtime.shutdown().await;

    assert_eq!(runtime.activation_count(), 0);
    assert_eq!(storage.len().await, 5);
    let err = runtime.grain(ids[0].clone()).call("get", Vec::new()).await.unwrap_err();
    assert_eq!(err, GrainFault::stale_routing());
}

#[tokio::test]
async fn test_activation_log_is_observable() {
    let storage = MemoryStorageProvider::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let runtime = builder(&storage)
        .register(FnGrainFactory::new("Counter", move |id: &GrainIdentity| {
            record.lock().unwrap().push(id.clone());
            Box::new(Counter {
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_overlap: Arc::new(AtomicUsize::new(0)),
                log: Vec::new(),
            }) as Box<dyn Grain>
        }))
        .build();
    runtime.start().await.unwrap();

    for key in ["b", "a", "b"] {
        let _: u64 = runtime
            .grain(GrainIdentity::new("Counter", key))
            .call_json("incr", &())
            .await
            .unwrap();
    }
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(
        runtime.activations(),
        vec![GrainIdentity::new("Counter", "a"), GrainIdentity::new("Counter", "b")]
    );
}
