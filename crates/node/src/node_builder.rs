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

//! # Node Builder
//!
//! ## Purpose
//! Fluent API that turns a [`NodeConfig`] plus registered grain types into a
//! ready-to-start [`GranaryNode`].
//!
//! ## Design
//! - Backends come from configuration unless one is handed in explicitly
//!   (`with_storage`, `with_membership_backend`, `with_transport`)
//! - Tracing filters are always installed, so trace context is created and
//!   propagated on every call. Spans reach a pipeline only when an exporter is
//!   configured (`tracing.exporter = console`) or supplied with `with_span_exporter`;
//!   otherwise they are discarded
//! - Tracing filters sit outermost in both chains; application filters run inside them
//!
//! ## Examples
//! ```rust,ignore
//! let node = NodeBuilder::new(NodeConfig::from_env()?)
//!     .register(FnGrainFactory::new("Counter", |_| Box::new(Counter::default()) as Box<dyn Grain>))
//!     .build()
//!     .await?;
//! node.start().await?;
//! ```

use crate::config::{ConfigError, MembershipBackendConfig, NodeConfig, SpanExporterConfig};
use crate::error::NodeResult;
use crate::node::GranaryNode;
use granary_core::NodeDescriptor;
use granary_filters::{GrainCallFilter, IncomingTracingFilter, OutgoingTracingFilter, SpanAttributes};
use granary_membership::{
    LocalMembership, MembershipBackend, MembershipProvider, NetworkedMembership,
};
use granary_runtime::{ClusterTransport, GrainFactory, GrainRuntime, RuntimeConfig};
use granary_storage::{create_storage_from_config, StorageConfig, StorageProvider};
use granary_telemetry::{
    DiscardingSpanSink, LoggingSpanExporter, Sampler, SpanExporter, SpanSink, TracingPipeline,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for [`GranaryNode`].
pub struct NodeBuilder {
    config: NodeConfig,
    factories: Vec<Arc<dyn GrainFactory>>,
    storage: Option<Arc<dyn StorageProvider>>,
    named_storage: HashMap<String, Arc<dyn StorageProvider>>,
    membership_backend: Option<Arc<dyn MembershipBackend>>,
    transport: Option<Arc<dyn ClusterTransport>>,
    span_exporter: Option<Arc<dyn SpanExporter>>,
    outgoing: Vec<Arc<dyn GrainCallFilter>>,
    incoming: Vec<Arc<dyn GrainCallFilter>>,
}

impl NodeBuilder {
    /// Builder starting from `config`.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            factories: Vec::new(),
            storage: None,
            named_storage: HashMap::new(),
            membership_backend: None,
            transport: None,
            span_exporter: None,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Builder starting from the process environment.
    pub fn from_env() -> NodeResult<Self> {
        Ok(Self::new(NodeConfig::from_env()?))
    }

    /// Set the node id.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.config.node.node_id = node_id.into();
        self
    }

    /// Set the address peers reach this node at.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.config.node.address = address.into();
        self
    }

    /// Set the heartbeat interval in milliseconds.
    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.membership.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Replace the runtime tuning.
    pub fn with_runtime_config(mut self, runtime: RuntimeConfig) -> Self {
        self.config.runtime.idle_timeout_ms = runtime.idle_timeout.as_millis() as u64;
        self.config.runtime.collection_interval_ms = runtime.collection_interval.as_millis() as u64;
        self.config.runtime.default_call_timeout_ms = runtime.default_call_timeout.as_millis() as u64;
        self.config.runtime.max_call_retries = runtime.max_call_retries;
        self
    }

    /// Set the fraction of new traces that are sampled.
    pub fn with_sampling_ratio(mut self, ratio: f64) -> Self {
        self.config.tracing.sampling_ratio = ratio;
        self
    }

    /// Register a grain type.
    pub fn register(mut self, factory: impl GrainFactory + 'static) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Use `storage` as the default provider instead of the configured one.
    pub fn with_storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use `storage` for the provider called `name`, overriding configuration.
    pub fn with_named_storage(mut self, name: impl Into<String>, storage: Arc<dyn StorageProvider>) -> Self {
        self.named_storage.insert(name.into(), storage);
        self
    }

    /// Join a cluster through `backend` (networked membership).
    pub fn with_membership_backend(mut self, backend: Arc<dyn MembershipBackend>) -> Self {
        self.config.membership.backend = MembershipBackendConfig::Shared;
        self.membership_backend = Some(backend);
        self
    }

    /// Forward remote calls through `transport`.
    pub fn with_transport(mut self, transport: Arc<dyn ClusterTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Export spans to `exporter` instead of the configured exporter.
    pub fn with_span_exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.span_exporter = Some(exporter);
        self
    }

    /// Add an application filter around calls this node makes.
    pub fn with_outgoing_filter(mut self, filter: Arc<dyn GrainCallFilter>) -> Self {
        self.outgoing.push(filter);
        self
    }

    /// Add an application filter around calls this node serves.
    pub fn with_incoming_filter(mut self, filter: Arc<dyn GrainCallFilter>) -> Self {
        self.incoming.push(filter);
        self
    }

    /// Create the backends and assemble the node. Nothing is started yet.
    pub async fn build(self) -> NodeResult<GranaryNode> {
        let config = self.config;
        config.validate()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => create_storage_from_config(StorageConfig::new(config.storage.backend.clone())).await?,
        };

        let mut named_storage = self.named_storage;
        for (name, backend) in &config.storage.named {
            if !named_storage.contains_key(name) {
                let provider = create_storage_from_config(StorageConfig::new(backend.clone())).await?;
                named_storage.insert(name.clone(), provider);
            }
        }

        let membership = create_membership(&config, self.membership_backend).await?;

        let exporter: Option<Arc<dyn SpanExporter>> = match self.span_exporter {
            Some(exporter) => Some(exporter),
            None => match config.tracing.exporter {
                SpanExporterConfig::Console => Some(Arc::new(LoggingSpanExporter::new())),
                SpanExporterConfig::None => None,
            },
        };
        let pipeline = exporter.map(|exporter| TracingPipeline::new(exporter, config.tracing.pipeline_config()));

        let local = NodeDescriptor::new(config.node.node_id.clone(), config.node.address.clone());
        let mut builder = GrainRuntime::builder(local.clone(), membership.clone(), storage)
            .with_config(RuntimeConfig::from(&config.runtime));

        let sink: Arc<dyn SpanSink> = match &pipeline {
            Some(pipeline) => Arc::new(pipeline.clone()),
            None => Arc::new(DiscardingSpanSink),
        };
        let sampler = Sampler::ratio(config.tracing.sampling_ratio);
        let attributes = SpanAttributes::new(config.tracing.service_name.clone(), local.node_id.clone());
        builder = builder
            .with_outgoing_filter(Arc::new(OutgoingTracingFilter::new(
                sink.clone(),
                sampler,
                attributes.clone(),
            )))
            .with_incoming_filter(Arc::new(IncomingTracingFilter::new(sink, sampler, attributes)));
        for filter in self.outgoing {
            builder = builder.with_outgoing_filter(filter);
        }
        for filter in self.incoming {
            builder = builder.with_incoming_filter(filter);
        }
        for (name, provider) in named_storage {
            builder = builder.with_named_storage(name, provider);
        }
        for factory in self.factories {
            builder = builder.register_shared(factory);
        }
        if let Some(transport) = self.transport {
            builder = builder.with_transport(transport);
        }

        tracing::debug!(
            node_id = %local.node_id,
            membership = membership.name(),
            span_export = pipeline.is_some(),
            "Node assembled"
        );
        Ok(GranaryNode::new(config, builder.build(), membership, pipeline))
    }
}

async fn create_membership(
    config: &NodeConfig,
    backend: Option<Arc<dyn MembershipBackend>>,
) -> NodeResult<Arc<dyn MembershipProvider>> {
    let timing = config.membership.networked_config();
    match &config.membership.backend {
        MembershipBackendConfig::Local => Ok(Arc::new(LocalMembership::new())),

        MembershipBackendConfig::Shared => {
            let backend = backend.ok_or_else(|| {
                ConfigError::Invalid("shared membership needs a backend from with_membership_backend".into())
            })?;
            Ok(Arc::new(NetworkedMembership::new(backend, timing)))
        }

        #[cfg(feature = "redis-backend")]
        MembershipBackendConfig::Redis { url, namespace } => {
            let backend = granary_membership::RedisMembershipBackend::new(url, namespace).await?;
            Ok(Arc::new(NetworkedMembership::new(Arc::new(backend), timing)))
        }

        #[cfg(not(feature = "redis-backend"))]
        MembershipBackendConfig::Redis { .. } => Err(ConfigError::Invalid(
            "Redis membership requires 'redis-backend' feature".to_string(),
        )
        .into()),
    }
}
