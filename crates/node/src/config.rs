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

//! Node configuration.
//!
//! ## Purpose
//! One [`NodeConfig`] describes everything a node needs at startup: its identity,
//! which membership and storage backends to use, runtime tuning and tracing.
//!
//! ## Precedence (Highest to Lowest)
//! 1. Per-backend environment variables (`GRANARY_MEMBERSHIP_BACKEND`, ...)
//! 2. The preset of `GRANARY_ENVIRONMENT` ([`NodeConfig::for_environment`])
//! 3. `Default::default()` (development preset)
//!
//! A TOML file can be loaded instead with [`NodeConfig::load_from_file`]; missing
//! fields take their defaults.
//!
//! ## Environment Variables
//! - `GRANARY_ENVIRONMENT`: `development` (default) or `production`
//! - `GRANARY_NODE_ID`, `GRANARY_NODE_ADDRESS`
//! - `REDIS`: Redis host used by the production preset (`redis://$REDIS:6379`)
//! - `GRANARY_MEMBERSHIP_BACKEND`: `local` | `shared` | `redis`
//! - `GRANARY_STORAGE_BACKEND`: `in-memory` | `redis`
//! - `GRANARY_SAMPLING_RATIO`: `0.0..=1.0`

use granary_core::DeploymentEnvironment;
use granary_membership::NetworkedMembershipConfig;
use granary_runtime::RuntimeConfig;
use granary_storage::StorageBackendType;
use granary_telemetry::TracingPipelineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Storage name the reference-data grains persist under.
pub const DEFINITIONS_STORAGE: &str = "definitions";

/// Configuration loading error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`NodeConfig`]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range or a combination is unsupported
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Membership backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MembershipBackendConfig {
    /// The process is the only member
    #[default]
    Local,
    /// Networked membership over a coordination store handed to the node builder
    Shared,
    /// Networked membership over Redis (requires the `redis-backend` feature)
    Redis {
        /// Redis server URL
        url: String,
        /// Key namespace prefix
        namespace: String,
    },
}

/// Node identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Unique node id; a dead id can never rejoin, so restarts need a fresh one
    pub node_id: String,
    /// Address peers reach this node at
    pub address: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", ulid::Ulid::new().to_string().to_lowercase()),
            address: "127.0.0.1:11111".to_string(),
        }
    }
}

/// Membership backend and failure-detection timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipSection {
    /// Backend
    pub backend: MembershipBackendConfig,
    /// How often this node renews its heartbeat
    pub heartbeat_interval_ms: u64,
    /// Heartbeat age after which a peer is suspected
    pub suspect_after_ms: u64,
    /// Additional silence before a suspect is declared dead
    pub dead_grace_ms: u64,
    /// How often the view is re-read and failures are detected
    pub refresh_interval_ms: u64,
}

impl Default for MembershipSection {
    fn default() -> Self {
        Self {
            backend: MembershipBackendConfig::Local,
            heartbeat_interval_ms: 1_000,
            suspect_after_ms: 3_000,
            dead_grace_ms: 6_000,
            refresh_interval_ms: 1_000,
        }
    }
}

impl MembershipSection {
    /// Failure-detection timing for networked membership.
    pub fn networked_config(&self) -> NetworkedMembershipConfig {
        NetworkedMembershipConfig {
            suspect_after: Duration::from_millis(self.suspect_after_ms),
            dead_grace: Duration::from_millis(self.dead_grace_ms),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
        }
    }
}

/// Default and named grain storage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Provider for grain types that do not name one
    pub backend: StorageBackendType,
    /// Providers grain factories select by name
    pub named: BTreeMap<String, StorageBackendType>,
}

/// Grain runtime tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Idle activations are deactivated after this long
    pub idle_timeout_ms: u64,
    /// How often idle activations are collected
    pub collection_interval_ms: u64,
    /// Deadline of calls made outside any grain
    pub default_call_timeout_ms: u64,
    /// Automatic retries of retryable faults
    pub max_call_retries: u32,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            idle_timeout_ms: defaults.idle_timeout.as_millis() as u64,
            collection_interval_ms: defaults.collection_interval.as_millis() as u64,
            default_call_timeout_ms: defaults.default_call_timeout.as_millis() as u64,
            max_call_retries: defaults.max_call_retries,
        }
    }
}

impl From<&RuntimeSection> for RuntimeConfig {
    fn from(section: &RuntimeSection) -> Self {
        RuntimeConfig {
            idle_timeout: Duration::from_millis(section.idle_timeout_ms),
            collection_interval: Duration::from_millis(section.collection_interval_ms),
            default_call_timeout: Duration::from_millis(section.default_call_timeout_ms),
            max_call_retries: section.max_call_retries,
        }
    }
}

/// Where finished spans go when the builder is not given an exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanExporterConfig {
    /// Log each span (development console exporter)
    #[default]
    Console,
    /// No built-in exporter; trace context still propagates and spans are discarded
    None,
}

/// Span sampling and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingSection {
    /// `service.name` attribute of every span
    pub service_name: String,
    /// Fraction of new traces that are sampled
    pub sampling_ratio: f64,
    /// Built-in exporter
    pub exporter: SpanExporterConfig,
    /// Queue size before the oldest spans are dropped
    pub queue_capacity: usize,
    /// Spans per export
    pub max_batch_size: usize,
    /// Longest a span waits before export
    pub flush_interval_ms: u64,
}

impl Default for TracingSection {
    fn default() -> Self {
        let defaults = TracingPipelineConfig::default();
        Self {
            service_name: "granary".to_string(),
            sampling_ratio: 1.0,
            exporter: SpanExporterConfig::Console,
            queue_capacity: defaults.queue_capacity,
            max_batch_size: defaults.max_batch_size,
            flush_interval_ms: defaults.flush_interval.as_millis() as u64,
        }
    }
}

impl TracingSection {
    /// Pipeline sizing.
    pub fn pipeline_config(&self) -> TracingPipelineConfig {
        TracingPipelineConfig {
            queue_capacity: self.queue_capacity,
            max_batch_size: self.max_batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Deployment environment the presets came from
    pub environment: DeploymentEnvironment,
    /// Node identity
    pub node: NodeSection,
    /// Membership
    pub membership: MembershipSection,
    /// Storage
    pub storage: StorageSection,
    /// Runtime tuning
    pub runtime: RuntimeSection,
    /// Tracing
    pub tracing: TracingSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::for_environment(DeploymentEnvironment::Development)
    }
}

impl NodeConfig {
    /// Preset for `environment`, with Redis at `localhost` for production.
    pub fn for_environment(environment: DeploymentEnvironment) -> Self {
        Self::preset(environment, "localhost")
    }

    fn preset(environment: DeploymentEnvironment, redis_host: &str) -> Self {
        match environment {
            DeploymentEnvironment::Development => Self {
                environment,
                node: NodeSection::default(),
                membership: MembershipSection::default(),
                storage: StorageSection {
                    backend: StorageBackendType::InMemory,
                    named: BTreeMap::from([(
                        DEFINITIONS_STORAGE.to_string(),
                        StorageBackendType::InMemory,
                    )]),
                },
                runtime: RuntimeSection::default(),
                tracing: TracingSection::default(),
            },
            DeploymentEnvironment::Production => {
                let url = format!("redis://{redis_host}:6379");
                Self {
                    environment,
                    node: NodeSection::default(),
                    membership: MembershipSection {
                        backend: MembershipBackendConfig::Redis {
                            url: url.clone(),
                            namespace: "granary".to_string(),
                        },
                        ..MembershipSection::default()
                    },
                    storage: StorageSection {
                        backend: StorageBackendType::Redis {
                            url: url.clone(),
                            namespace: "granary".to_string(),
                        },
                        named: BTreeMap::from([(
                            DEFINITIONS_STORAGE.to_string(),
                            StorageBackendType::Redis {
                                url,
                                namespace: DEFINITIONS_STORAGE.to_string(),
                            },
                        )]),
                    },
                    runtime: RuntimeSection::default(),
                    tracing: TracingSection {
                        exporter: SpanExporterConfig::None,
                        ..TracingSection::default()
                    },
                }
            }
        }
    }

    /// Configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration from variables supplied by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let environment = match lookup("GRANARY_ENVIRONMENT") {
            Some(value) => value.parse().map_err(ConfigError::Invalid)?,
            None => DeploymentEnvironment::default(),
        };
        let redis_host = lookup("REDIS").unwrap_or_else(|| "localhost".to_string());
        let redis_url = format!("redis://{redis_host}:6379");
        let mut config = Self::preset(environment, &redis_host);

        if let Some(node_id) = lookup("GRANARY_NODE_ID") {
            config.node.node_id = node_id;
        }
        if let Some(address) = lookup("GRANARY_NODE_ADDRESS") {
            config.node.address = address;
        }

        if let Some(backend) = lookup("GRANARY_MEMBERSHIP_BACKEND") {
            config.membership.backend = match backend.to_lowercase().as_str() {
                "local" => MembershipBackendConfig::Local,
                "shared" => MembershipBackendConfig::Shared,
                "redis" => MembershipBackendConfig::Redis {
                    url: redis_url.clone(),
                    namespace: "granary".to_string(),
                },
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "Unknown membership backend: {}. Valid options: local, shared, redis",
                        other
                    )))
                }
            };
        }

        if let Some(backend) = lookup("GRANARY_STORAGE_BACKEND") {
            let (default, definitions) = match backend.to_lowercase().as_str() {
                "in-memory" | "memory" => (StorageBackendType::InMemory, StorageBackendType::InMemory),
                "redis" => (
                    StorageBackendType::Redis {
                        url: redis_url.clone(),
                        namespace: "granary".to_string(),
                    },
                    StorageBackendType::Redis {
                        url: redis_url.clone(),
                        namespace: DEFINITIONS_STORAGE.to_string(),
                    },
                ),
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "Unknown storage backend: {}. Valid options: in-memory, redis",
                        other
                    )))
                }
            };
            config.storage.backend = default;
            config
                .storage
                .named
                .insert(DEFINITIONS_STORAGE.to_string(), definitions);
        }

        if let Some(ratio) = lookup("GRANARY_SAMPLING_RATIO") {
            config.tracing.sampling_ratio = ratio.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("GRANARY_SAMPLING_RATIO is not a number: {ratio}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(document: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.node.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node.node_id must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.tracing.sampling_ratio) {
            return Err(ConfigError::Invalid(format!(
                "tracing.sampling_ratio must be within [0, 1], got {}",
                self.tracing.sampling_ratio
            )));
        }
        if self.tracing.queue_capacity == 0 || self.tracing.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "tracing.queue_capacity and tracing.max_batch_size must be positive".into(),
            ));
        }
        if self.membership.backend != MembershipBackendConfig::Local
            && self.membership.heartbeat_interval_ms >= self.membership.suspect_after_ms
        {
            return Err(ConfigError::Invalid(format!(
                "membership.heartbeat_interval_ms ({}) must be below suspect_after_ms ({})",
                self.membership.heartbeat_interval_ms, self.membership.suspect_after_ms
            )));
        }
        for (name, value) in [
            ("runtime.default_call_timeout_ms", self.runtime.default_call_timeout_ms),
            ("runtime.collection_interval_ms", self.runtime.collection_interval_ms),
            ("membership.heartbeat_interval_ms", self.membership.heartbeat_interval_ms),
            ("membership.refresh_interval_ms", self.membership.refresh_interval_ms),
            ("tracing.flush_interval_ms", self.tracing.flush_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_development_preset() {
        let config = NodeConfig::default();
        assert_eq!(config.environment, DeploymentEnvironment::Development);
        assert_eq!(config.membership.backend, MembershipBackendConfig::Local);
        assert_eq!(config.storage.backend, StorageBackendType::InMemory);
        assert_eq!(
            config.storage.named.get(DEFINITIONS_STORAGE),
            Some(&StorageBackendType::InMemory)
        );
        assert_eq!(config.tracing.exporter, SpanExporterConfig::Console);
        assert!(config.node.node_id.starts_with("node-"));
    }

    #[test]
    fn test_production_preset_uses_redis_host() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("GRANARY_ENVIRONMENT", "production"),
            ("REDIS", "cache.internal"),
            ("GRANARY_NODE_ID", "silo-1"),
        ]))
        .unwrap();

        assert_eq!(config.node.node_id, "silo-1");
        assert_eq!(
            config.membership.backend,
            MembershipBackendConfig::Redis {
                url: "redis://cache.internal:6379".into(),
                namespace: "granary".into(),
            }
        );
        assert_eq!(
            config.storage.named.get(DEFINITIONS_STORAGE),
            Some(&StorageBackendType::Redis {
                url: "redis://cache.internal:6379".into(),
                namespace: DEFINITIONS_STORAGE.into(),
            })
        );
        assert_eq!(config.tracing.exporter, SpanExporterConfig::None);
    }

    #[test]
    fn test_backend_overrides_beat_environment_preset() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("GRANARY_ENVIRONMENT", "production"),
            ("GRANARY_MEMBERSHIP_BACKEND", "local"),
            ("GRANARY_SAMPLING_RATIO", "0.25"),
        ]))
        .unwrap();
        assert_eq!(config.membership.backend, MembershipBackendConfig::Local);
        assert!(matches!(config.storage.backend, StorageBackendType::Redis { .. }));
        assert_eq!(config.tracing.sampling_ratio, 0.25);

        let config = NodeConfig::from_lookup(lookup(&[("GRANARY_STORAGE_BACKEND", "redis")])).unwrap();
        assert_eq!(config.membership.backend, MembershipBackendConfig::Local);
        assert!(matches!(config.storage.backend, StorageBackendType::Redis { .. }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            vec![("GRANARY_ENVIRONMENT", "staging")],
            vec![("GRANARY_MEMBERSHIP_BACKEND", "zookeeper")],
            vec![("GRANARY_STORAGE_BACKEND", "s3")],
            vec![("GRANARY_SAMPLING_RATIO", "often")],
            vec![("GRANARY_SAMPLING_RATIO", "1.5")],
            vec![("GRANARY_NODE_ID", " ")],
        ] {
            let err = NodeConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{vars:?}");
        }
    }

    #[test]
    fn test_toml_fills_missing_fields_with_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            environment = "development"

            [node]
            node_id = "dev-1"

            [membership]
            heartbeat_interval_ms = 200
            backend = { type = "shared" }

            [tracing]
            sampling_ratio = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.node.node_id, "dev-1");
        assert_eq!(config.node.address, "127.0.0.1:11111");
        assert_eq!(config.membership.backend, MembershipBackendConfig::Shared);
        assert_eq!(config.membership.suspect_after_ms, 3_000);
        assert_eq!(config.tracing.sampling_ratio, 0.5);
        assert_eq!(config.runtime, RuntimeSection::default());
    }

    #[test]
    fn test_heartbeat_must_beat_suspicion() {
        let mut config = NodeConfig::default();
        config.membership.backend = MembershipBackendConfig::Shared;
        config.membership.heartbeat_interval_ms = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let cases: [fn(&mut NodeConfig); 4] = [
            |c| c.runtime.collection_interval_ms = 0,
            |c| c.membership.refresh_interval_ms = 0,
            |c| c.membership.heartbeat_interval_ms = 0,
            |c| c.tracing.flush_interval_ms = 0,
        ];
        for zero in cases {
            let mut config = NodeConfig::default();
            zero(&mut config);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("must be positive")));
        }

        let err = NodeConfig::from_toml_str("[tracing]\nflush_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_runtime_section_converts() {
        let section = RuntimeSection {
            idle_timeout_ms: 1_000,
            ..RuntimeSection::default()
        };
        let runtime = RuntimeConfig::from(&section);
        assert_eq!(runtime.idle_timeout, Duration::from_secs(1));
        assert_eq!(runtime.max_call_retries, 2);
    }
}
