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

//! Configuration support for storage backends.
//!
//! ## Environment Variables
//! - `GRANARY_STORAGE_BACKEND`: "in-memory" | "memory" (default) or "redis"
//! - `GRANARY_STORAGE_REDIS_URL`: Redis URL (default: "redis://localhost:6379")
//! - `GRANARY_STORAGE_REDIS_NAMESPACE`: key prefix (default: "granary")
//!
//! ### Redis
//! ```bash
//! export GRANARY_STORAGE_BACKEND=redis
//! export GRANARY_STORAGE_REDIS_URL=redis://redis:6379
//! ```

use crate::{MemoryStorageProvider, StorageError, StorageProvider, StorageResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage backend type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageBackendType {
    /// In-memory HashMap backend (default, always available)
    #[default]
    InMemory,
    /// Redis backend (requires redis-backend feature)
    Redis {
        /// Redis server URL
        url: String,
        /// Key namespace prefix
        namespace: String,
    },
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend type
    pub backend: StorageBackendType,
}

impl StorageConfig {
    /// Configuration with an explicit backend.
    pub fn new(backend: StorageBackendType) -> Self {
        Self { backend }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend_str = std::env::var("GRANARY_STORAGE_BACKEND")
            .unwrap_or_else(|_| "in-memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "in-memory" | "memory" => StorageBackendType::InMemory,
            "redis" => {
                let url = std::env::var("GRANARY_STORAGE_REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string());
                let namespace = std::env::var("GRANARY_STORAGE_REDIS_NAMESPACE")
                    .unwrap_or_else(|_| "granary".to_string());
                StorageBackendType::Redis { url, namespace }
            }
            other => {
                return Err(StorageError::ConfigError(format!(
                    "Unknown storage backend: {}. Valid options: in-memory, redis",
                    other
                )));
            }
        };

        Ok(Self { backend })
    }
}

/// Create a storage provider from environment configuration.
pub async fn create_storage_from_env() -> StorageResult<Arc<dyn StorageProvider>> {
    create_storage_from_config(StorageConfig::from_env()?).await
}

/// Create a storage provider from explicit configuration.
pub async fn create_storage_from_config(
    config: StorageConfig,
) -> StorageResult<Arc<dyn StorageProvider>> {
    match config.backend {
        StorageBackendType::InMemory => Ok(Arc::new(MemoryStorageProvider::new())),

        #[cfg(feature = "redis-backend")]
        StorageBackendType::Redis { url, namespace } => {
            let provider = crate::redis::RedisStorageProvider::new(&url, &namespace).await?;
            Ok(Arc::new(provider))
        }

        #[cfg(not(feature = "redis-backend"))]
        StorageBackendType::Redis { .. } => Err(StorageError::ConfigError(
            "Redis storage requires 'redis-backend' feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_is_in_memory() {
        let config = StorageConfig::default();
        assert_eq!(config.backend, StorageBackendType::InMemory);

        let provider = create_storage_from_config(config).await.unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_deserialize_redis_backend() {
        let json = r#"{"backend":{"type":"redis","url":"redis://r:6379","namespace":"definitions"}}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.backend,
            StorageBackendType::Redis {
                url: "redis://r:6379".to_string(),
                namespace: "definitions".to_string(),
            }
        );
    }

    #[cfg(not(feature = "redis-backend"))]
    #[tokio::test]
    async fn test_redis_without_feature_is_config_error() {
        let config = StorageConfig::new(StorageBackendType::Redis {
            url: "redis://localhost:6379".to_string(),
            namespace: "granary".to_string(),
        });
        let err = create_storage_from_config(config).await.err().unwrap();
        assert!(matches!(err, StorageError::ConfigError(_)));
    }
}
