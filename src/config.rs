// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Environment-driven configuration.
//!
//! Recognized variables:
//!
//! - `OPSCORE_API_KEY` — bearer token for authenticated endpoints
//! - `OPSCORE_STORAGE_BACKEND` — `memory` (default) or `redis`
//! - `OPSCORE_REDIS_HOST` / `OPSCORE_REDIS_PORT` / `OPSCORE_REDIS_DB`
//! - `OPSCORE_ROUTING_BASE_URL` — agent-routing service base URL
//! - `OPSCORE_ROUTING_TIMEOUT_SECONDS` — outbound request timeout (30)
//! - `OPSCORE_ROUTING_AUTHORIZATION` — optional outbound Authorization header
//! - `OPSCORE_HTTP_LISTEN_ADDR` — listen address (`0.0.0.0:8000`)
//! - `OPSCORE_SEED_WORKFLOWS` — optional directory of definition files

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::domain::error::OpsCoreError;
use crate::domain::repository::{RedisConfig, StorageBackend};

/// Fallback bearer token for local development only.
const DEFAULT_API_KEY: &str = "test-api-key";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub storage_backend: StorageBackend,
    pub routing_base_url: String,
    pub routing_timeout: Duration,
    pub routing_authorization: Option<String>,
    pub listen_addr: SocketAddr,
    pub seed_workflows: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, OpsCoreError> {
        let api_key = match std::env::var("OPSCORE_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                warn!("OPSCORE_API_KEY not set; falling back to the insecure default");
                DEFAULT_API_KEY.to_string()
            }
        };

        let backend_name = std::env::var("OPSCORE_STORAGE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();
        let storage_backend = match backend_name.as_str() {
            "memory" => StorageBackend::Memory,
            "redis" => StorageBackend::Redis(RedisConfig {
                host: std::env::var("OPSCORE_REDIS_HOST").map_err(|_| {
                    OpsCoreError::Configuration(
                        "OPSCORE_REDIS_HOST is required when OPSCORE_STORAGE_BACKEND=redis"
                            .to_string(),
                    )
                })?,
                port: parse_env("OPSCORE_REDIS_PORT", 6379)?,
                db: parse_env("OPSCORE_REDIS_DB", 0)?,
            }),
            other => {
                return Err(OpsCoreError::Configuration(format!(
                    "unknown storage backend: {other}"
                )));
            }
        };

        let routing_base_url = std::env::var("OPSCORE_ROUTING_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8001".to_string());
        let routing_timeout =
            Duration::from_secs(parse_env("OPSCORE_ROUTING_TIMEOUT_SECONDS", 30u64)?);
        let routing_authorization = std::env::var("OPSCORE_ROUTING_AUTHORIZATION").ok();

        let listen_addr = std::env::var("OPSCORE_HTTP_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| {
                OpsCoreError::Configuration(format!("invalid OPSCORE_HTTP_LISTEN_ADDR: {e}"))
            })?;

        let seed_workflows = std::env::var("OPSCORE_SEED_WORKFLOWS").ok().map(PathBuf::from);

        Ok(Self {
            api_key,
            storage_backend,
            routing_base_url,
            routing_timeout,
            routing_authorization,
            listen_addr,
            seed_workflows,
        })
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, OpsCoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| OpsCoreError::Configuration(format!("invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
