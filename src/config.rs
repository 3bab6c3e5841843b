//! Migration configuration.
//!
//! Read once at startup and shared read-only by every worker.

use std::time::Duration;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::migration::event::DataType;

/// What a worker does when its pool cannot connect to any shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionFailurePolicy {
    /// Stop the worker and abort the whole run.
    #[default]
    AbortRun,
    /// Drop this worker's records for the current phase and try again on the
    /// next stream-start.
    SkipPhase,
}

/// Recognized migration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationConfig {
    /// Commands batched per endpoint before an automatic flush.
    pub migration_batch_size: usize,
    /// Retry budget per record.
    pub migration_retries: u32,
    /// Number of workers.
    pub migration_threads: usize,
    /// Overwrite keys that already exist at the destination.
    pub replace_existing: bool,
    /// Bounded queue length per worker.
    pub queue_capacity: usize,
    /// Behavior when no shard is reachable at pool open.
    pub on_connection_failure: ConnectionFailurePolicy,
    /// Only keys matching one of these patterns are migrated (empty = all).
    pub key_patterns: Vec<String>,
    /// Only values of these types are migrated (empty = all).
    pub data_types: Vec<DataType>,
    /// Password for target nodes.
    pub password: Option<String>,
    /// Connect to target nodes over TLS.
    pub tls: bool,
    /// Connection timeout in milliseconds.
    pub connection_timeout_ms: u64,
    /// Command timeout in milliseconds.
    pub command_timeout_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migration_batch_size: 4096,
            migration_retries: 1,
            migration_threads: 4,
            replace_existing: false,
            queue_capacity: 1024,
            on_connection_failure: ConnectionFailurePolicy::AbortRun,
            key_patterns: Vec::new(),
            data_types: Vec::new(),
            password: None,
            tls: false,
            connection_timeout_ms: 10_000,
            command_timeout_ms: 30_000,
        }
    }
}

impl MigrationConfig {
    /// Parse a JSON configuration document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MigrationError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the pipeline depth.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.migration_batch_size = batch_size;
        self
    }

    /// Set the per-record retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.migration_retries = retries;
        self
    }

    /// Set the worker count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.migration_threads = threads;
        self
    }

    /// Set whether existing keys are replaced.
    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    /// Set the connection failure policy.
    pub fn with_connection_failure(mut self, policy: ConnectionFailurePolicy) -> Self {
        self.on_connection_failure = policy;
        self
    }

    /// Set key patterns.
    pub fn with_key_patterns(mut self, patterns: Vec<String>) -> Self {
        self.key_patterns = patterns;
        self
    }

    /// Set migrated data types.
    pub fn with_data_types(mut self, types: Vec<DataType>) -> Self {
        self.data_types = types;
        self
    }

    /// Set password.
    pub fn with_password(mut self, password: String) -> Self {
        self.password = Some(password);
        self
    }

    /// Connection timeout.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Command timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Compile the key patterns.
    pub fn compiled_patterns(&self) -> Result<Vec<Regex>> {
        self.key_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    MigrationError::InvalidConfig(format!("Invalid key pattern {}: {}", p, e))
                })
            })
            .collect()
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.migration_batch_size == 0 {
            return Err(MigrationError::InvalidConfig(
                "migrationBatchSize must be at least 1".to_string(),
            ));
        }
        if self.migration_threads == 0 {
            return Err(MigrationError::InvalidConfig(
                "migrationThreads must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(MigrationError::InvalidConfig(
                "queueCapacity must be at least 1".to_string(),
            ));
        }
        self.compiled_patterns()?;
        Ok(())
    }
}
