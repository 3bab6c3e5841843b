//! Shared context for migration workers.
//!
//! The Context struct holds the immutable state every worker reads: the
//! configuration, the topology seed, the record filter and optional metrics.
//! It is built once and shared behind an `Arc`.

use std::sync::Arc;

use crate::client::types::ClusterTopology;
use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::metrics::Metrics;

use super::filter::RecordFilter;

/// Source of the current time in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}

/// Shared context for migration workers
#[derive(Clone)]
pub struct Context {
    /// Recognized options
    pub config: MigrationConfig,
    /// Topology seed each worker opens its pool from
    pub topology: ClusterTopology,
    /// Records to migrate
    pub filter: RecordFilter,
    /// Optional metrics shared by every worker
    pub metrics: Option<Arc<Metrics>>,
    clock: Clock,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("masters", &self.topology.slot_owners().len())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a new context, validating the configuration and topology seed.
    pub fn new(
        config: MigrationConfig,
        topology: ClusterTopology,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        config.validate()?;
        if topology.slot_owners().is_empty() {
            return Err(MigrationError::InvalidConfig(
                "Topology seed has no master owning slots".to_string(),
            ));
        }
        let filter = RecordFilter::from_config(&config)?;
        Ok(Self {
            config,
            topology,
            filter,
            metrics,
            clock: Arc::new(now_ms),
        })
    }

    /// Create a context from the text of a `nodes.conf` or `CLUSTER NODES` reply.
    pub fn from_nodes_conf(
        config: MigrationConfig,
        nodes_conf: &str,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let topology = ClusterTopology::parse(nodes_conf)?;
        Self::new(config, topology, metrics)
    }

    /// Replace the clock used for TTL computation.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current time according to this context's clock.
    pub fn now_ms(&self) -> i64 {
        (self.clock)()
    }
}
