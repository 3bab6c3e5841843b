//! Shared test infrastructure: an in-memory cluster and context fixtures.

pub mod mock_cluster;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use valkey_migrator::config::MigrationConfig;
use valkey_migrator::metrics::Metrics;
use valkey_migrator::migration::Context;

pub use mock_cluster::{MockCluster, MockConnection, MockConnector, Pipeline, Write};

/// Fixed "now" used by deterministic clocks.
pub const NOW: i64 = 1_700_000_000_000;

/// Install a fmt subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Context for `cluster` with the clock frozen at [`NOW`].
pub fn context(cluster: &MockCluster, config: MigrationConfig) -> Arc<Context> {
    Arc::new(
        Context::from_nodes_conf(config, &cluster.nodes_conf(), None)
            .unwrap()
            .with_clock(|| NOW),
    )
}

/// Context that records into `metrics`.
pub fn context_with_metrics(
    cluster: &MockCluster,
    config: MigrationConfig,
    metrics: Arc<Metrics>,
) -> Arc<Context> {
    Arc::new(
        Context::from_nodes_conf(config, &cluster.nodes_conf(), Some(metrics))
            .unwrap()
            .with_clock(|| NOW),
    )
}

/// Context whose clock starts at [`NOW`] and advances `step_ms` per reading.
pub fn context_with_ticking_clock(
    cluster: &MockCluster,
    config: MigrationConfig,
    step_ms: i64,
) -> Arc<Context> {
    let clock = Arc::new(AtomicI64::new(NOW));
    Arc::new(
        Context::from_nodes_conf(config, &cluster.nodes_conf(), None)
            .unwrap()
            .with_clock(move || clock.fetch_add(step_ms, Ordering::SeqCst)),
    )
}
