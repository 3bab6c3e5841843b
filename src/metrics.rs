//! Prometheus metrics for migration runs.
//!
//! Counters are lock-free, so every worker records into the same [`Metrics`]
//! without coordination.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::migration::report::Outcome;

/// Labels for record outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: &'static str,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for a migration run
pub struct Metrics {
    /// Records by final outcome
    pub records_total: Family<OutcomeLabels, Counter>,
    /// Failed delivery attempts, retried or not
    pub delivery_failures_total: Counter,
    /// Topology refreshes after failed deliveries
    pub topology_refreshes_total: Counter,
    /// Pipeline flush duration histogram
    pub flush_duration_seconds: Histogram,
    /// Endpoint pools currently open
    pub open_pools: Gauge,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("open_pools", &self.open_pools.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let records_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "migrator_records",
            "Total number of records by outcome",
            records_total.clone(),
        );

        let delivery_failures_total = Counter::default();
        registry.register(
            "migrator_delivery_failures",
            "Total number of failed delivery attempts",
            delivery_failures_total.clone(),
        );

        let topology_refreshes_total = Counter::default();
        registry.register(
            "migrator_topology_refreshes",
            "Total number of topology refreshes",
            topology_refreshes_total.clone(),
        );

        let flush_duration_seconds = Histogram::new(exponential_buckets(0.0005, 2.0, 16));
        registry.register(
            "migrator_flush_duration_seconds",
            "Duration of pipeline flushes in seconds",
            flush_duration_seconds.clone(),
        );

        let open_pools = Gauge::default();
        registry.register(
            "migrator_open_pools",
            "Number of endpoint pools currently open",
            open_pools.clone(),
        );

        Self {
            records_total,
            delivery_failures_total,
            topology_refreshes_total,
            flush_duration_seconds,
            open_pools,
            registry,
        }
    }

    /// Record a record's final outcome
    pub fn record_outcome(&self, outcome: Outcome) {
        let labels = OutcomeLabels {
            outcome: outcome.as_str(),
        };
        self.records_total.get_or_create(&labels).inc();
    }

    /// Current count for an outcome
    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        let labels = OutcomeLabels {
            outcome: outcome.as_str(),
        };
        self.records_total.get_or_create(&labels).get()
    }

    /// Record a failed delivery attempt
    pub fn record_delivery_failure(&self) {
        self.delivery_failures_total.inc();
    }

    /// Record a topology refresh
    pub fn record_topology_refresh(&self) {
        self.topology_refreshes_total.inc();
    }

    /// Record a flush duration
    pub fn observe_flush(&self, duration_secs: f64) {
        self.flush_duration_seconds.observe(duration_secs);
    }

    /// Track a pool being opened
    pub fn pool_opened(&self) {
        self.open_pools.inc();
    }

    /// Track a pool being closed
    pub fn pool_closed(&self) {
        self.open_pools.dec();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}
