//! Per-worker migration visitor.
//!
//! A visitor turns parser events into restore commands for its own endpoint
//! pool and retries failed deliveries against refreshed topology. The pool's
//! lifetime follows the phase events:
//!
//! ```text
//! Idle --stream-start--> PoolOpen --stream-end/phase-change--> Closed
//!                          ^  |                                   |
//!                          |  +-- record (self-loop)              |
//!                          +-------------stream-start-------------+
//! ```
//!
//! A pool that cannot be opened moves the worker to `Failed`; what happens next
//! depends on [`ConnectionFailurePolicy`].

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::command::RestoreCommand;
use super::context::Context;
use super::event::{Event, Record};
use super::report::{MigrationReport, Outcome};
use crate::client::endpoint::Connector;
use crate::client::pool::{Delivery, EndpointPool};
use crate::config::ConnectionFailurePolicy;
use crate::error::{MigrationError, Result};

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerState {
    /// No stream has started yet.
    #[default]
    Idle,
    /// A pool is open and records are being migrated.
    PoolOpen,
    /// The last phase finished and its pool was closed.
    Closed,
    /// The pool for the current phase could not be used.
    Failed,
}

impl WorkerState {
    /// Check if records can be migrated in this state.
    pub fn accepts_records(&self) -> bool {
        matches!(self, WorkerState::PoolOpen)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::PoolOpen => write!(f, "pool-open"),
            WorkerState::Closed => write!(f, "closed"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}

/// One record travelling through the pool with what is left of its retry budget.
#[derive(Debug)]
pub struct Attempt {
    pub record: Record,
    pub budget: u32,
}

/// Migrates the records one worker receives.
pub struct MigrationVisitor<C: Connector> {
    worker: usize,
    context: Arc<Context>,
    connector: Arc<C>,
    pool: Option<EndpointPool<C, Attempt>>,
    state: WorkerState,
    report: MigrationReport,
}

impl<C: Connector> MigrationVisitor<C> {
    /// Create an idle visitor for `worker`.
    pub fn new(worker: usize, context: Arc<Context>, connector: Arc<C>) -> Self {
        Self {
            worker,
            context,
            connector,
            pool: None,
            state: WorkerState::Idle,
            report: MigrationReport::default(),
        }
    }

    /// Handle one event from the parser.
    ///
    /// Per-record failures never surface here; they end up in the report. An
    /// error means the worker cannot continue under the configured policy.
    pub async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::StreamStart => self.on_stream_start().await,
            Event::Record(record) => {
                self.on_record(record).await;
                Ok(())
            }
            Event::Auxiliary(field) => {
                debug!(worker = self.worker, key = %field.key, "Passing auxiliary field through");
                self.finish(Outcome::Auxiliary, None);
                Ok(())
            }
            Event::StreamEnd | Event::PhaseChange => self.on_phase_end().await,
        }
    }

    async fn on_stream_start(&mut self) -> Result<()> {
        if self.pool.is_some() {
            warn!(worker = self.worker, "Stream started with a pool still open, closing it");
            if let Err(e) = self.finish_pool().await {
                self.fail(e)?;
            }
        }

        let depth = self.context.config.migration_batch_size;
        match EndpointPool::open(Arc::clone(&self.connector), &self.context.topology, depth).await
        {
            Ok(pool) => {
                if let Some(ref metrics) = self.context.metrics {
                    metrics.pool_opened();
                }
                self.pool = Some(pool.with_metrics(self.context.metrics.clone()));
                self.state = WorkerState::PoolOpen;
                debug!(worker = self.worker, "Pool open for new phase");
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    async fn on_phase_end(&mut self) -> Result<()> {
        if self.pool.is_none() {
            if self.state == WorkerState::PoolOpen {
                warn!(worker = self.worker, "Phase ended without a pool");
            }
            self.state = WorkerState::Closed;
            return Ok(());
        }
        let drained = self.finish_pool().await;
        self.state = WorkerState::Closed;
        info!(worker = self.worker, report = %self.report, "Phase complete");
        match drained {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    async fn on_record(&mut self, record: Record) {
        if !self.context.filter.accepts(&record) {
            debug!(worker = self.worker, key = %record.display_key(), db = record.db, "Filtered record");
            self.finish(Outcome::Filtered, None);
            return;
        }

        let Some(mut pool) = self.pool.take() else {
            if self.state != WorkerState::Failed {
                warn!(worker = self.worker, state = %self.state, key = %record.display_key(), "Record outside of a stream");
            }
            self.finish(Outcome::Abandoned, Some(&record));
            return;
        };

        let attempt = Attempt {
            record,
            budget: self.context.config.migration_retries,
        };
        let deliveries = self.submit(&mut pool, attempt).await;
        self.settle(&mut pool, deliveries).await;
        self.pool = Some(pool);
    }

    /// Build the command for an attempt and queue it on the pool.
    async fn submit(
        &mut self,
        pool: &mut EndpointPool<C, Attempt>,
        attempt: Attempt,
    ) -> Vec<Delivery<Attempt>> {
        let now = self.context.now_ms();
        let replace = self.context.config.replace_existing;
        match RestoreCommand::for_record(&attempt.record, now, replace) {
            Some(command) => pool.batch(command, attempt).await,
            None => {
                self.finish(Outcome::Expired, Some(&attempt.record));
                Vec::new()
            }
        }
    }

    /// Resolve deliveries, retrying failures until each record has a final
    /// outcome or is pending in the pool again.
    async fn settle(
        &mut self,
        pool: &mut EndpointPool<C, Attempt>,
        deliveries: Vec<Delivery<Attempt>>,
    ) {
        let mut queue = VecDeque::from(deliveries);
        while let Some(delivery) = queue.pop_front() {
            let error = match delivery.result {
                Ok(()) => {
                    self.finish(Outcome::Migrated, None);
                    continue;
                }
                Err(e) => e,
            };

            self.report.failed_attempts += 1;
            if let Some(ref metrics) = self.context.metrics {
                metrics.record_delivery_failure();
            }

            let mut attempt = delivery.ticket;
            if attempt.budget == 0 || !error.is_retryable() {
                warn!(
                    worker = self.worker,
                    key = %attempt.record.display_key(),
                    budget = attempt.budget,
                    error = %error,
                    "Giving up on record"
                );
                self.finish(Outcome::Exhausted, None);
                continue;
            }
            attempt.budget -= 1;

            debug!(
                worker = self.worker,
                key = %attempt.record.display_key(),
                budget = attempt.budget,
                error = %error,
                "Delivery failed, refreshing topology"
            );
            self.report.topology_refreshes += 1;
            if let Some(ref metrics) = self.context.metrics {
                metrics.record_topology_refresh();
            }
            match pool.update_topology(&attempt.record.key).await {
                Ok(refresh) => debug!(worker = self.worker, address = %refresh.address(), "Topology refreshed"),
                Err(e) => warn!(worker = self.worker, error = %e, "Topology refresh failed"),
            }

            queue.extend(self.submit(pool, attempt).await);
        }
    }

    /// Flush until nothing is pending, then close the pool.
    ///
    /// Fails with `Connection` only if the drain hit unreachable shards and no
    /// pipeline of this phase ever reached a node.
    async fn finish_pool(&mut self) -> Result<()> {
        let Some(mut pool) = self.pool.take() else {
            return Ok(());
        };

        let mut unreachable = 0;
        while pool.pending() > 0 {
            let report = pool.flush().await;
            unreachable += report.endpoints_unreachable;
            self.settle(&mut pool, report.deliveries).await;
        }
        let stalled = unreachable > 0 && pool.pipelines_delivered() == 0;
        let endpoints = pool.endpoint_count();
        self.close_pool(pool).await;

        if stalled {
            return Err(MigrationError::Connection(format!(
                "no shard reachable ({} endpoints)",
                endpoints
            )));
        }
        Ok(())
    }

    async fn close_pool(&mut self, mut pool: EndpointPool<C, Attempt>) {
        for attempt in pool.close().await {
            self.finish(Outcome::Abandoned, Some(&attempt.record));
        }
        if let Some(ref metrics) = self.context.metrics {
            metrics.pool_closed();
        }
    }

    fn fail(&mut self, error: MigrationError) -> Result<()> {
        self.state = WorkerState::Failed;
        match self.context.config.on_connection_failure {
            ConnectionFailurePolicy::AbortRun => {
                error!(worker = self.worker, error = %error, "Worker stopping");
                Err(error)
            }
            ConnectionFailurePolicy::SkipPhase => {
                error!(worker = self.worker, error = %error, "Skipping phase, records will be abandoned");
                Ok(())
            }
        }
    }

    fn finish(&mut self, outcome: Outcome, record: Option<&Record>) {
        if let Some(record) = record {
            debug!(worker = self.worker, key = %record.display_key(), outcome = %outcome, "Record skipped");
        }
        self.report.record(outcome);
        if let Some(ref metrics) = self.context.metrics {
            metrics.record_outcome(outcome);
        }
    }

    /// Flush and close any open pool at the end of input.
    pub async fn shutdown(&mut self) -> MigrationReport {
        if let Err(e) = self.finish_pool().await {
            warn!(worker = self.worker, error = %e, "Shutdown flush reached no shard");
        }
        if self.state == WorkerState::PoolOpen {
            self.state = WorkerState::Closed;
        }
        self.report
    }

    /// Close any open pool without flushing. Pending records are abandoned.
    pub async fn cancel(&mut self) -> MigrationReport {
        if let Some(pool) = self.pool.take() {
            info!(worker = self.worker, pending = pool.pending(), "Cancelling, closing pool");
            self.close_pool(pool).await;
        }
        self.state = WorkerState::Closed;
        self.report
    }

    /// Count an event that will never be handled.
    pub fn abandon(&mut self, event: &Event) {
        if let Event::Record(record) = event {
            self.finish(Outcome::Abandoned, Some(record));
        }
    }

    /// Worker index.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Outcomes counted so far.
    pub fn report(&self) -> MigrationReport {
        self.report
    }

    /// Commands waiting in the pool, 0 if no pool is open.
    pub fn pending(&self) -> usize {
        self.pool.as_ref().map_or(0, EndpointPool::pending)
    }
}
