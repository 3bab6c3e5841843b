//! Endpoint pool: pipelined, slot-aware delivery to every shard.
//!
//! A pool is owned by exactly one worker. Commands are appended to the pending
//! batch of the endpoint that owns the key's slot; a batch that reaches the
//! pipeline depth is flushed immediately. Every command handed to the pool comes
//! back to the caller exactly once as a [`Delivery`], either from a flush or
//! from [`EndpointPool::close`] as an abandoned ticket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::endpoint::{Connection, Connector};
use super::types::ClusterTopology;
use crate::error::{MigrationError, Result};
use crate::metrics::Metrics;
use crate::migration::command::RestoreCommand;
use crate::slots::{SlotTable, key_slot};

/// Result of one command from a flush.
#[derive(Debug)]
pub struct Delivery<T> {
    /// Caller context handed in with the command.
    pub ticket: T,
    /// Key the command wrote.
    pub key: Bytes,
    /// Reply outcome.
    pub result: Result<()>,
}

impl<T> Delivery<T> {
    fn failed(ticket: T, key: Bytes, error: MigrationError) -> Self {
        Self {
            ticket,
            key,
            result: Err(error),
        }
    }

    /// Check if the command was accepted.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Deliveries from a full flush.
#[derive(Debug)]
pub struct FlushReport<T> {
    pub deliveries: Vec<Delivery<T>>,
    /// Endpoints that had pending commands.
    pub endpoints_flushed: usize,
    /// Endpoints whose whole pipeline failed at the connection level.
    pub endpoints_unreachable: usize,
}

impl<T> Default for FlushReport<T> {
    fn default() -> Self {
        Self {
            deliveries: Vec::new(),
            endpoints_flushed: 0,
            endpoints_unreachable: 0,
        }
    }
}

impl<T> FlushReport<T> {
    /// First failure in the flush, if any.
    pub fn first_error(&self) -> Option<&MigrationError> {
        self.deliveries.iter().find_map(|d| d.result.as_ref().err())
    }

    /// Check if no endpoint could be reached at all.
    pub fn all_unreachable(&self) -> bool {
        self.endpoints_flushed > 0 && self.endpoints_unreachable == self.endpoints_flushed
    }
}

/// How a topology refresh resolved the owner of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyRefresh {
    /// Followed a `-MOVED`/`-ASK` reply seen during a flush.
    Redirected { slot: u16, address: String },
    /// Reloaded `CLUSTER NODES` from a reachable endpoint.
    Reloaded { slot: u16, address: String },
    /// No endpoint could answer; reconnected the current owner.
    Reconnected { slot: u16, address: String },
}

impl TopologyRefresh {
    /// Address now owning the slot.
    pub fn address(&self) -> &str {
        match self {
            TopologyRefresh::Redirected { address, .. }
            | TopologyRefresh::Reloaded { address, .. }
            | TopologyRefresh::Reconnected { address, .. } => address,
        }
    }
}

/// Commands not yet flushed to an endpoint, in insertion order.
struct PendingBatch<T> {
    commands: Vec<RestoreCommand>,
    tickets: Vec<T>,
}

impl<T> PendingBatch<T> {
    fn new() -> Self {
        Self {
            commands: Vec::new(),
            tickets: Vec::new(),
        }
    }

    fn push(&mut self, command: RestoreCommand, ticket: T) {
        self.commands.push(command);
        self.tickets.push(ticket);
    }

    fn len(&self) -> usize {
        self.commands.len()
    }

    fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn take(&mut self) -> (Vec<RestoreCommand>, Vec<T>) {
        (
            std::mem::take(&mut self.commands),
            std::mem::take(&mut self.tickets),
        )
    }
}

/// One shard of the target cluster.
struct Endpoint<C, T> {
    host: String,
    port: u16,
    /// `None` while the node is unreachable; the next flush reconnects.
    connection: Option<C>,
    pending: PendingBatch<T>,
}

impl<C, T> Endpoint<C, T> {
    fn new(host: String, port: u16, connection: Option<C>) -> Self {
        Self {
            host,
            port,
            connection,
            pending: PendingBatch::new(),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pipelined connections to every shard of one cluster.
pub struct EndpointPool<C: Connector, T> {
    connector: Arc<C>,
    endpoints: Vec<Endpoint<C::Connection, T>>,
    slots: SlotTable,
    /// Redirect replies seen during flushes, by slot.
    redirects: HashMap<u16, String>,
    pipeline_depth: usize,
    /// Pipelines that reached a node and got replies since open.
    pipelines_delivered: usize,
    metrics: Option<Arc<Metrics>>,
    closed: bool,
}

impl<C: Connector, T: Send + 'static> EndpointPool<C, T> {
    /// Connect to every master in `topology` that owns slots.
    ///
    /// Masters that cannot be reached stay in the routing table and are retried
    /// on their next flush. Fails only when no master is reachable.
    #[instrument(skip(connector, topology), fields(masters = topology.slot_owners().len()))]
    pub async fn open(
        connector: Arc<C>,
        topology: &ClusterTopology,
        pipeline_depth: usize,
    ) -> Result<Self> {
        let owners = topology.slot_owners();
        if owners.is_empty() {
            return Err(MigrationError::Connection(
                "Topology has no master owning slots".to_string(),
            ));
        }

        let mut pool = Self {
            connector,
            endpoints: Vec::with_capacity(owners.len()),
            slots: SlotTable::new(),
            redirects: HashMap::new(),
            pipeline_depth: pipeline_depth.max(1),
            pipelines_delivered: 0,
            metrics: None,
            closed: false,
        };

        for node in owners {
            let connection = match pool.connector.connect(&node.host, node.port).await {
                Ok(connection) => Some(connection),
                Err(e) => {
                    warn!(address = %node.address(), error = %e, "Shard unreachable at open");
                    None
                }
            };
            let idx = pool.endpoints.len();
            pool.endpoints
                .push(Endpoint::new(node.host.clone(), node.port, connection));
            for range in &node.slots {
                pool.slots.assign_range(*range, idx);
            }
        }

        let connected = pool.connected();
        if connected == 0 {
            return Err(MigrationError::Connection(format!(
                "None of {} shards reachable",
                pool.endpoints.len()
            )));
        }

        info!(
            endpoints = pool.endpoints.len(),
            connected,
            slots_assigned = pool.slots.assigned(),
            pipeline_depth = pool.pipeline_depth,
            "Opened endpoint pool"
        );
        Ok(pool)
    }

    /// Record flush durations into `metrics`.
    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Queue `command` on the endpoint owning its key.
    ///
    /// Returns the deliveries of the automatic flush triggered when the
    /// endpoint's batch reaches the pipeline depth, or an immediate failure if
    /// the slot has no owner. Otherwise returns nothing; the command is pending.
    pub async fn batch(&mut self, command: RestoreCommand, ticket: T) -> Vec<Delivery<T>> {
        if self.closed {
            return vec![Delivery::failed(
                ticket,
                command.key,
                MigrationError::Connection("Endpoint pool is closed".to_string()),
            )];
        }

        let slot = key_slot(&command.key);
        let Some(idx) = self.slots.owner(slot) else {
            return vec![Delivery::failed(
                ticket,
                command.key,
                MigrationError::Unrouted(slot),
            )];
        };
        let Some(endpoint) = self.endpoints.get_mut(idx) else {
            return vec![Delivery::failed(
                ticket,
                command.key,
                MigrationError::Unrouted(slot),
            )];
        };

        endpoint.pending.push(command, ticket);
        if endpoint.pending.len() >= self.pipeline_depth {
            let (deliveries, _) = self.flush_endpoint(idx).await;
            return deliveries;
        }
        Vec::new()
    }

    /// Flush every endpoint's pending batch.
    ///
    /// A failing endpoint does not stop the others from being flushed.
    pub async fn flush(&mut self) -> FlushReport<T> {
        let mut report = FlushReport::default();
        for idx in 0..self.endpoints.len() {
            if self
                .endpoints
                .get(idx)
                .is_none_or(|endpoint| endpoint.pending.is_empty())
            {
                continue;
            }
            report.endpoints_flushed += 1;
            let (deliveries, unreachable) = self.flush_endpoint(idx).await;
            if unreachable {
                report.endpoints_unreachable += 1;
            }
            report.deliveries.extend(deliveries);
        }
        if let Some(error) = report.first_error() {
            debug!(
                endpoints = report.endpoints_flushed,
                unreachable = report.endpoints_unreachable,
                error = %error,
                "Flush completed with failures"
            );
        }
        report
    }

    /// Send one endpoint's pending batch. The flag is set when the whole
    /// pipeline failed at the connection level.
    async fn flush_endpoint(&mut self, idx: usize) -> (Vec<Delivery<T>>, bool) {
        let Some(endpoint) = self.endpoints.get_mut(idx) else {
            return (Vec::new(), false);
        };
        if endpoint.pending.is_empty() {
            return (Vec::new(), false);
        }
        let (commands, tickets) = endpoint.pending.take();
        let started = Instant::now();

        if endpoint.connection.is_none() {
            match self.connector.connect(&endpoint.host, endpoint.port).await {
                Ok(connection) => {
                    info!(address = %endpoint.address(), "Reconnected to shard");
                    endpoint.connection = Some(connection);
                }
                Err(e) => {
                    warn!(address = %endpoint.address(), error = %e, "Shard still unreachable");
                    return (fail_all(commands, tickets, &e), true);
                }
            }
        }
        let Some(connection) = endpoint.connection.as_mut() else {
            return (Vec::new(), false);
        };

        let outcome = match connection.send_pipeline(&commands).await {
            Ok(results) if results.len() == commands.len() => Ok(results),
            Ok(results) => Err(MigrationError::Delivery(format!(
                "{} replies for {} commands",
                results.len(),
                commands.len()
            ))),
            Err(e) => Err(e),
        };

        if let Some(ref metrics) = self.metrics {
            metrics.observe_flush(started.elapsed().as_secs_f64());
        }

        match outcome {
            Ok(results) => {
                self.pipelines_delivered += 1;
                let deliveries = commands
                    .into_iter()
                    .zip(tickets)
                    .zip(results)
                    .map(|((command, ticket), result)| {
                        if let Err(MigrationError::Redirected { slot, ref address }) = result {
                            self.redirects.insert(slot, address.clone());
                        }
                        Delivery {
                            ticket,
                            key: command.key,
                            result,
                        }
                    })
                    .collect();
                (deliveries, false)
            }
            Err(e) => {
                warn!(address = %endpoint.address(), error = %e, "Pipeline failed, dropping connection");
                if let Some(connection) = endpoint.connection.take() {
                    connection.close().await;
                }
                (fail_all(commands, tickets, &e), true)
            }
        }
    }

    /// Re-resolve which shard owns `key` after a failed delivery.
    ///
    /// Follows a redirect seen for the key's slot if there is one, otherwise
    /// reloads `CLUSTER NODES` from the first endpoint that answers, otherwise
    /// reconnects the endpoint currently owning the slot.
    #[instrument(skip(self, key), fields(slot = key_slot(key)))]
    pub async fn update_topology(&mut self, key: &[u8]) -> Result<TopologyRefresh> {
        let slot = key_slot(key);

        if let Some(address) = self.redirects.remove(&slot)
            && let Some((host, port)) = split_address(&address)
        {
            let idx = self.endpoint_for(host, port).await;
            self.slots.assign(slot, idx);
            debug!(address = %address, "Followed redirect");
            return Ok(TopologyRefresh::Redirected { slot, address });
        }

        let owner = self.slots.owner(slot);
        let candidates: Vec<usize> = owner
            .into_iter()
            .chain((0..self.endpoints.len()).filter(|idx| Some(*idx) != owner))
            .collect();

        for idx in candidates {
            let Some(connection) = self
                .endpoints
                .get_mut(idx)
                .and_then(|endpoint| endpoint.connection.as_mut())
            else {
                continue;
            };
            let topology = match connection.cluster_nodes().await {
                Ok(raw) => match ClusterTopology::parse(&raw) {
                    Ok(topology) => topology,
                    Err(e) => {
                        warn!(error = %e, "Unparseable CLUSTER NODES reply");
                        continue;
                    }
                },
                Err(e) => {
                    debug!(error = %e, "CLUSTER NODES failed");
                    continue;
                }
            };
            let Some(node) = topology.owner_of(slot) else {
                debug!("Reloaded topology has no owner for slot");
                continue;
            };

            let address = node.address();
            let idx = self.endpoint_for(&node.host, node.port).await;
            for range in &node.slots {
                self.slots.assign_range(*range, idx);
            }
            debug!(address = %address, "Reloaded topology");
            return Ok(TopologyRefresh::Reloaded { slot, address });
        }

        let idx = owner.ok_or(MigrationError::Unrouted(slot))?;
        let address = self.reconnect(idx).await?;
        Ok(TopologyRefresh::Reconnected { slot, address })
    }

    /// Index of the endpoint for `host:port`, adding it if unknown.
    async fn endpoint_for(&mut self, host: &str, port: u16) -> usize {
        if let Some(idx) = self
            .endpoints
            .iter()
            .position(|e| e.host == host && e.port == port)
        {
            return idx;
        }

        let connection = match self.connector.connect(host, port).await {
            Ok(connection) => Some(connection),
            Err(e) => {
                warn!(host, port, error = %e, "New shard unreachable");
                None
            }
        };
        info!(host, port, "Added shard to pool");
        self.endpoints
            .push(Endpoint::new(host.to_string(), port, connection));
        self.endpoints.len() - 1
    }

    /// Replace an endpoint's connection with a fresh one.
    async fn reconnect(&mut self, idx: usize) -> Result<String> {
        let Some(endpoint) = self.endpoints.get_mut(idx) else {
            return Err(MigrationError::Connection(format!("No endpoint {}", idx)));
        };
        if let Some(old) = endpoint.connection.take() {
            old.close().await;
        }
        let address = endpoint.address();
        let connection = self.connector.connect(&endpoint.host, endpoint.port).await?;
        endpoint.connection = Some(connection);
        debug!(address = %address, "Reconnected shard");
        Ok(address)
    }

    /// Release every connection and hand back tickets that were never flushed.
    ///
    /// Idempotent; a closed pool returns nothing.
    pub async fn close(&mut self) -> Vec<T> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let mut abandoned = Vec::new();
        for endpoint in &mut self.endpoints {
            let (_, tickets) = endpoint.pending.take();
            abandoned.extend(tickets);
            if let Some(connection) = endpoint.connection.take() {
                connection.close().await;
            }
        }
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Closed pool with unflushed commands");
        }
        debug!(endpoints = self.endpoints.len(), "Closed endpoint pool");
        abandoned
    }

    /// Total commands waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.endpoints.iter().map(|e| e.pending.len()).sum()
    }

    /// Configured pipeline depth.
    pub fn pipeline_depth(&self) -> usize {
        self.pipeline_depth
    }

    /// Number of known endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Number of endpoints with a live connection.
    pub fn connected(&self) -> usize {
        self.endpoints
            .iter()
            .filter(|e| e.connection.is_some())
            .count()
    }

    /// Address of the endpoint a key currently routes to.
    pub fn route(&self, key: &[u8]) -> Option<String> {
        self.slots
            .owner(key_slot(key))
            .and_then(|idx| self.endpoints.get(idx))
            .map(Endpoint::address)
    }

    /// Pipelines answered by a node since the pool was opened, including
    /// automatic flushes.
    pub fn pipelines_delivered(&self) -> usize {
        self.pipelines_delivered
    }

    /// Check if [`EndpointPool::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn fail_all<T>(
    commands: Vec<RestoreCommand>,
    tickets: Vec<T>,
    error: &MigrationError,
) -> Vec<Delivery<T>> {
    commands
        .into_iter()
        .zip(tickets)
        .map(|(command, ticket)| {
            Delivery::failed(
                ticket,
                command.key,
                MigrationError::Connection(error.to_string()),
            )
        })
        .collect()
}

/// Split `host:port`, tolerating IPv6 hosts.
fn split_address(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host.trim_start_matches('[').trim_end_matches(']'), port))
}
