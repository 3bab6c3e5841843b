//! In-memory cluster implementing the `Connector` seam.
//!
//! The mock keeps slot ownership, node reachability and scripted per-key
//! failures behind one mutex, and records every connection, pipeline and
//! accepted write so tests can assert on what reached the "network".

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use valkey_migrator::client::endpoint::{Connection, Connector};
use valkey_migrator::error::MigrationError;
use valkey_migrator::migration::RestoreCommand;
use valkey_migrator::slots::{SlotRange, key_slot};

/// First port of the mock nodes.
pub const BASE_PORT: u16 = 7000;

/// A write the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub address: String,
    pub key: Bytes,
    pub ttl_ms: i64,
    pub replace: bool,
}

/// One pipeline received by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub address: String,
    pub keys: Vec<Bytes>,
}

#[derive(Debug, Default)]
struct MockNode {
    address: String,
    reachable: bool,
    ranges: Vec<SlotRange>,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: Vec<MockNode>,
    /// Failures still to be returned per key.
    scripted: HashMap<Bytes, u32>,
    always_fail: HashSet<Bytes>,
    /// Error replies returned for every write of a key.
    rejected: HashMap<Bytes, String>,
    attempts: HashMap<Bytes, u32>,
    writes: Vec<Write>,
    pipelines: Vec<Pipeline>,
    connects: usize,
    closes: usize,
    cluster_nodes_calls: usize,
}

impl ClusterState {
    fn owner(&self, slot: u16) -> Option<&MockNode> {
        self.nodes
            .iter()
            .find(|n| n.ranges.iter().any(|r| r.contains(slot)))
    }

    fn node(&self, address: &str) -> Option<&MockNode> {
        self.nodes.iter().find(|n| n.address == address)
    }

    fn nodes_conf(&self) -> String {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let port: u16 = node
                    .address
                    .rsplit_once(':')
                    .and_then(|(_, p)| p.parse().ok())
                    .unwrap_or(BASE_PORT);
                let ranges: Vec<String> = node.ranges.iter().map(|r| r.to_string()).collect();
                format!(
                    "{:040x} {}@{} master - 0 0 {} connected {}",
                    i + 1,
                    node.address,
                    u32::from(port) + 10000,
                    i + 1,
                    ranges.join(" ")
                )
                .trim_end()
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Shared handle to the mock cluster.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// Cluster of `masters` nodes on 127.0.0.1 with the slots split evenly.
    pub fn new(masters: u16) -> Self {
        let cluster = Self::default();
        {
            let mut state = cluster.lock();
            let per_node = 16384 / masters;
            for i in 0..masters {
                let start = i * per_node;
                let end = if i + 1 == masters {
                    16383
                } else {
                    start + per_node - 1
                };
                state.nodes.push(MockNode {
                    address: format!("127.0.0.1:{}", BASE_PORT + i),
                    reachable: true,
                    ranges: vec![SlotRange::new(start, end)],
                });
            }
        }
        cluster
    }

    /// Cluster whose only master owns `range`; other slots are unassigned.
    pub fn partial(range: SlotRange) -> Self {
        let cluster = Self::default();
        cluster.lock().nodes.push(MockNode {
            address: format!("127.0.0.1:{}", BASE_PORT),
            reachable: true,
            ranges: vec![range],
        });
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    /// `CLUSTER NODES` text for the current ownership.
    pub fn nodes_conf(&self) -> String {
        self.lock().nodes_conf()
    }

    /// Connector handing out connections to this cluster.
    pub fn connector(&self) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            cluster: self.clone(),
        })
    }

    /// Address of the node for `index`.
    pub fn address(index: u16) -> String {
        format!("127.0.0.1:{}", BASE_PORT + index)
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut state = self.lock();
        for node in state.nodes.iter_mut().filter(|n| n.address == address) {
            node.reachable = reachable;
        }
    }

    pub fn set_all_reachable(&self, reachable: bool) {
        for node in self.lock().nodes.iter_mut() {
            node.reachable = reachable;
        }
    }

    /// Move one slot to the node at `address`, as a finished resharding would.
    pub fn move_slot(&self, slot: u16, address: &str) {
        let mut state = self.lock();
        for node in state.nodes.iter_mut() {
            let mut kept = Vec::new();
            for range in node.ranges.drain(..) {
                if !range.contains(slot) {
                    kept.push(range);
                    continue;
                }
                if range.start < slot {
                    kept.push(SlotRange::new(range.start, slot - 1));
                }
                if slot < range.end {
                    kept.push(SlotRange::new(slot + 1, range.end));
                }
            }
            node.ranges = kept;
        }
        if let Some(node) = state.nodes.iter_mut().find(|n| n.address == address) {
            node.ranges.push(SlotRange::single(slot));
        }
    }

    /// First key `prefix:N` whose slot is owned by the node at `address`.
    pub fn key_on(&self, address: &str, prefix: &str) -> String {
        let state = self.lock();
        (0u32..)
            .map(|i| format!("{}:{}", prefix, i))
            .find(|key| {
                state
                    .owner(key_slot(key.as_bytes()))
                    .is_some_and(|n| n.address == address)
            })
            .unwrap()
    }

    /// Fail the next `times` writes of `key`.
    pub fn fail_times(&self, key: &str, times: u32) {
        self.lock()
            .scripted
            .insert(Bytes::copy_from_slice(key.as_bytes()), times);
    }

    /// Fail every write of `key`.
    pub fn fail_always(&self, key: &str) {
        self.lock()
            .always_fail
            .insert(Bytes::copy_from_slice(key.as_bytes()));
    }

    /// Answer every write of `key` with the error `reply`.
    pub fn reject(&self, key: &str, reply: &str) {
        self.lock()
            .rejected
            .insert(Bytes::copy_from_slice(key.as_bytes()), reply.to_string());
    }

    /// Delivery attempts that reached a node for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        self.lock()
            .attempts
            .get(key.as_bytes())
            .copied()
            .unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    /// Accepted writes for `key`.
    pub fn writes_for(&self, key: &str) -> Vec<Write> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.key.as_ref() == key.as_bytes())
            .cloned()
            .collect()
    }

    pub fn pipelines(&self) -> Vec<Pipeline> {
        self.lock().pipelines.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn cluster_nodes_calls(&self) -> usize {
        self.lock().cluster_nodes_calls
    }
}

/// Connector for a [`MockCluster`].
#[derive(Debug)]
pub struct MockConnector {
    cluster: MockCluster,
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, host: &str, port: u16) -> Result<MockConnection, MigrationError> {
        let address = format!("{}:{}", host, port);
        let mut state = self.cluster.lock();
        match state.node(&address).map(|n| n.reachable) {
            Some(true) => {
                state.connects += 1;
                Ok(MockConnection {
                    address,
                    cluster: self.cluster.clone(),
                })
            }
            Some(false) => Err(MigrationError::Connection(format!(
                "{}: connection refused",
                address
            ))),
            None => Err(MigrationError::Connection(format!("{}: unknown host", address))),
        }
    }
}

/// Connection to one mock node.
#[derive(Debug)]
pub struct MockConnection {
    address: String,
    cluster: MockCluster,
}

impl Connection for MockConnection {
    async fn send_pipeline(
        &mut self,
        commands: &[RestoreCommand],
    ) -> Result<Vec<Result<(), MigrationError>>, MigrationError> {
        let mut state = self.cluster.lock();
        if !state.node(&self.address).is_some_and(|n| n.reachable) {
            return Err(MigrationError::Connection(format!(
                "{}: connection reset",
                self.address
            )));
        }
        state.pipelines.push(Pipeline {
            address: self.address.clone(),
            keys: commands.iter().map(|c| c.key.clone()).collect(),
        });

        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            *state.attempts.entry(command.key.clone()).or_default() += 1;

            if let Some(remaining) = state.scripted.get_mut(&command.key)
                && *remaining > 0
            {
                *remaining -= 1;
                replies.push(Err(MigrationError::Delivery("scripted failure".to_string())));
                continue;
            }
            if let Some(reply) = state.rejected.get(&command.key) {
                replies.push(Err(MigrationError::from_reply_text(reply)));
                continue;
            }
            if state.always_fail.contains(&command.key) {
                replies.push(Err(MigrationError::Delivery("permanent failure".to_string())));
                continue;
            }

            let slot = key_slot(&command.key);
            match state.owner(slot).map(|n| n.address.clone()) {
                Some(owner) if owner == self.address => {
                    state.writes.push(Write {
                        address: self.address.clone(),
                        key: command.key.clone(),
                        ttl_ms: command.ttl_ms,
                        replace: command.replace,
                    });
                    replies.push(Ok(()));
                }
                Some(owner) => replies.push(Err(MigrationError::from_reply_text(&format!(
                    "MOVED {} {}",
                    slot, owner
                )))),
                None => replies.push(Err(MigrationError::Delivery(format!(
                    "CLUSTERDOWN Hash slot {} not served",
                    slot
                )))),
            }
        }
        Ok(replies)
    }

    async fn cluster_nodes(&mut self) -> Result<String, MigrationError> {
        let mut state = self.cluster.lock();
        if !state.node(&self.address).is_some_and(|n| n.reachable) {
            return Err(MigrationError::Connection(format!(
                "{}: connection reset",
                self.address
            )));
        }
        state.cluster_nodes_calls += 1;
        Ok(state.nodes_conf())
    }

    async fn close(self) {
        self.cluster.lock().closes += 1;
    }
}
