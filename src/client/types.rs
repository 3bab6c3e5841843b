//! Types for parsed Valkey cluster topology.
//!
//! The target cluster is described by `CLUSTER NODES` output, or equivalently by
//! a node's `nodes.conf` file (which adds trailing `vars ...` lines). Only what
//! routing needs is kept: addresses, flags and slot ownership.

use thiserror::Error;

use crate::slots::{SlotRange, TOTAL_SLOTS};

/// Errors that can occur when parsing topology text.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed node line: {0}")]
    InvalidClusterNodes(String),
    #[error("Invalid slot range: {0}")]
    InvalidSlotRange(String),
    #[error("Node line is missing its {0} field")]
    MissingField(&'static str),
}

/// Node state flags relevant to routing writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Serves slots.
    pub master: bool,
    /// The node the text was read from.
    pub myself: bool,
    /// Marked FAIL (or PFAIL) by the cluster.
    pub failing: bool,
    /// Still joining the cluster; no usable address or identity yet.
    pub joining: bool,
}

impl NodeFlags {
    /// Parse the comma-separated flags field.
    pub fn parse(field: &str) -> Self {
        field
            .split(',')
            .fold(NodeFlags::default(), |mut flags, flag| {
                match flag {
                    "master" => flags.master = true,
                    "myself" => flags.myself = true,
                    "fail" | "fail?" | "pfail" => flags.failing = true,
                    "handshake" | "noaddr" => flags.joining = true,
                    _ => {}
                }
                flags
            })
    }

    /// Check if writes may be routed to a node with these flags.
    pub fn is_routable(&self) -> bool {
        self.master && !self.failing && !self.joining
    }
}

/// One node line of the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// 40-character node ID.
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub flags: NodeFlags,
    /// Stable slot ranges; importing/migrating markers are dropped.
    pub slots: Vec<SlotRange>,
}

impl ClusterNode {
    /// `host:port` of the node.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if this is a master node.
    pub fn is_master(&self) -> bool {
        self.flags.master
    }

    /// Check if this node serves the given slot.
    pub fn owns(&self, slot: u16) -> bool {
        self.slots.iter().any(|r| r.contains(slot))
    }

    /// Number of slots this node serves.
    pub fn slot_count(&self) -> usize {
        self.slots.iter().map(|r| usize::from(r.count())).sum()
    }

    /// Parse one line: `<id> <ip:port@cport[,hostname]> <flags> <master>
    /// <ping-sent> <pong-recv> <epoch> <link-state> [slot ...]`.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let mut fields = line.split_whitespace();
        let node_id = fields.next().ok_or(ParseError::MissingField("id"))?;
        let address = fields.next().ok_or(ParseError::MissingField("address"))?;
        let flags = fields.next().ok_or(ParseError::MissingField("flags"))?;
        // master id, ping-sent, pong-recv, config-epoch, link-state
        if fields.by_ref().take(5).count() < 5 {
            return Err(ParseError::InvalidClusterNodes(line.to_string()));
        }

        let (host, port) = parse_node_address(address)?;
        let slots = fields.filter_map(|s| s.parse().ok()).collect();

        Ok(ClusterNode {
            node_id: node_id.to_string(),
            host,
            port,
            flags: NodeFlags::parse(flags),
            slots,
        })
    }
}

/// Split `ip:port@cport[,hostname]`, preferring the IP and falling back to the
/// announced hostname when the IP is empty.
fn parse_node_address(field: &str) -> Result<(String, u16), ParseError> {
    let (endpoint, hostname) = match field.split_once(',') {
        Some((endpoint, hostname)) => (endpoint, Some(hostname)),
        None => (field, None),
    };
    let endpoint = endpoint.split('@').next().unwrap_or_default();
    let (ip, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| ParseError::InvalidClusterNodes(format!("No port in {}", field)))?;
    let port = port
        .parse()
        .map_err(|_| ParseError::InvalidClusterNodes(format!("Bad port in {}", field)))?;

    let host = match (ip, hostname) {
        ("", Some(hostname)) => hostname,
        (ip, _) => ip,
    };
    Ok((host.to_string(), port))
}

/// Parsed cluster topology.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    pub nodes: Vec<ClusterNode>,
}

impl ClusterTopology {
    /// Parse `CLUSTER NODES` output or a `nodes.conf` file.
    ///
    /// Blank lines and `vars ...` lines are skipped.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let nodes = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("vars "))
            .map(ClusterNode::parse_line)
            .collect::<Result<_, _>>()?;
        Ok(ClusterTopology { nodes })
    }

    /// Routable masters that serve at least one slot.
    pub fn slot_owners(&self) -> Vec<&ClusterNode> {
        self.nodes
            .iter()
            .filter(|n| n.flags.is_routable() && !n.slots.is_empty() && !n.host.is_empty())
            .collect()
    }

    /// The master currently serving `slot`.
    pub fn owner_of(&self, slot: u16) -> Option<&ClusterNode> {
        self.slot_owners().into_iter().find(|n| n.owns(slot))
    }

    /// Slots served by a routable master.
    pub fn total_slots_assigned(&self) -> usize {
        self.slot_owners().iter().map(|m| m.slot_count()).sum()
    }

    /// Check if every slot has a routable owner.
    pub fn all_slots_assigned(&self) -> bool {
        self.total_slots_assigned() == usize::from(TOTAL_SLOTS)
    }
}
