//! Cluster client module for delivering restore commands.
//!
//! This module owns everything that talks to the target cluster: parsing its
//! topology, opening connections to its shards, and the pipelined endpoint pool
//! the migration workers write through.
//!
//! ## Architecture
//!
//! - `types`: Parsed types for cluster topology (nodes, flags, slot owners)
//! - `endpoint`: `Connector`/`Connection` traits and the `fred`-backed implementation
//! - `pool`: Slot-aware pool of pipelined endpoints with topology refresh
//!
//! ## Example
//!
//! ```rust,ignore
//! use valkey_migrator::client::{ClusterTopology, EndpointPool, FredConnector};
//!
//! let topology = ClusterTopology::parse(&nodes_conf)?;
//! let connector = Arc::new(FredConnector::new(&config));
//! let mut pool = EndpointPool::open(connector, &topology, 4096).await?;
//! let deliveries = pool.batch(command, ticket).await;
//! let report = pool.flush().await;
//! pool.close().await;
//! ```

pub mod endpoint;
pub mod pool;
pub mod types;

pub use endpoint::{Connection, Connector, FredConnection, FredConnector};
pub use pool::{Delivery, EndpointPool, FlushReport, TopologyRefresh};
pub use types::{ClusterNode, ClusterTopology, NodeFlags, ParseError};
