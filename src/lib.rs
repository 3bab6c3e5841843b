//! valkey-migrator library crate
//!
//! Migrates records decoded from a snapshot or replication stream into a
//! sharded Valkey/Redis cluster. Every record becomes a `RESTORE-ASKING` write
//! routed to the shard owning its hash slot, pipelined per shard, and retried
//! against refreshed topology when delivery fails.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use valkey_migrator::{Context, FredConnector, MigrationConfig, run};
//!
//! let config = MigrationConfig::from_json(&config_json)?;
//! let connector = Arc::new(FredConnector::new(&config));
//! let context = Arc::new(Context::from_nodes_conf(config, &nodes_conf, None)?);
//! let report = run(context, connector, futures::stream::iter(events)).await?;
//! println!("{report}");
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod slots;

pub use client::{ClusterTopology, Connection, Connector, EndpointPool, FredConnector};
pub use config::{ConnectionFailurePolicy, MigrationConfig};
pub use error::{MigrationError, Result};
pub use metrics::Metrics;
pub use migration::{
    Context, Dispatcher, Event, MigrationReport, MigrationVisitor, Outcome, Record, run,
};
pub use slots::key_slot;
