//! Connections to individual shards.
//!
//! [`Connector`] and [`Connection`] are the seam between the endpoint pool and
//! the wire. [`FredConnector`] talks to real nodes through the `fred` crate; the
//! test suites plug in an in-memory cluster.

use std::future::Future;
use std::time::Duration;

use fred::prelude::*;
use fred::types::{ClusterHash, CustomCommand};
use tracing::{debug, instrument, warn};

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::migration::command::{RESTORE_ASKING, RestoreCommand};

/// Opens connections to cluster nodes.
///
/// One connector is shared read-only by every worker; each connection it
/// returns is owned by exactly one pool.
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: Connection;

    /// Connect to a single node.
    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Connection, MigrationError>> + Send;
}

/// A pipelined connection to one node.
pub trait Connection: Send + 'static {
    /// Send `commands` in one pipeline and wait for every reply.
    ///
    /// The inner vector holds one result per command, in order. An outer error
    /// means nothing is known about any command in the pipeline.
    fn send_pipeline(
        &mut self,
        commands: &[RestoreCommand],
    ) -> impl Future<Output = Result<Vec<Result<(), MigrationError>>, MigrationError>> + Send;

    /// Fetch the node's current `CLUSTER NODES` view.
    fn cluster_nodes(&mut self) -> impl Future<Output = Result<String, MigrationError>> + Send;

    /// Close the connection. Never fails.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Connector backed by one `fred` client per node.
#[derive(Clone, Debug)]
pub struct FredConnector {
    password: Option<String>,
    tls: bool,
    connection_timeout: Duration,
    command_timeout: Duration,
}

impl FredConnector {
    /// Build a connector from the migration configuration.
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            password: config.password.clone(),
            tls: config.tls,
            connection_timeout: config.connection_timeout(),
            command_timeout: config.command_timeout(),
        }
    }
}

impl Connector for FredConnector {
    type Connection = FredConnection;

    #[instrument(skip(self), fields(tls = self.tls))]
    async fn connect(&self, host: &str, port: u16) -> Result<FredConnection, MigrationError> {
        // Each shard gets its own centralized client so the pool, not fred,
        // decides where every key goes.
        let mut config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(host, port),
            },
            ..Default::default()
        };

        if let Some(ref password) = self.password {
            config.password = Some(password.clone());
        }

        if self.tls {
            let tls_connector = TlsConnector::default_rustls()
                .map_err(|e| MigrationError::Connection(format!("TLS error: {}", e)))?;
            config.tls = Some(tls_connector.into());
        }

        let command_timeout = self.command_timeout;
        let connection_timeout = self.connection_timeout;

        let client = Builder::from_config(config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()
            .map_err(|e| MigrationError::Connection(format!("{}:{}: {}", host, port, e)))?;

        client
            .init()
            .await
            .map_err(|e| MigrationError::Connection(format!("{}:{}: {}", host, port, e)))?;
        debug!("Connected to shard");

        Ok(FredConnection {
            client,
            address: format!("{}:{}", host, port),
        })
    }
}

/// A `fred` client connected to one node.
pub struct FredConnection {
    client: Client,
    address: String,
}

fn restore_asking() -> CustomCommand {
    CustomCommand::new_static(RESTORE_ASKING, ClusterHash::FirstKey, false)
}

impl Connection for FredConnection {
    #[instrument(skip(self, commands), fields(address = %self.address, count = commands.len()))]
    async fn send_pipeline(
        &mut self,
        commands: &[RestoreCommand],
    ) -> Result<Vec<Result<(), MigrationError>>, MigrationError> {
        let pipeline = self.client.pipeline();
        for command in commands {
            let _: () = pipeline.custom(restore_asking(), command.args()).await?;
        }

        let replies: Vec<Result<Value, fred::error::Error>> = pipeline.try_all().await;
        if replies.len() != commands.len() {
            return Err(MigrationError::Delivery(format!(
                "{} replies for {} commands from {}",
                replies.len(),
                commands.len(),
                self.address
            )));
        }

        Ok(replies
            .into_iter()
            .map(|reply| reply.map(|_| ()).map_err(|e| MigrationError::from_reply(&e)))
            .collect())
    }

    #[instrument(skip(self), fields(address = %self.address))]
    async fn cluster_nodes(&mut self) -> Result<String, MigrationError> {
        let response: String = self.client.cluster_nodes().await?;
        Ok(response)
    }

    async fn close(self) {
        if let Err(e) = self.client.quit().await {
            warn!(address = %self.address, error = %e, "Failed to close connection");
        }
    }
}
