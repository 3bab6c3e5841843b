//! Error types for the migration engine.
//!
//! Per-record failures (`Delivery`, `Redirected`, `Unrouted`) are recoverable and
//! feed the retry loop. `Connection` at pool open is fatal to the worker's phase.

use thiserror::Error;

use crate::client::types::ParseError;

/// Errors that can occur while migrating records.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Slot {slot} redirected to {address}")]
    Redirected {
        /// Slot named in the redirect reply.
        slot: u16,
        /// `host:port` of the node that owns the slot now.
        address: String,
    },

    #[error("No endpoint owns slot {0}")]
    Unrouted(u16),

    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker {0} stopped unexpectedly")]
    WorkerStopped(usize),
}

impl MigrationError {
    /// Classify an error reply from a target node.
    ///
    /// `-MOVED <slot> <host:port>` and `-ASK <slot> <host:port>` become
    /// [`MigrationError::Redirected`]; anything else is a transient delivery failure.
    pub fn from_reply(err: &fred::error::Error) -> Self {
        Self::from_reply_text(err.details())
    }

    /// Classify the text of an error reply.
    pub fn from_reply_text(details: &str) -> Self {
        let mut parts = details.split_whitespace();
        if let (Some("MOVED" | "ASK"), Some(slot), Some(address)) =
            (parts.next(), parts.next(), parts.next())
            && let Ok(slot) = slot.parse::<u16>()
        {
            return MigrationError::Redirected {
                slot,
                address: address.to_string(),
            };
        }
        MigrationError::Delivery(details.to_string())
    }

    /// Check if the failed write may succeed on another attempt.
    ///
    /// A key that already exists without `REPLACE`, or a payload the node
    /// cannot load, fails the same way on every node.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Delivery(reply) => {
                !(reply.starts_with("BUSYKEY") || reply.contains("payload version or checksum"))
            }
            MigrationError::Connection(_)
            | MigrationError::Redirected { .. }
            | MigrationError::Unrouted(_)
            | MigrationError::Redis(_) => true,
            MigrationError::Parse(_)
            | MigrationError::InvalidConfig(_)
            | MigrationError::WorkerStopped(_) => false,
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
