//! RESTORE-ASKING commands built from records.

use bytes::Bytes;
use fred::types::Value;

use super::event::Record;

/// Command name. `RESTORE-ASKING` is accepted by a node whose slot is still
/// importing, so writes land even while the cluster is resharding.
pub const RESTORE_ASKING: &str = "RESTORE-ASKING";

/// Remaining lifetime of a record at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// No expiry set.
    Persistent,
    /// Milliseconds left, always > 0.
    Remaining(i64),
    /// Expiry already elapsed.
    Expired,
}

impl Ttl {
    /// Compute the TTL of a record at `now_ms`.
    pub fn at(expire_at_ms: Option<i64>, now_ms: i64) -> Self {
        match expire_at_ms {
            None => Ttl::Persistent,
            Some(at) => match at.saturating_sub(now_ms) {
                ms if ms <= 0 => Ttl::Expired,
                ms => Ttl::Remaining(ms),
            },
        }
    }

    /// TTL argument for RESTORE; 0 means no expiry.
    pub fn as_restore_arg(&self) -> Option<i64> {
        match self {
            Ttl::Persistent => Some(0),
            Ttl::Remaining(ms) => Some(*ms),
            Ttl::Expired => None,
        }
    }
}

/// A routed restore write for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCommand {
    pub key: Bytes,
    /// Remaining TTL in milliseconds, 0 for none.
    pub ttl_ms: i64,
    pub payload: Bytes,
    pub replace: bool,
}

impl RestoreCommand {
    /// Build the command for `record` at `now_ms`.
    ///
    /// Returns `None` when the record has already expired.
    pub fn for_record(record: &Record, now_ms: i64, replace: bool) -> Option<Self> {
        let ttl_ms = Ttl::at(record.expire_at_ms, now_ms).as_restore_arg()?;
        Some(Self {
            key: record.key.clone(),
            ttl_ms,
            payload: record.value.clone(),
            replace,
        })
    }

    /// Arguments after the command name: `key ttl payload [REPLACE]`.
    pub fn args(&self) -> Vec<Value> {
        let mut args = vec![
            Value::Bytes(self.key.clone()),
            Value::Integer(self.ttl_ms),
            Value::Bytes(self.payload.clone()),
        ];
        if self.replace {
            args.push(Value::from("REPLACE"));
        }
        args
    }
}
