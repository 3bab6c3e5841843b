//! Events delivered by the snapshot parser.
//!
//! The parser drives the engine through [`Event`]: phase boundaries open and
//! close pools, record events carry the data to migrate.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Value type of a record as encoded in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    String,
    List,
    Set,
    SortedSet,
    Hash,
    Module,
    Stream,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => write!(f, "string"),
            DataType::List => write!(f, "list"),
            DataType::Set => write!(f, "set"),
            DataType::SortedSet => write!(f, "zset"),
            DataType::Hash => write!(f, "hash"),
            DataType::Module => write!(f, "module"),
            DataType::Stream => write!(f, "stream"),
        }
    }
}

/// One key extracted from the source stream.
///
/// `value` is the opaque DUMP payload; the engine never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key name.
    pub key: Bytes,
    /// Serialized value (DUMP format).
    pub value: Bytes,
    /// Absolute expiry in unix milliseconds.
    pub expire_at_ms: Option<i64>,
    /// Source database index.
    pub db: u64,
    /// Value type, when the parser reports it.
    pub data_type: Option<DataType>,
}

impl Record {
    /// Create a record in database 0 with no expiry.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expire_at_ms: None,
            db: 0,
            data_type: None,
        }
    }

    /// Set the absolute expiry.
    pub fn with_expiry(mut self, expire_at_ms: i64) -> Self {
        self.expire_at_ms = Some(expire_at_ms);
        self
    }

    /// Set the source database.
    pub fn in_db(mut self, db: u64) -> Self {
        self.db = db;
        self
    }

    /// Set the value type.
    pub fn of_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Key rendered for logs.
    pub fn display_key(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Auxiliary metadata from the snapshot header (`redis-ver`, `ctime`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxField {
    pub key: String,
    pub value: String,
}

/// Event contract with the snapshot parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A snapshot load is starting.
    StreamStart,
    /// One key to migrate.
    Record(Record),
    /// Metadata with no key/value; passed through untouched.
    Auxiliary(AuxField),
    /// The snapshot load finished.
    StreamEnd,
    /// Switching from snapshot load to incremental command replication.
    PhaseChange,
}

impl Event {
    /// Events every worker must observe.
    pub fn is_phase_boundary(&self) -> bool {
        matches!(
            self,
            Event::StreamStart | Event::StreamEnd | Event::PhaseChange
        )
    }
}
