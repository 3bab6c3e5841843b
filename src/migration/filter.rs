//! Record filtering before routing.
//!
//! A cluster only has database 0, so records from other databases never route.

use regex::bytes::Regex;

use super::event::{DataType, Record};
use crate::config::MigrationConfig;
use crate::error::Result;

/// Database migrated into a cluster.
pub const CLUSTER_DB: u64 = 0;

/// Decides which records are migrated.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    patterns: Vec<Regex>,
    types: Vec<DataType>,
}

impl RecordFilter {
    /// Build the filter from configuration.
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        Ok(Self {
            patterns: config.compiled_patterns()?,
            types: config.data_types.clone(),
        })
    }

    /// Check if `record` should be migrated.
    pub fn accepts(&self, record: &Record) -> bool {
        if record.db != CLUSTER_DB {
            return false;
        }
        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| p.is_match(&record.key)) {
            return false;
        }
        match record.data_type {
            Some(t) if !self.types.is_empty() => self.types.contains(&t),
            _ => true,
        }
    }
}
