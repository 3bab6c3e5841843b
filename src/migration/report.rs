//! Record outcomes and run summaries.

use std::fmt;
use std::ops::AddAssign;

/// Final fate of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Written to its shard.
    Migrated,
    /// TTL had already elapsed; never sent.
    Expired,
    /// Rejected by the database, key or type filter.
    Filtered,
    /// Retry budget ran out; dropped.
    Exhausted,
    /// Discarded because the worker's pool was unavailable or cancelled.
    Abandoned,
    /// Auxiliary metadata passed through.
    Auxiliary,
}

impl Outcome {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Migrated => "migrated",
            Outcome::Expired => "expired",
            Outcome::Filtered => "filtered",
            Outcome::Exhausted => "exhausted",
            Outcome::Abandoned => "abandoned",
            Outcome::Auxiliary => "auxiliary",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of record outcomes, per worker or for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: u64,
    pub expired: u64,
    pub filtered: u64,
    pub exhausted: u64,
    pub abandoned: u64,
    pub auxiliary: u64,
    /// Topology refreshes triggered by failed deliveries.
    pub topology_refreshes: u64,
    /// Delivery attempts that failed (including ones later retried).
    pub failed_attempts: u64,
}

impl MigrationReport {
    /// Count one outcome.
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Migrated => self.migrated += 1,
            Outcome::Expired => self.expired += 1,
            Outcome::Filtered => self.filtered += 1,
            Outcome::Exhausted => self.exhausted += 1,
            Outcome::Abandoned => self.abandoned += 1,
            Outcome::Auxiliary => self.auxiliary += 1,
        }
    }

    /// Count of records with the given outcome.
    pub fn count(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Migrated => self.migrated,
            Outcome::Expired => self.expired,
            Outcome::Filtered => self.filtered,
            Outcome::Exhausted => self.exhausted,
            Outcome::Abandoned => self.abandoned,
            Outcome::Auxiliary => self.auxiliary,
        }
    }

    /// Records that reached a final outcome, excluding auxiliary metadata.
    pub fn records(&self) -> u64 {
        self.migrated + self.expired + self.filtered + self.exhausted + self.abandoned
    }
}

impl AddAssign for MigrationReport {
    fn add_assign(&mut self, other: Self) {
        self.migrated += other.migrated;
        self.expired += other.expired;
        self.filtered += other.filtered;
        self.exhausted += other.exhausted;
        self.abandoned += other.abandoned;
        self.auxiliary += other.auxiliary;
        self.topology_refreshes += other.topology_refreshes;
        self.failed_attempts += other.failed_attempts;
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "migrated={} expired={} filtered={} exhausted={} abandoned={}",
            self.migrated, self.expired, self.filtered, self.exhausted, self.abandoned
        )
    }
}
