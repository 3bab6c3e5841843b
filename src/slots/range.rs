//! Slot ranges.

use std::str::FromStr;

use crate::client::types::ParseError;

/// Hash slots in a cluster; keys map to `0..TOTAL_SLOTS`.
pub const TOTAL_SLOTS: u16 = 16384;

/// Inclusive run of slots `start..=end`, as listed in a node line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    /// Build `start..=end`. Callers keep `start <= end < TOTAL_SLOTS`.
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end && end < TOTAL_SLOTS, "bad slot range {start}-{end}");
        Self { start, end }
    }

    /// Range holding exactly `slot`.
    pub fn single(slot: u16) -> Self {
        Self::new(slot, slot)
    }

    /// Slots covered.
    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    pub fn contains(&self, slot: u16) -> bool {
        (self.start..=self.end).contains(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl FromStr for SlotRange {
    type Err = ParseError;

    /// Parse `"0-5460"` or `"5461"`.
    ///
    /// Importing/migrating markers such as `[93->-<node-id>]` are rejected; the
    /// slot stays with the node listed as its owner.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.starts_with('[') {
            return Err(ParseError::InvalidSlotRange(format!(
                "Slot in migration: {}",
                s
            )));
        }

        let parse_slot = |v: &str| -> Result<u16, ParseError> {
            v.parse::<u16>()
                .ok()
                .filter(|slot| *slot < TOTAL_SLOTS)
                .ok_or_else(|| ParseError::InvalidSlotRange(format!("Invalid slot: {}", v)))
        };

        let range = if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (parse_slot(start)?, parse_slot(end)?);
            if start > end {
                return Err(ParseError::InvalidSlotRange(format!(
                    "Start after end: {}",
                    s
                )));
            }
            SlotRange::new(start, end)
        } else {
            SlotRange::single(parse_slot(s)?)
        };
        Ok(range)
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
