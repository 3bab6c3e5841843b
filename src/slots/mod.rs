//! Hash slot routing for Valkey clusters.
//!
//! Keys map to one of [`TOTAL_SLOTS`] slots; a [`SlotTable`] maps each slot to
//! the endpoint that currently owns it.
//!
//! ## Module Structure
//!
//! - [`range`]: Slot ranges as they appear in `CLUSTER NODES` output
//! - [`table`]: Slot-to-endpoint routing table

pub mod range;
pub mod table;

pub use range::{SlotRange, TOTAL_SLOTS};
pub use table::SlotTable;

/// Compute the hash slot for a key.
///
/// Honors hash tags: only the content of the first non-empty `{...}` section is
/// hashed, so `{user}:1` and `{user}:2` land in the same slot.
pub fn key_slot(key: &[u8]) -> u16 {
    fred::util::redis_keyslot(key)
}
