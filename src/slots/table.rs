//! Slot-to-endpoint routing table.

use super::range::{SlotRange, TOTAL_SLOTS};

/// Maps every hash slot to the index of the endpoint that owns it.
///
/// Slots with no owner stay `None` until a topology refresh fills them in.
#[derive(Debug, Clone)]
pub struct SlotTable {
    owners: Vec<Option<usize>>,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    /// Create a table with every slot unassigned.
    pub fn new() -> Self {
        Self {
            owners: vec![None; usize::from(TOTAL_SLOTS)],
        }
    }

    /// Get the endpoint index owning `slot`.
    pub fn owner(&self, slot: u16) -> Option<usize> {
        self.owners.get(usize::from(slot)).copied().flatten()
    }

    /// Route a single slot to `endpoint`. Returns the previous owner.
    pub fn assign(&mut self, slot: u16, endpoint: usize) -> Option<usize> {
        self.owners
            .get_mut(usize::from(slot))
            .and_then(|owner| owner.replace(endpoint))
    }

    /// Route every slot of `range` to `endpoint`.
    pub fn assign_range(&mut self, range: SlotRange, endpoint: usize) {
        for slot in range.iter() {
            self.assign(slot, endpoint);
        }
    }

    /// Number of slots that have an owner.
    pub fn assigned(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }

    /// Number of slots owned by `endpoint`.
    pub fn owned_by(&self, endpoint: usize) -> usize {
        self.owners
            .iter()
            .filter(|o| **o == Some(endpoint))
            .count()
    }
}
