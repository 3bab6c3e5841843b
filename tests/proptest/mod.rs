// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for valkey-migrator.
//!
//! Uses proptest to generate random inputs and verify routing and retry
//! invariants.

#[path = "../common/mod.rs"]
#[allow(dead_code, unused_imports)]
mod common;

use proptest::prelude::*;

use valkey_migrator::config::MigrationConfig;
use valkey_migrator::migration::{Event, MigrationVisitor, Record, Ttl};
use valkey_migrator::slots::{SlotRange, SlotTable, TOTAL_SLOTS, key_slot};

use common::{MockCluster, NOW, context};

/// Strategy for generating valid slot ranges.
fn slot_range() -> impl Strategy<Value = SlotRange> {
    (0..TOTAL_SLOTS)
        .prop_flat_map(|start| (Just(start), start..TOTAL_SLOTS))
        .prop_map(|(start, end)| SlotRange::new(start, end))
}

/// Strategy for hash tags that contain no braces.
fn hash_tag() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9:_-]{1,16}"
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    /// Property: Every key maps to a valid slot.
    #[test]
    fn test_key_slot_in_range(key in prop::collection::vec(any::<u8>(), 0..64)) {
        prop_assert!(key_slot(&key) < TOTAL_SLOTS);
    }

    /// Property: Keys sharing a hash tag share a slot, the slot of the tag itself.
    #[test]
    fn test_hash_tag_routing(
        tag in hash_tag(),
        prefix in "[a-z:]{0,6}",
        a in ".{0,12}",
        b in ".{0,12}"
    ) {
        let first = format!("{{{}}}{}", tag, a);
        let second = format!("{}{{{}}}{}", prefix, tag, b);
        prop_assert_eq!(key_slot(first.as_bytes()), key_slot(tag.as_bytes()));
        prop_assert_eq!(key_slot(first.as_bytes()), key_slot(second.as_bytes()));
    }

    /// Property: A parsed slot range covers exactly the slots it prints.
    #[test]
    fn test_slot_range_text(range in slot_range()) {
        let parsed: SlotRange = range.to_string().parse().unwrap();
        prop_assert_eq!(parsed, range);
        prop_assert_eq!(usize::from(range.count()), range.iter().count());
        prop_assert!(range.contains(range.start) && range.contains(range.end));
    }

    /// Property: Assigning a range routes every slot in it, and only those.
    #[test]
    fn test_slot_table_assign_range(range in slot_range(), endpoint in 0usize..8) {
        let mut table = SlotTable::new();
        table.assign_range(range, endpoint);
        prop_assert_eq!(table.assigned(), usize::from(range.count()));
        prop_assert_eq!(table.owner(range.start), Some(endpoint));
        prop_assert_eq!(table.owner(range.end), Some(endpoint));
        if range.start > 0 {
            prop_assert_eq!(table.owner(range.start - 1), None);
        }
    }

    /// Property: A record is expired exactly when its expiry is not in the future.
    #[test]
    fn test_ttl_expiry_boundary(expire in -1_000_000i64..1_000_000, now in -1_000_000i64..1_000_000) {
        match Ttl::at(Some(expire), now) {
            Ttl::Expired => prop_assert!(expire <= now),
            Ttl::Remaining(ms) => prop_assert_eq!(ms, expire - now),
            Ttl::Persistent => prop_assert!(false, "expiry was set"),
        }
        prop_assert_eq!(Ttl::at(None, now).as_restore_arg(), Some(0));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: A record failing `f` times with `r` retries is attempted
    /// `min(f, r) + 1` times and is migrated exactly when `f <= r`.
    #[test]
    fn test_retry_bound(failures in 0u32..6, retries in 0u32..5) {
        let cluster = MockCluster::new(3);
        cluster.fail_times("P", failures);
        let config = MigrationConfig::default().with_batch_size(4).with_retries(retries);
        let ctx = context(&cluster, config);
        let mut visitor = MigrationVisitor::new(0, ctx, cluster.connector());

        let report = block_on(async {
            visitor.handle(Event::StreamStart).await.unwrap();
            visitor.handle(Event::Record(Record::new("P", "v"))).await.unwrap();
            visitor.handle(Event::StreamEnd).await.unwrap();
            visitor.report()
        });

        prop_assert_eq!(cluster.attempts("P"), failures.min(retries) + 1);
        prop_assert_eq!(report.topology_refreshes, u64::from(failures.min(retries)));
        prop_assert_eq!(report.migrated == 1, failures <= retries);
        prop_assert_eq!(report.exhausted == 1, failures > retries);
    }

    /// Property: No pipeline exceeds the configured depth and no record is lost.
    #[test]
    fn test_pipelines_respect_depth(depth in 1usize..8, count in 0usize..40) {
        let cluster = MockCluster::new(3);
        let config = MigrationConfig::default().with_batch_size(depth).with_retries(0);
        let ctx = context(&cluster, config);
        let mut visitor = MigrationVisitor::new(0, ctx, cluster.connector());

        let report = block_on(async {
            visitor.handle(Event::StreamStart).await.unwrap();
            for i in 0..count {
                let record = Record::new(format!("{{p}}:{}", i), "v").with_expiry(NOW + 60_000);
                visitor.handle(Event::Record(record)).await.unwrap();
                assert!(visitor.pending() < depth);
            }
            visitor.handle(Event::StreamEnd).await.unwrap();
            visitor.report()
        });

        let pipelines = cluster.pipelines();
        prop_assert!(pipelines.iter().all(|p| p.keys.len() <= depth));
        prop_assert_eq!(pipelines.iter().map(|p| p.keys.len()).sum::<usize>(), count);
        prop_assert_eq!(report.migrated, count as u64);
    }
}
