//! Property tests for the sorted collection.

use docsync::{
    ChangeEvent, Cursor, Keyed, MirrorTarget, SortedCollectionSync, SyncConfig,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

#[derive(Clone, Debug, PartialEq)]
struct Reading {
    id: String,
    t: i32,
}

impl Keyed for Reading {
    fn key(&self) -> &str {
        &self.id
    }
}

fn reading(id: u8, t: i32) -> Reading {
    Reading {
        id: format!("r{id:02}"),
        t,
    }
}

fn config() -> SyncConfig<Reading> {
    SyncConfig::new(|a: &Reading, b: &Reading| a.t.cmp(&b.t))
        .with_sort(|a: &Reading, b: &Reading| a.t.cmp(&b.t))
        .with_filter(|r: &Reading| r.t % 7 != 0)
}

fn by_t(a: &Reading, b: &Reading) -> std::cmp::Ordering {
    a.t.cmp(&b.t)
}

/// Only the required comparator; bootstrap input arrives in id order.
fn update_sort_only() -> SyncConfig<Reading> {
    SyncConfig::new(by_t)
}

/// Bootstrap in descending order, changes in ascending order.
fn reversed_init_sort() -> SyncConfig<Reading> {
    SyncConfig::new(by_t).with_init_sort(|a: &Reading, b: &Reading| b.t.cmp(&a.t))
}

fn initial_strategy() -> impl Strategy<Value = BTreeMap<u8, i32>> {
    prop::collection::btree_map(0u8..24, -50i32..50, 0..16)
}

/// `None` is a deletion.
fn event_strategy() -> impl Strategy<Value = (u8, Option<i32>)> {
    (0u8..24, prop::option::weighted(0.8, -50i32..50))
}

fn batches_strategy() -> impl Strategy<Value = Vec<Vec<(u8, Option<i32>)>>> {
    prop::collection::vec(prop::collection::vec(event_strategy(), 0..8), 0..8)
}

fn to_events(batch: &[(u8, Option<i32>)], seq: &mut u64) -> Vec<ChangeEvent<Reading>> {
    batch
        .iter()
        .map(|&(id, t)| {
            *seq += 1;
            match t {
                Some(t) => ChangeEvent::upsert(Cursor(*seq), reading(id, t)),
                None => ChangeEvent::deletion(Cursor(*seq), format!("r{id:02}")),
            }
        })
        .collect()
}

fn bootstrapped(initial: &BTreeMap<u8, i32>) -> SortedCollectionSync<Reading> {
    bootstrapped_with(config(), initial)
}

fn bootstrapped_with(
    config: SyncConfig<Reading>,
    initial: &BTreeMap<u8, i32>,
) -> SortedCollectionSync<Reading> {
    let mut sync = SortedCollectionSync::new(config);
    let items: Vec<Reading> = initial.iter().map(|(&id, &t)| reading(id, t)).collect();
    sync.bootstrap(items).unwrap();
    sync
}

fn check_indexed(sync: &SortedCollectionSync<Reading>) -> Result<(), TestCaseError> {
    for (pos, item) in sync.items().iter().enumerate() {
        prop_assert_eq!(sync.position(&item.id), Some(pos), "stale index for {}", item.id);
        prop_assert_eq!(sync.get(&item.id), Some(item));
    }
    Ok(())
}

fn check_invariants(sync: &SortedCollectionSync<Reading>) -> Result<(), TestCaseError> {
    let items = sync.items();
    for pair in items.windows(2) {
        prop_assert!(pair[0].t <= pair[1].t, "out of order: {:?}", pair);
    }
    let mut seen = HashSet::new();
    for (pos, item) in items.iter().enumerate() {
        prop_assert!(item.t % 7 != 0, "filtered item kept: {:?}", item);
        prop_assert!(seen.insert(item.id.clone()), "duplicate id {}", item.id);
        prop_assert_eq!(sync.position(&item.id), Some(pos));
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_sorted_filtered_and_indexed(initial in initial_strategy(), batches in batches_strategy()) {
        let mut sync = bootstrapped(&initial);
        check_invariants(&sync)?;

        let mut seq = 0;
        for batch in &batches {
            sync.apply_changes(&to_events(batch, &mut seq)).unwrap();
            check_invariants(&sync)?;
        }
    }

    #[test]
    fn prop_update_sort_alone_keeps_order_and_index(
        initial in initial_strategy(),
        batches in batches_strategy(),
    ) {
        let mut sync = bootstrapped_with(update_sort_only(), &initial);
        let mirror: MirrorTarget<Reading> = MirrorTarget::new();
        sync.add_stream_target(Box::new(mirror.clone()));

        let mut seq = 0;
        for batch in &batches {
            sync.apply_changes(&to_events(batch, &mut seq)).unwrap();
            let items = sync.items();
            for pair in items.windows(2) {
                prop_assert!(pair[0].t <= pair[1].t, "out of order: {:?}", pair);
            }
            check_indexed(&sync)?;
            prop_assert_eq!(mirror.items(), sync.snapshot());
        }
    }

    #[test]
    fn prop_differing_init_sort_keeps_index_and_mirror(
        initial in initial_strategy(),
        batches in batches_strategy(),
    ) {
        let mut sync = SortedCollectionSync::new(reversed_init_sort());
        let mirror: MirrorTarget<Reading> = MirrorTarget::new();
        sync.add_stream_target(Box::new(mirror.clone()));
        let items: Vec<Reading> = initial.iter().map(|(&id, &t)| reading(id, t)).collect();
        sync.bootstrap(items).unwrap();
        check_indexed(&sync)?;

        let mut seq = 0;
        for batch in &batches {
            sync.apply_changes(&to_events(batch, &mut seq)).unwrap();
            check_indexed(&sync)?;
            prop_assert_eq!(mirror.items(), sync.snapshot());
        }
    }

    #[test]
    fn prop_mirror_matches_items(initial in initial_strategy(), batches in batches_strategy()) {
        let mut sync = SortedCollectionSync::new(config());
        let mirror: MirrorTarget<Reading> = MirrorTarget::new();
        sync.add_stream_target(Box::new(mirror.clone()));
        let items: Vec<Reading> = initial.iter().map(|(&id, &t)| reading(id, t)).collect();
        sync.bootstrap(items).unwrap();
        prop_assert_eq!(mirror.items(), sync.snapshot());

        let mut seq = 0;
        for batch in &batches {
            sync.apply_changes(&to_events(batch, &mut seq)).unwrap();
            prop_assert_eq!(mirror.items(), sync.snapshot());
        }
    }

    #[test]
    fn prop_repeated_upsert_is_idempotent(
        initial in initial_strategy(),
        id in 0u8..24,
        t in -50i32..50,
    ) {
        let event = ChangeEvent::upsert(Cursor(1), reading(id, t));

        let mut once = bootstrapped(&initial);
        once.apply_changes(std::slice::from_ref(&event)).unwrap();

        let mut twice = bootstrapped(&initial);
        twice.apply_changes(std::slice::from_ref(&event)).unwrap();
        twice.apply_changes(std::slice::from_ref(&event)).unwrap();

        prop_assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn prop_update_matches_remove_then_insert(
        initial in initial_strategy(),
        id in 0u8..24,
        t in -50i32..50,
    ) {
        let doc = reading(id, t);

        let mut direct = bootstrapped(&initial);
        direct
            .apply_changes(&[ChangeEvent::upsert(Cursor(1), doc.clone())])
            .unwrap();

        let mut rebuilt = bootstrapped(&initial);
        rebuilt
            .apply_changes(&[ChangeEvent::deletion(Cursor(1), doc.id.clone())])
            .unwrap();
        rebuilt
            .apply_changes(&[ChangeEvent::upsert(Cursor(2), doc)])
            .unwrap();

        prop_assert_eq!(direct.snapshot(), rebuilt.snapshot());
    }
}
