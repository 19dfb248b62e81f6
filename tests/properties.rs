//! Property tests for ordering, cascade and stepping rules.

use easycount::{CounterService, Settings, Store, StoreConfig, COUNT_RANGE};
use proptest::prelude::*;
use tempfile::TempDir;

fn fresh_store(dir: &TempDir) -> Store {
    Store::create(StoreConfig {
        path: dir.path().join("store"),
        sync_on_commit: false,
        checkpoint_interval: 0,
        ..Default::default()
    })
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn details_always_sorted_by_name(names in prop::collection::vec("[a-zA-Z ,\"]{0,8}", 0..12)) {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        let counter = store.create_counter("c").unwrap();

        for name in &names {
            store.create_counter_detail(counter.id, name.as_str(), 0).unwrap();
        }

        let listed: Vec<String> = store
            .list_counter_details(counter.id)
            .into_iter()
            .map(|d| d.name)
            .collect();
        let mut expected = names.clone();
        expected.sort();
        prop_assert_eq!(listed, expected);
    }

    #[test]
    fn cascade_removes_every_child(detail_counts in prop::collection::vec(0usize..6, 1..5), victim in 0usize..5) {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);

        let mut counters = Vec::new();
        for (i, n) in detail_counts.iter().enumerate() {
            let counter = store.create_counter(format!("c{}", i)).unwrap();
            for d in 0..*n {
                store.create_counter_detail(counter.id, format!("d{}", d), 0).unwrap();
            }
            counters.push(counter);
        }

        let victim = victim % counters.len();
        store.delete_counter(counters[victim].id).unwrap();

        prop_assert!(store.get_counter(counters[victim].id).is_none());
        prop_assert!(store.list_counter_details(counters[victim].id).is_empty());

        let survivors: usize = detail_counts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != victim)
            .map(|(_, n)| n)
            .sum();
        prop_assert_eq!(store.stats().detail_count as usize, survivors);
    }

    #[test]
    fn stepping_stays_in_range(step in 0u32..=100, start in 0i64..=99_999, ups in 0usize..4, downs in 0usize..4) {
        let dir = TempDir::new().unwrap();
        let mut service = CounterService::new(
            fresh_store(&dir),
            Settings { step_count: step, ..Default::default() },
        );

        let counter = service.create_counter(&mut "c".to_string()).unwrap().unwrap();
        let detail = service
            .create_counter_detail(counter.id, &mut "d".to_string())
            .unwrap()
            .unwrap();
        service.set_count(detail.id, start).unwrap();

        let step = i64::from(step);
        let mut expected = start;
        for _ in 0..ups {
            expected = (expected + step).min(*COUNT_RANGE.end());
            prop_assert_eq!(service.increment(detail.id).unwrap().count, expected);
        }
        for _ in 0..downs {
            expected = (expected - step).max(0);
            prop_assert_eq!(service.decrement(detail.id).unwrap().count, expected);
        }
    }
}
