//! Property-based invariants for query-key derivation and cache pruning.
//! These hold for any parameter map or cache population, not just the
//! specific cases exercised by the unit tests alongside them.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use reactive_query::cache::CacheTable;
use reactive_query::error::Error;
use reactive_query::key::{query_key, ParamValue};

fn param_value_strategy() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        Just(ParamValue::Null),
        any::<bool>().prop_map(ParamValue::Bool),
        any::<i32>().prop_map(ParamValue::from),
        "[a-z]{1,8}".prop_map(ParamValue::from),
    ]
}

fn param_map_strategy(max_entries: usize) -> impl Strategy<Value = Vec<(String, ParamValue)>> {
    prop::collection::vec(("[a-z]{1,6}", param_value_strategy()), 0..max_entries)
        .prop_map(|pairs| {
            let mut seen = BTreeMap::new();
            for (k, v) in pairs {
                seen.insert(k, v);
            }
            seen.into_iter().collect()
        })
}

proptest! {
    /// Query keys are invariant under the insertion order of their source map
    /// — only the sorted key/value sequence matters.
    #[test]
    fn query_key_is_independent_of_insertion_order(pairs in param_map_strategy(8)) {
        let forward: reactive_query::key::ParamMap = pairs.iter().cloned().collect();
        let shuffled: reactive_query::key::ParamMap = pairs.iter().rev().cloned().collect();
        prop_assert_eq!(query_key(&forward), query_key(&shuffled));
    }

    /// Two maps that differ in any single value produce different keys
    /// (assuming at least one entry exists to differ on).
    #[test]
    fn differing_single_value_changes_the_key(pairs in param_map_strategy(5), bump in 1i32..1000) {
        prop_assume!(!pairs.is_empty());
        let mut altered = pairs.clone();
        let (_, first_value) = &mut altered[0];
        *first_value = match first_value {
            ParamValue::Number(n) => ParamValue::Number(n + bump as f64),
            _ => ParamValue::Number(bump as f64),
        };
        if altered[0].1 == pairs[0].1 {
            return Ok(());
        }
        let a: reactive_query::key::ParamMap = pairs.into_iter().collect();
        let b: reactive_query::key::ParamMap = altered.into_iter().collect();
        prop_assert_ne!(query_key(&a), query_key(&b));
    }

    /// `prune` never removes the current key or the designated "keep" key,
    /// regardless of how expired they are, and removes every other entry
    /// whose age exceeds its own recorded `cache_time`.
    #[test]
    fn prune_always_exempts_current_and_keep_keys(
        ages_ms in prop::collection::vec(0u64..500, 1..12),
        cache_time_ms in 1u64..250,
    ) {
        let base = Instant::now();
        let mut cache: CacheTable<i32> = CacheTable::default();
        let keys: Vec<String> = (0..ages_ms.len()).map(|i| format!("k{i}")).collect();
        for (key, age) in keys.iter().zip(&ages_ms) {
            cache.record_success(key, Some(1), Duration::from_millis(cache_time_ms), base - Duration::from_millis(*age));
        }

        let current = keys[0].clone();
        let keep = keys.get(1).cloned();
        let now = base;
        cache.prune(now, &current, keep.as_deref());

        prop_assert!(cache.contains_key(&current));
        if let Some(keep_key) = &keep {
            prop_assert!(cache.contains_key(keep_key));
        }
        for (key, age) in keys.iter().zip(&ages_ms) {
            if key == &current || Some(key) == keep.as_ref() {
                continue;
            }
            let should_survive = *age <= cache_time_ms;
            prop_assert_eq!(cache.contains_key(key), should_survive);
        }
    }

    /// `record_error`'s retry counter is monotonic within a run and never
    /// exceeds `max_retries`.
    #[test]
    fn retry_count_is_monotonic_and_capped(max_retries in 0u32..6, attempts in 1usize..10) {
        let base = Instant::now();
        let mut cache: CacheTable<i32> = CacheTable::default();
        let mut previous = 0u32;
        for _ in 0..attempts {
            let count = cache.record_error("k", Error::fetcher("x"), max_retries, Duration::from_secs(1), base);
            prop_assert!(count >= previous);
            prop_assert!(count <= max_retries.max(1));
            previous = count;
        }
    }
}
