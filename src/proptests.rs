use super::{AvlTreeMap, AvlTreeSet};

use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Insert(i16, u64),
    Remove(i16),
    Get(i16),
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    // A small key domain keeps duplicate inserts and hits on removal frequent.
    let key = -100i16..=100;
    let op = prop_oneof![
        5 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => key.clone().prop_map(Op::Remove),
        2 => key.prop_map(Op::Get),
    ];
    prop::collection::vec(op, 0..=400)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_map_equivalence(ops in ops_strategy()) {
        let mut map: AvlTreeMap<i16, u64> = AvlTreeMap::new();
        let mut reference: BTreeMap<i16, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    prop_assert_eq!(map.insert(key, value), reference.insert(key, value));
                }
                Op::Remove(key) => {
                    prop_assert_eq!(map.remove(&key), reference.remove(&key));
                }
                Op::Get(key) => {
                    prop_assert_eq!(map.get(&key), reference.get(&key));
                }
            }
            prop_assert_eq!(map.len(), reference.len());
            map.check_consistency();
        }

        let got: Vec<(i16, u64)> = map.iter().map(|(&k, &v)| (k, v)).collect();
        let expected: Vec<(i16, u64)> = reference.iter().map(|(&k, &v)| (k, v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_iter_back_matches_front(keys in prop::collection::vec(any::<i16>(), 0..=200)) {
        let map: AvlTreeMap<i16, i16> = keys.iter().map(|&k| (k, k)).collect();
        map.check_consistency();

        let forward: Vec<i16> = map.iter().map(|(&k, _)| k).collect();
        let mut backward: Vec<i16> = map.iter().rev().map(|(&k, _)| k).collect();
        backward.reverse();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn prop_set_matches_sorted_dedup(values in prop::collection::vec(any::<i16>(), 0..=200)) {
        let set: AvlTreeSet<i16> = values.iter().copied().collect();
        set.check_consistency();

        let mut expected = values;
        expected.sort_unstable();
        expected.dedup();
        let got: Vec<i16> = set.iter().copied().collect();
        prop_assert_eq!(got, expected);
    }
}
