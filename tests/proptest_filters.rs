//! Property-based tests using proptest
//!
//! These tests check name selection, aggregated-list flattening and
//! template key normalization against randomized inputs.

use cloudauto::gcp::instance::{
    flatten_aggregated, normalize_resource_keys, select_targets, snake_to_camel,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Generate an aggregated-list page: zone -> instance names
fn arb_zone_map() -> impl Strategy<Value = BTreeMap<String, Vec<String>>> {
    prop::collection::btree_map(
        "[a-z]+-[a-z]+[0-9]-[a-z]",
        prop::collection::vec("[a-z][a-z0-9-]{0,20}", 0..8),
        0..10,
    )
}

fn to_page(zones: &BTreeMap<String, Vec<String>>) -> Value {
    let mut items = Map::new();
    for (zone, names) in zones {
        let body = if names.is_empty() {
            json!({"warning": {"code": "NO_RESULTS_ON_PAGE"}})
        } else {
            let instances: Vec<Value> = names
                .iter()
                .map(|n| json!({"name": n, "status": "RUNNING"}))
                .collect();
            json!({ "instances": instances })
        };
        items.insert(format!("zones/{}", zone), body);
    }
    json!({"kind": "compute#instanceAggregatedList", "items": items})
}

fn arb_vm_list() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z][a-z0-9-]{0,12}", "[a-z]+-[a-z]+[0-9]-[a-z]", 0..50)
}

proptest! {
    /// Flattening yields every instance exactly once, tagged with its zone
    #[test]
    fn flatten_counts_every_instance(zones in arb_zone_map()) {
        let pairs = flatten_aggregated(&to_page(&zones));
        let expected: usize = zones.values().map(Vec::len).sum();
        prop_assert_eq!(pairs.len(), expected);

        for (name, zone) in &pairs {
            prop_assert!(zones[zone].contains(name));
        }
    }

    /// Selection never invents instances and only returns requested names
    #[test]
    fn select_is_subset(
        vm_list in arb_vm_list(),
        names in prop::collection::vec("[a-z][a-z0-9-]{0,12}", 0..10),
    ) {
        let picked = select_targets(&vm_list, &names);
        prop_assert!(picked.len() <= vm_list.len());
        for r in &picked {
            prop_assert!(names.contains(&r.name));
            prop_assert_eq!(vm_list.get(&r.name), Some(&r.zone));
        }
    }

    /// Asking for every listed name selects everything
    #[test]
    fn select_all_names(vm_list in arb_vm_list()) {
        let names: Vec<String> = vm_list.keys().cloned().collect();
        prop_assert_eq!(select_targets(&vm_list, &names).len(), vm_list.len());
    }

    /// Selection is idempotent - re-selecting the result changes nothing
    #[test]
    fn select_is_idempotent(
        vm_list in arb_vm_list(),
        names in prop::collection::vec("[a-z]{1,4}", 0..10),
    ) {
        let once = select_targets(&vm_list, &names);
        let narrowed: BTreeMap<String, String> =
            once.iter().map(|r| (r.name.clone(), r.zone.clone())).collect();
        let twice = select_targets(&narrowed, &names);
        prop_assert_eq!(once, twice);
    }

    /// camelCase keys pass through unchanged
    #[test]
    fn camel_keys_are_stable(key in "[a-z][a-zA-Z0-9]{0,20}") {
        prop_assert_eq!(snake_to_camel(&key), key);
    }

    /// Converted keys never contain underscores
    #[test]
    fn snake_keys_lose_underscores(key in "[a-z][a-z0-9]{0,8}(_[a-z0-9]{1,8}){0,4}_?") {
        prop_assert!(!snake_to_camel(&key).contains('_'));
    }

    /// Normalization is idempotent and never touches string values
    #[test]
    fn normalize_is_idempotent(key in "[a-z]{1,6}(_[a-z]{1,6}){0,3}", value in "[a-z_]{0,20}") {
        let body = json!({
            key.clone(): value.clone(),
            "NESTED": [{ key.clone(): value.clone() }]
        });
        let once = normalize_resource_keys(body);
        let twice = normalize_resource_keys(once.clone());
        prop_assert_eq!(&once, &twice);

        let camel = snake_to_camel(&key);
        prop_assert_eq!(once[&camel].as_str(), Some(value.as_str()));
    }
}
