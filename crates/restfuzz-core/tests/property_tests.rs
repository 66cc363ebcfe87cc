//! Property tests for the table, resolver, gate and corpus invariants.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use restfuzz_core::{
    Corpus, DynamicIdTable, InterestingnessGate, KeyMatch, Resolver, Step, TestCase,
    UnresolvedDependency, ValuePolicy,
};
use restfuzz_types::{EndpointId, HttpMethod, Request, Response, Slot};
use serde_json::{json, Value};

fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["userId", "orderId", "token", "apiKey", "cartId"])
        .prop_map(str::to_string)
}

fn updates_strategy() -> impl Strategy<Value = Vec<BTreeMap<String, Vec<Value>>>> {
    prop::collection::vec(
        prop::collection::btree_map(
            key_strategy(),
            prop::collection::vec("[a-z0-9]{1,8}".prop_map(Value::String), 0..3),
            0..4,
        ),
        0..10,
    )
}

fn draft_with(keys: &[String]) -> Request {
    let mut req = Request::new(EndpointId(0), HttpMethod::Get, "/things");
    for key in keys {
        req.query.insert(key.clone(), Slot::placeholder(key));
    }
    req
}

proptest! {
    #[test]
    fn prop_table_keys_never_shrink(updates in updates_strategy()) {
        let mut table = DynamicIdTable::new();
        let mut seen: Vec<String> = Vec::new();
        for update in updates {
            let before = table.len();
            for (key, values) in &update {
                if !values.is_empty() && !seen.contains(key) {
                    seen.push(key.clone());
                }
            }
            table.update(update);
            prop_assert!(table.len() >= before);
            for key in &seen {
                prop_assert!(table.contains_key(key));
                let resolver = Resolver::new(KeyMatch::Exact, ValuePolicy::Latest);
                prop_assert!(resolver.resolve(&draft_with(&[key.clone()]), &table).is_ok());
            }
        }
    }

    #[test]
    fn prop_resolution_is_total_or_nothing(
        present in prop::collection::btree_set(key_strategy(), 0..5),
        wanted in prop::collection::btree_set(key_strategy(), 0..5),
    ) {
        let mut table = DynamicIdTable::new();
        for key in &present {
            table.insert(key, json!(format!("{key}-1")));
        }
        let wanted: Vec<String> = wanted.into_iter().collect();
        let draft = draft_with(&wanted);
        let resolver = Resolver::new(KeyMatch::Exact, ValuePolicy::Latest);
        let result = resolver.resolve(&draft, &table);
        let missing: Vec<&String> = wanted.iter().filter(|k| !present.contains(*k)).collect();
        match result {
            Ok(resolved) => {
                prop_assert!(missing.is_empty());
                prop_assert!(resolved.is_resolved());
            }
            Err(UnresolvedDependency { key }) => {
                prop_assert!(missing.contains(&&key));
            }
        }
        prop_assert_eq!(table.len(), present.len());
    }

    #[test]
    fn prop_new_best_tcl_is_always_interesting(
        history in prop::collection::vec((0u32..200, 0.0f64..3.0), 0..20),
        extra in 1u32..50,
        diversity in 0.0f64..3.0,
    ) {
        let mut gate = InterestingnessGate::new(0.3);
        let endpoint = EndpointId(3);
        let mut max = 0;
        for (tcl, d) in history {
            gate.is_interesting(endpoint, 0, tcl, d);
            max = max.max(tcl);
        }
        prop_assert!(gate.is_interesting(endpoint, 0, max + extra, diversity));
    }

    #[test]
    fn prop_corpus_accumulates_and_selects_members(
        tcls in prop::collection::vec(0u32..300, 1..12),
        picks in 1usize..40,
        seed in any::<u64>(),
    ) {
        let mut corpus = Corpus::new();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut last_len = 0;
        for (i, tcl) in tcls.iter().enumerate() {
            let step = Step {
                request: Request::new(EndpointId(i), HttpMethod::Post, "/items"),
                response: Response::json(201, json!({"itemId": i})),
                tcl: *tcl,
                diversity: 0.0,
            };
            corpus.insert(TestCase::seed(step));
            prop_assert!(corpus.len() > last_len);
            last_len = corpus.len();
        }
        for _ in 0..picks {
            let picked = corpus.select(&mut rng, 8, 0.1);
            prop_assert!(picked.is_some());
            if let Some(case) = picked {
                let stored = corpus.get(case.id);
                prop_assert!(stored.is_some());
                prop_assert_eq!(stored.map(|s| s.fingerprint.clone()), Some(case.fingerprint.clone()));
            }
        }
        prop_assert_eq!(corpus.len(), tcls.len());
    }
}
