//! Property tests: random observation sequences keep clusters well formed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use idresolve::{
    check_store_invariants, ContactId, ContactRepository, IdentityEngine, InMemoryContactStore,
    Observation,
};

/// Store whose clock advances one second per write.
fn ticking_store() -> Arc<InMemoryContactStore> {
    let epoch = DateTime::parse_from_rfc3339("2023-04-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let ticks = AtomicI64::new(0);
    Arc::new(InMemoryContactStore::with_clock(move || {
        epoch + Duration::seconds(ticks.fetch_add(1, Ordering::SeqCst))
    }))
}

fn email(i: u8) -> String {
    format!("user{i}@example.com")
}

fn phone(i: u8) -> String {
    format!("555-010{i}")
}

fn observation_strategy() -> impl Strategy<Value = (Option<u8>, Option<u8>)> {
    (proptest::option::of(0u8..4), proptest::option::of(0u8..5))
        .prop_filter("at least one field", |(e, p)| e.is_some() || p.is_some())
}

/// Minimal union-find over identity keys.
#[derive(Default)]
struct Components {
    parent: HashMap<String, String>,
}

impl Components {
    fn find(&mut self, key: &str) -> String {
        let parent = self
            .parent
            .entry(key.to_string())
            .or_insert_with(|| key.to_string())
            .clone();
        if parent == key {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(key.to_string(), root.clone());
        root
    }

    fn join(&mut self, a: &str, b: &str) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_invariants_hold_after_every_step(
        steps in proptest::collection::vec(observation_strategy(), 1..30)
    ) {
        let store = ticking_store();
        let engine = IdentityEngine::new(store.clone());

        for (e, p) in &steps {
            let (e, p) = (e.map(email), p.map(phone));
            let identity = engine.resolve_parts(e.as_deref(), p.as_deref()).unwrap();

            if let Some(e) = &e {
                prop_assert!(identity.emails.contains(e));
            }
            if let Some(p) = &p {
                prop_assert!(identity.phone_numbers.contains(p));
            }
            prop_assert!(!identity.secondary_contact_ids.contains(&identity.primary_contact_id));

            let violations = check_store_invariants(store.as_ref()).unwrap();
            prop_assert!(violations.is_empty(), "violations: {:?}", violations);
        }
    }

    #[test]
    fn prop_repeat_observation_writes_nothing(
        steps in proptest::collection::vec(observation_strategy(), 1..20)
    ) {
        let store = ticking_store();
        let engine = IdentityEngine::new(store.clone());

        for (e, p) in &steps {
            let observation =
                Observation::new(e.map(email).as_deref(), p.map(phone).as_deref()).unwrap();
            let first = engine.resolve_detailed(&observation).unwrap();
            let again = engine.resolve_detailed(&observation).unwrap();
            prop_assert_eq!(again.writes(), 0);
            prop_assert_eq!(first.identity, again.identity);
        }
    }

    #[test]
    fn prop_clusters_match_connected_keys(
        steps in proptest::collection::vec(observation_strategy(), 1..30)
    ) {
        let store = ticking_store();
        let engine = IdentityEngine::new(store.clone());
        let mut components = Components::default();

        for (e, p) in &steps {
            let (e, p) = (e.map(email), p.map(phone));
            engine.resolve_parts(e.as_deref(), p.as_deref()).unwrap();
            match (&e, &p) {
                (Some(e), Some(p)) => components.join(e, p),
                (Some(k), None) | (None, Some(k)) => {
                    components.find(k);
                }
                (None, None) => unreachable!(),
            }
        }

        let keys: Vec<String> = components.parent.keys().cloned().collect();
        let mut root_of: HashMap<String, ContactId> = HashMap::new();
        for key in &keys {
            let identity = if key.contains('@') {
                engine.resolve_parts(Some(key), None)
            } else {
                engine.resolve_parts(None, Some(key))
            }
            .unwrap();
            root_of.insert(key.clone(), identity.primary_contact_id);
        }

        for a in &keys {
            for b in &keys {
                let same_component = components.find(a) == components.find(b);
                prop_assert_eq!(same_component, root_of[a] == root_of[b], "{} vs {}", a, b);
            }
        }

        let expected: HashSet<String> = keys.iter().map(|k| components.find(k)).collect();
        let primaries = store
            .list_all()
            .unwrap()
            .into_iter()
            .filter(|c| c.is_primary())
            .count();
        prop_assert_eq!(primaries, expected.len());
    }
}
