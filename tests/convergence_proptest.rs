//! Property-based convergence tests.
//!
//! Several replicas edit a shared text concurrently. Every edit produces an
//! update; the properties check that delivery order, duplication, merging
//! and splitting never change the converged document. A second scenario mixes
//! map writes, nested containers and replicas with and without garbage
//! collection.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{Value, json};
use tandem::{
    Content, Doc, Error, Id, Options, RegistrationOrder, SplitEvery, TypeRef, Version, diff_update,
    encode_state_vector_from_update, encode_state_as_updates, merge_updates,
};

const REPLICAS: usize = 3;

// =============================================================================
// Test helpers
// =============================================================================

#[derive(Clone, Debug)]
enum EditOp {
    Insert { pos_pct: f64, content: String },
    Delete { pos_pct: f64, len_pct: f64 },
}

#[derive(Clone, Debug)]
struct Step {
    replica: usize,
    op: EditOp,
    sync: bool,
}

fn arbitrary_edit_op() -> impl Strategy<Value = EditOp> {
    prop_oneof![
        3 => (0.0..=1.0f64, "[a-z]{1,6}")
            .prop_map(|(pos_pct, content)| EditOp::Insert { pos_pct, content }),
        1 => (0.0..=1.0f64, 0.0..=0.5f64)
            .prop_map(|(pos_pct, len_pct)| EditOp::Delete { pos_pct, len_pct }),
    ]
}

fn arbitrary_step() -> impl Strategy<Value = Step> {
    return (0..REPLICAS, arbitrary_edit_op(), prop::bool::weighted(0.3))
        .prop_map(|(replica, op, sync)| Step { replica, op, sync });
}

fn apply_edit(doc: &mut Doc, op: &EditOp) {
    let len = doc.len("text");
    match op {
        EditOp::Insert { pos_pct, content } => {
            let pos = ((*pos_pct * len as f64) as u32).min(len);
            doc.insert_text("text", pos, content).unwrap();
        }
        EditOp::Delete { pos_pct, len_pct } => {
            if len == 0 {
                return;
            }
            let start = ((*pos_pct * len as f64) as u32).min(len - 1);
            let max_len = len - start;
            let del_len = ((*len_pct * max_len as f64) as u32).clamp(1, max_len);
            doc.remove_range("text", start, del_len).unwrap();
        }
    }
}

fn sync_all(replicas: &mut [Doc], version: Version) {
    for i in 0..replicas.len() {
        for j in 0..replicas.len() {
            if i == j {
                continue;
            }
            let sv = replicas[j].state_vector();
            let update = replicas[i].encode_state_as_update(Some(&sv), version);
            replicas[j].apply_update(&update, version).unwrap();
        }
    }
}

/// Run the steps and return the converged text with every update produced.
fn run(steps: &[Step], version: Version) -> (String, Vec<Vec<u8>>) {
    let mut replicas: Vec<Doc> = (0..REPLICAS)
        .map(|i| Doc::with_options(Options { client_id: i as u64 + 1, gc: true }))
        .collect();
    let mut log = Vec::new();
    for step in steps {
        let doc = &mut replicas[step.replica];
        let before = doc.state_vector();
        apply_edit(doc, &step.op);
        log.push(doc.encode_state_as_update(Some(&before), version));
        if step.sync {
            sync_all(&mut replicas, version);
        }
    }
    sync_all(&mut replicas, version);
    let text = replicas[0].get_text("text");
    for replica in &replicas[1..] {
        assert_eq!(replica.get_text("text"), text);
    }
    return (text, log);
}

fn permute<T: Clone>(items: &[T], keys: &[u32]) -> Vec<T> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by_key(|i| keys[*i % keys.len()].wrapping_add(*i as u32));
    return order.into_iter().map(|i| items[i].clone()).collect();
}

fn fresh(version: Version, updates: &[Vec<u8>]) -> Doc {
    let mut doc = Doc::with_options(Options { client_id: 100, gc: true });
    for update in updates {
        doc.apply_update(update, version).unwrap();
    }
    return doc;
}

fn version_strategy() -> impl Strategy<Value = Version> {
    return prop_oneof![Just(Version::V1), Just(Version::V2)];
}

// =============================================================================
// Delivery
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any delivery order, with duplicates, converges with nothing pending.
    #[test]
    fn delivery_order_does_not_matter(
        steps in prop::collection::vec(arbitrary_step(), 1..30),
        keys in prop::collection::vec(any::<u32>(), 1..40),
        duplicates in prop::collection::vec(any::<prop::sample::Index>(), 0..5),
        version in version_strategy(),
    ) {
        let (text, log) = run(&steps, version);
        let mut delivered = permute(&log, &keys);
        for index in &duplicates {
            let update = log[index.index(log.len())].clone();
            delivered.push(update);
        }
        let doc = fresh(version, &delivered);
        prop_assert_eq!(doc.get_text("text"), text);
        prop_assert!(doc.pending_update(version).is_none());
    }

    /// Merging is commutative and idempotent on the encoded result.
    #[test]
    fn merge_is_commutative_and_idempotent(
        steps in prop::collection::vec(arbitrary_step(), 1..30),
        keys in prop::collection::vec(any::<u32>(), 1..40),
        version in version_strategy(),
    ) {
        let (text, log) = run(&steps, version);
        let merged = merge_updates(&log, version).unwrap();
        let shuffled = merge_updates(&permute(&log, &keys), version).unwrap();
        prop_assert_eq!(&merged, &shuffled);

        let twice = merge_updates(&[merged.clone(), merged.clone()], version).unwrap();
        prop_assert_eq!(&twice, &merged);

        let doc = fresh(version, &[merged]);
        prop_assert_eq!(doc.get_text("text"), text);
    }
}

// =============================================================================
// Diff and split
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A prefix plus the diff against the prefix's state rebuilds the whole.
    #[test]
    fn diff_completes_a_prefix(
        steps in prop::collection::vec(arbitrary_step(), 1..30),
        split in any::<prop::sample::Index>(),
        version in version_strategy(),
    ) {
        let (text, log) = run(&steps, version);
        let all = merge_updates(&log, version).unwrap();
        let k = split.index(log.len() + 1);
        let prefix = merge_updates(&log[..k], version).unwrap();
        let sv = encode_state_vector_from_update(&prefix, version).unwrap();
        let rest = diff_update(&all, &sv, version).unwrap();

        let doc = fresh(version, &[prefix.clone(), rest.clone()]);
        prop_assert_eq!(doc.get_text("text"), text.clone());

        let rejoined = merge_updates(&[rest, prefix], version).unwrap();
        let doc = fresh(version, &[rejoined]);
        prop_assert_eq!(doc.get_text("text"), text);
    }

    /// Splitting a document into updates and replaying them in order, or
    /// merging them first, reproduces it.
    #[test]
    fn split_updates_rebuild_the_document(
        steps in prop::collection::vec(arbitrary_step(), 1..30),
        every in 0u32..8,
        version in version_strategy(),
    ) {
        let mut replicas: Vec<Doc> = (0..REPLICAS)
            .map(|i| Doc::with_options(Options { client_id: i as u64 + 1, gc: true }))
            .collect();
        for step in &steps {
            apply_edit(&mut replicas[step.replica], &step.op);
            if step.sync {
                sync_all(&mut replicas, version);
            }
        }
        sync_all(&mut replicas, version);
        let source = &replicas[0];

        let updates = encode_state_as_updates(source, SplitEvery(every), RegistrationOrder, version);
        let doc = fresh(version, &updates);
        prop_assert_eq!(doc.get_text("text"), source.get_text("text"));
        prop_assert_eq!(doc.state_vector(), source.state_vector());

        let merged = merge_updates(&updates, version).unwrap();
        let doc = fresh(version, &[merged]);
        prop_assert_eq!(doc.get_text("text"), source.get_text("text"));
    }
}

// =============================================================================
// Mixed containers
// =============================================================================

const KEYS: [&str; 3] = ["a", "b", "c"];

#[derive(Clone, Debug)]
enum MixedOp {
    Text(EditOp),
    MapSet { key: usize, value: i64 },
    MapRemove { key: usize },
    /// Replace a map key with a fresh nested text or array.
    MapSetType { key: usize, text: bool },
    /// Insert a nested text into the root list.
    ListInsertType { pos_pct: f64 },
    /// Remove a range of the root list, deleting the nested texts in it.
    ListRemove { pos_pct: f64, len_pct: f64 },
    /// Insert into one of the nested containers created so far.
    NestedInsert { target: prop::sample::Index, pos_pct: f64, content: String },
}

#[derive(Clone, Debug)]
struct MixedStep {
    replica: usize,
    op: MixedOp,
    sync: bool,
}

fn arbitrary_mixed_op() -> impl Strategy<Value = MixedOp> {
    prop_oneof![
        2 => arbitrary_edit_op().prop_map(MixedOp::Text),
        2 => (0..KEYS.len(), any::<i64>()).prop_map(|(key, value)| MixedOp::MapSet { key, value }),
        1 => (0..KEYS.len()).prop_map(|key| MixedOp::MapRemove { key }),
        1 => (0..KEYS.len(), any::<bool>()).prop_map(|(key, text)| MixedOp::MapSetType { key, text }),
        1 => (0.0..=1.0f64).prop_map(|pos_pct| MixedOp::ListInsertType { pos_pct }),
        1 => (0.0..=1.0f64, 0.0..=0.5f64)
            .prop_map(|(pos_pct, len_pct)| MixedOp::ListRemove { pos_pct, len_pct }),
        3 => (any::<prop::sample::Index>(), 0.0..=1.0f64, "[a-z]{1,4}")
            .prop_map(|(target, pos_pct, content)| MixedOp::NestedInsert { target, pos_pct, content }),
    ]
}

fn arbitrary_mixed_step() -> impl Strategy<Value = MixedStep> {
    return (0..REPLICAS, arbitrary_mixed_op(), prop::bool::weighted(0.3))
        .prop_map(|(replica, op, sync)| MixedStep { replica, op, sync });
}

/// Everything a user can observe, for comparing replicas.
#[derive(Debug, PartialEq)]
struct Snapshot {
    text: String,
    map: BTreeMap<String, Content>,
    list_len: u32,
    nested: Vec<(String, Vec<Value>)>,
}

fn snapshot(doc: &Doc, nested: &[(Id, TypeRef)]) -> Snapshot {
    return Snapshot {
        text: doc.get_text("text"),
        map: doc.get_map("map"),
        list_len: doc.len("list"),
        nested: nested
            .iter()
            .map(|(id, _)| (doc.get_text(*id), doc.get_values(*id)))
            .collect(),
    };
}

fn knows(doc: &Doc, id: Id) -> bool {
    return doc.state_vector().get(id.client) > id.clock;
}

/// Apply one mixed edit. Newly created containers are appended to `nested`.
fn apply_mixed(doc: &mut Doc, op: &MixedOp, nested: &mut Vec<(Id, TypeRef)>) {
    match op {
        MixedOp::Text(edit) => apply_edit(doc, edit),
        MixedOp::MapSet { key, value } => {
            doc.map_set("map", KEYS[*key], json!(value)).unwrap();
        }
        MixedOp::MapRemove { key } => {
            doc.map_remove("map", KEYS[*key]).unwrap();
        }
        MixedOp::MapSetType { key, text } => {
            let kind = if *text { TypeRef::Text } else { TypeRef::Array };
            let id = doc.map_set_type("map", KEYS[*key], kind).unwrap();
            nested.push((id, kind));
        }
        MixedOp::ListInsertType { pos_pct } => {
            let len = doc.len("list");
            let pos = ((*pos_pct * len as f64) as u32).min(len);
            let id = doc.insert_type("list", pos, TypeRef::Text).unwrap();
            nested.push((id, TypeRef::Text));
        }
        MixedOp::ListRemove { pos_pct, len_pct } => {
            let len = doc.len("list");
            if len == 0 {
                return;
            }
            let start = ((*pos_pct * len as f64) as u32).min(len - 1);
            let max_len = len - start;
            let del_len = ((*len_pct * max_len as f64) as u32).clamp(1, max_len);
            doc.remove_range("list", start, del_len).unwrap();
        }
        MixedOp::NestedInsert { target, pos_pct, content } => {
            let known: Vec<(Id, TypeRef)> =
                nested.iter().copied().filter(|(id, _)| knows(doc, *id)).collect();
            if known.is_empty() {
                return;
            }
            let (id, kind) = known[target.index(known.len())];
            let len = doc.len(id);
            let pos = ((*pos_pct * len as f64) as u32).min(len);
            let result = match kind {
                TypeRef::Text => doc.insert_text(id, pos, content),
                _ => doc.insert_values(id, pos, vec![json!(content)]),
            };
            // Containers collected on this replica no longer accept inserts
            if let Err(err) = result {
                assert_eq!(err, Error::NotFound(id));
            }
        }
    }
}

/// Run mixed steps on replicas with the given gc settings. Returns the
/// converged snapshot, the created containers and every update produced.
fn run_mixed(
    steps: &[MixedStep],
    gc: &[bool],
    version: Version,
) -> (Snapshot, Vec<(Id, TypeRef)>, Vec<Vec<u8>>) {
    let mut replicas: Vec<Doc> = (0..REPLICAS)
        .map(|i| Doc::with_options(Options { client_id: i as u64 + 1, gc: gc[i] }))
        .collect();
    let mut nested = Vec::new();
    let mut log = Vec::new();
    for step in steps {
        let doc = &mut replicas[step.replica];
        let before = doc.state_vector();
        apply_mixed(doc, &step.op, &mut nested);
        log.push(doc.encode_state_as_update(Some(&before), version));
        if step.sync {
            sync_all(&mut replicas, version);
        }
    }
    sync_all(&mut replicas, version);
    let expected = snapshot(&replicas[0], &nested);
    for replica in &replicas[1..] {
        assert_eq!(snapshot(replica, &nested), expected);
    }
    return (expected, nested, log);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Maps, nested containers and cascading deletes converge under any
    /// delivery order, whether or not a replica collects garbage.
    #[test]
    fn mixed_containers_converge(
        steps in prop::collection::vec(arbitrary_mixed_step(), 1..30),
        gc in prop::collection::vec(any::<bool>(), REPLICAS),
        receiver_gc in any::<bool>(),
        keys in prop::collection::vec(any::<u32>(), 1..40),
        duplicates in prop::collection::vec(any::<prop::sample::Index>(), 0..5),
        version in version_strategy(),
    ) {
        let (expected, nested, log) = run_mixed(&steps, &gc, version);
        let mut delivered = permute(&log, &keys);
        for index in &duplicates {
            delivered.push(log[index.index(log.len())].clone());
        }
        let mut doc = Doc::with_options(Options { client_id: 100, gc: receiver_gc });
        for update in &delivered {
            doc.apply_update(update, version).unwrap();
        }
        prop_assert_eq!(snapshot(&doc, &nested), expected);
        prop_assert!(doc.pending_update(version).is_none());
    }

    /// Merging an update into a merge that already contains it changes no
    /// byte of the result.
    #[test]
    fn merging_a_contained_update_is_a_no_op(
        steps in prop::collection::vec(arbitrary_mixed_step(), 1..30),
        gc in prop::collection::vec(any::<bool>(), REPLICAS),
        a in any::<prop::sample::Index>(),
        b in any::<prop::sample::Index>(),
        version in version_strategy(),
    ) {
        let (_, _, log) = run_mixed(&steps, &gc, version);
        let a = &log[a.index(log.len())];
        let b = &log[b.index(log.len())];
        let ab = merge_updates(&[a.clone(), b.clone()], version).unwrap();
        prop_assert_eq!(&merge_updates(&[ab.clone(), a.clone()], version).unwrap(), &ab);
        prop_assert_eq!(&merge_updates(&[b.clone(), ab.clone()], version).unwrap(), &ab);

        let all = merge_updates(&log, version).unwrap();
        let half = merge_updates(&log[..log.len() / 2], version).unwrap();
        prop_assert_eq!(&merge_updates(&[all.clone(), half], version).unwrap(), &all);
    }
}
