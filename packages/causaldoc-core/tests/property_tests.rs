use causaldoc_core::{CausalOrder, Config, Document, Frontiers, OpId, PeerId, VersionVector};
use proptest::prelude::*;

const PEERS: usize = 3;

#[derive(Clone, Debug)]
enum Action {
    Edit { peer: usize, text: String },
    Sync { from: usize, to: usize },
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (0..PEERS, "[a-z]{1,4}").prop_map(|(peer, text)| Action::Edit { peer, text }),
        1 => (0..PEERS, 0..PEERS).prop_map(|(from, to)| Action::Sync { from, to }),
    ]
}

fn replicas() -> Vec<Document> {
    (0..PEERS)
        .map(|i| Document::with_config(Config::default().with_peer(i as u64)))
        .collect()
}

fn run(docs: &mut [Document], actions: &[Action]) {
    for action in actions {
        match action {
            Action::Edit { peer, text } => {
                let doc = &mut docs[*peer];
                let handler = doc.get_text("text");
                handler.insert(doc, 0, text).unwrap();
                doc.commit().unwrap();
            }
            Action::Sync { from, to } if from != to => {
                let since = docs[*to].version().clone();
                let bytes = docs[*from].export_from(&since).unwrap();
                docs[*to].import(&bytes).unwrap();
            }
            Action::Sync { .. } => {}
        }
    }
}

/// One replica commits `len` characters, then optionally pulls everything `pull` has.
#[derive(Clone, Copy, Debug)]
struct Interaction {
    doc: usize,
    pull: Option<usize>,
    len: usize,
}

fn interaction(docs: usize) -> impl Strategy<Value = Interaction> {
    (0..docs, 0..docs, 1..10usize, any::<bool>()).prop_map(move |(doc, other, len, pull)| {
        Interaction {
            doc,
            pull: (pull && other != doc).then_some(other),
            len,
        }
    })
}

fn push(doc: &mut Document, len: usize) {
    let handler = doc.get_text("text");
    handler.insert(doc, 0, &"x".repeat(len)).unwrap();
    doc.commit().unwrap();
}

fn pull(docs: &mut [Document], to: usize, from: usize) {
    let since = docs[to].version().clone();
    let bytes = docs[from].export_from(&since).unwrap();
    docs[to].import(&bytes).unwrap();
}

fn apply(docs: &mut [Document], step: Interaction) {
    push(&mut docs[step.doc], step.len);
    if let Some(from) = step.pull {
        pull(docs, step.doc, from);
    }
}

fn last_own_op(doc: &Document) -> OpId {
    doc.changes_of(doc.peer_id()).last().unwrap().id_last()
}

/// Everyone converges on a single head, then even and odd replicas diverge without ever
/// syncing across the split. The head they all started from is the only common ancestor.
fn common_ancestor_after_split(
    count: usize,
    before: &[Interaction],
    after: &[Interaction],
) -> Result<(), TestCaseError> {
    let mut docs: Vec<Document> = (0..count)
        .map(|i| Document::with_config(Config::default().with_peer(i as u64)))
        .collect();
    for step in before {
        apply(&mut docs, *step);
    }

    for from in 1..count {
        pull(&mut docs, 0, from);
    }
    push(&mut docs[0], 1);
    let expected = docs[0].frontiers().clone();
    prop_assert_eq!(expected.len(), 1);
    for to in 1..count {
        pull(&mut docs, to, 0);
    }

    for step in after {
        let mut step = *step;
        step.pull = step.pull.filter(|from| from % 2 == step.doc % 2);
        apply(&mut docs, step);
    }

    push(&mut docs[1], 1);
    pull(&mut docs, 0, 1);
    let ours = Frontiers::from_id(last_own_op(&docs[0]));
    let theirs = Frontiers::from_id(last_own_op(&docs[1]));
    prop_assert_eq!(docs[0].find_common_ancestor(&ours, &theirs).unwrap(), expected);
    Ok(())
}

fn sync_all(docs: &mut [Document]) {
    for from in 0..docs.len() {
        for to in 0..docs.len() {
            if from != to {
                let bytes = docs[from].export_all().unwrap();
                docs[to].import(&bytes).unwrap();
            }
        }
    }
}

proptest! {
    #[test]
    fn counters_stay_contiguous_per_peer(actions in prop::collection::vec(action(), 1..30)) {
        let mut docs = replicas();
        run(&mut docs, &actions);
        for doc in &docs {
            doc.oplog().validate_invariants().unwrap();
            for (peer, changes) in doc.all_changes() {
                let mut expected = 0;
                for change in changes {
                    prop_assert_eq!(change.ctr_start(), expected);
                    expected = change.ctr_end();
                }
                prop_assert_eq!(doc.version().get(*peer), expected);
            }
        }
    }

    #[test]
    fn compare_is_reflexive(actions in prop::collection::vec(action(), 0..20)) {
        let mut docs = replicas();
        run(&mut docs, &actions);
        for doc in &docs {
            prop_assert_eq!(doc.version().compare(doc.version()), CausalOrder::Equal);
            prop_assert_eq!(doc.compare(&doc.version().clone()), CausalOrder::Equal);
        }
    }

    #[test]
    fn full_export_makes_versions_equal(actions in prop::collection::vec(action(), 1..25)) {
        let mut docs = replicas();
        run(&mut docs, &actions);
        let bytes = docs[0].export_all().unwrap();
        let mut fresh = Document::with_config(Config::default().with_peer(99));
        fresh.import(&bytes).unwrap();
        prop_assert_eq!(fresh.version().compare(docs[0].version()), CausalOrder::Equal);
        prop_assert_eq!(fresh.frontiers(), docs[0].frontiers());
    }

    #[test]
    fn importing_never_loses_causal_ground(
        actions in prop::collection::vec(action(), 1..25),
        from in 0..PEERS,
        to in 0..PEERS,
    ) {
        prop_assume!(from != to);
        let mut docs = replicas();
        run(&mut docs, &actions);
        let source_version = docs[from].version().clone();
        let target_before = docs[to].version().clone();

        let bytes = docs[from].export_all().unwrap();
        docs[to].import(&bytes).unwrap();

        let after = docs[to].version();
        prop_assert!(matches!(
            after.compare(&source_version),
            CausalOrder::Greater | CausalOrder::Equal
        ));
        prop_assert!(after.includes_vv(&target_before));
    }

    #[test]
    fn vv_and_frontiers_round_trip(actions in prop::collection::vec(action(), 1..25)) {
        let mut docs = replicas();
        run(&mut docs, &actions);
        for doc in &docs {
            let heads = doc.vv_to_frontiers(doc.version()).unwrap();
            prop_assert_eq!(&heads, doc.frontiers());
            prop_assert_eq!(&doc.frontiers_to_vv(&heads).unwrap(), doc.version());

            // Every historical version reachable from a single op converts back to itself.
            for change in doc.iter_changes_causal() {
                let vv = doc
                    .frontiers_to_vv(&Frontiers::from_id(change.id_last()))
                    .unwrap();
                let back = doc.vv_to_frontiers(&vv).unwrap();
                prop_assert_eq!(doc.frontiers_to_vv(&back).unwrap(), vv);
            }
        }
    }

    #[test]
    fn replicas_converge_after_exchanging_everything(
        actions in prop::collection::vec(action(), 1..30),
    ) {
        let mut docs = replicas();
        run(&mut docs, &actions);
        sync_all(&mut docs);
        for doc in &docs[1..] {
            prop_assert_eq!(doc.version(), docs[0].version());
            prop_assert_eq!(doc.frontiers(), docs[0].frontiers());
            prop_assert_eq!(doc.all_changes(), docs[0].all_changes());
            prop_assert!(doc.pending_changes().is_empty());
        }
    }

    #[test]
    fn common_ancestor_of_two_split_replicas(
        before in prop::collection::vec(interaction(2), 0..40),
        after in prop::collection::vec(interaction(2), 0..40),
    ) {
        common_ancestor_after_split(2, &before, &after)?;
    }

    #[test]
    fn common_ancestor_of_four_split_replicas(
        before in prop::collection::vec(interaction(4), 0..40),
        after in prop::collection::vec(interaction(4), 0..40),
    ) {
        common_ancestor_after_split(4, &before, &after)?;
    }

    #[test]
    fn delivery_order_does_not_change_the_result(
        edits in prop::collection::vec((0..PEERS, "[a-z]{1,3}"), 1..8),
        seed in any::<u64>(),
    ) {
        // Build a history with a sync after every edit so later changes depend on earlier ones.
        let mut docs = replicas();
        let mut batches = Vec::new();
        for (peer, text) in &edits {
            let doc = &mut docs[*peer];
            let before = doc.version().clone();
            let handler = doc.get_text("text");
            handler.insert(doc, 0, text).unwrap();
            doc.commit().unwrap();
            batches.push(doc.export_from(&before).unwrap());
            sync_all(&mut docs);
        }

        let mut order: Vec<usize> = (0..batches.len()).collect();
        let mut state = seed;
        for i in (1..order.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            order.swap(i, (state >> 33) as usize % (i + 1));
        }

        let mut shuffled = Document::with_config(Config::default().with_peer(50));
        for idx in order {
            shuffled.import(&batches[idx]).unwrap();
        }
        prop_assert!(shuffled.pending_changes().is_empty());
        prop_assert_eq!(shuffled.version(), docs[0].version());
        prop_assert_eq!(shuffled.frontiers(), docs[0].frontiers());
    }
}

#[test]
fn empty_version_has_no_frontiers() {
    let doc = Document::with_config(Config::default().with_peer(PeerId(1)));
    assert!(doc.vv_to_frontiers(&VersionVector::new()).unwrap().is_empty());
    assert!(doc.frontiers_to_vv(&Frontiers::new()).unwrap().is_empty());
}
