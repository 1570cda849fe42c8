use std::cmp::Ordering;

use causaldoc_core::{CausalOrder, Config, Document, Error, Frontiers, OpId};

fn replica(peer: u64) -> Document {
    Document::with_config(Config::default().with_peer(peer))
}

fn edit(doc: &mut Document, s: &str) {
    let text = doc.get_text("0");
    text.insert(doc, 0, s).unwrap();
    doc.commit().unwrap();
}

#[test]
fn frontiers_order_follows_causal_history() {
    let mut original = replica(1);
    edit(&mut original, "a");
    let v0 = original.frontiers().clone();

    let mut fresh = replica(2);
    fresh.import(&original.export_all().unwrap()).unwrap();
    assert_eq!(fresh.frontiers(), &v0);
    assert_eq!(fresh.cmp_frontiers(&v0).unwrap(), Ordering::Equal);

    edit(&mut original, "b");
    assert_eq!(
        original.cmp_frontiers(fresh.frontiers()).unwrap(),
        Ordering::Greater
    );
    assert_eq!(fresh.compare(original.version()), CausalOrder::Less);
    // Heads the fresh replica has never seen still imply everything it holds.
    assert_eq!(
        fresh.cmp_frontiers(original.frontiers()).unwrap(),
        Ordering::Less
    );

    edit(&mut fresh, "c");
    assert_eq!(fresh.compare(original.version()), CausalOrder::Concurrent);
    assert!(matches!(
        fresh.cmp_frontiers(original.frontiers()),
        Err(Error::Concurrent)
    ));
    assert_eq!(original.compare(fresh.version()), CausalOrder::Concurrent);

    let from_original = original.export_from(fresh.version()).unwrap();
    let from_fresh = fresh.export_from(original.version()).unwrap();
    fresh.import(&from_original).unwrap();
    original.import(&from_fresh).unwrap();

    assert_eq!(original.frontiers(), fresh.frontiers());
    assert_eq!(
        original.cmp_frontiers(fresh.frontiers()).unwrap(),
        Ordering::Equal
    );
    assert_eq!(fresh.compare(original.version()), CausalOrder::Equal);
    assert_eq!(original.frontiers().len(), 2);
}

#[test]
fn concurrent_heads_are_reported_as_an_error() {
    let mut a = replica(1);
    let mut b = replica(2);
    edit(&mut a, "a");
    edit(&mut b, "b");
    a.import(&b.export_all().unwrap()).unwrap();

    let ours = Frontiers::from_id(OpId::new(1, 0));
    let theirs = Frontiers::from_id(OpId::new(2, 0));
    assert!(matches!(
        a.cmp_frontiers_of(&ours, &theirs),
        Err(Error::Concurrent)
    ));
    assert_eq!(a.cmp_frontiers(&ours).unwrap(), Ordering::Greater);
    assert_eq!(
        a.cmp_frontiers_of(&Frontiers::new(), &theirs).unwrap(),
        Ordering::Less
    );
}

#[test]
fn a_merge_commit_dominates_both_branches() {
    let mut a = replica(1);
    let mut b = replica(2);
    edit(&mut a, "a");
    edit(&mut b, "b");
    a.import(&b.export_all().unwrap()).unwrap();
    let before_merge = a.frontiers().clone();
    assert_eq!(before_merge.len(), 2);

    edit(&mut a, "m");
    assert_eq!(a.frontiers(), &Frontiers::from_id(OpId::new(1, 1)));
    assert_eq!(a.cmp_frontiers(&before_merge).unwrap(), Ordering::Greater);
    assert_eq!(
        a.cmp_frontiers_of(&before_merge, a.frontiers()).unwrap(),
        Ordering::Less
    );
}

#[test]
fn vv_and_frontiers_convert_through_the_document() {
    let mut a = replica(1);
    let mut b = replica(2);
    edit(&mut a, "ab");
    edit(&mut b, "c");
    a.import(&b.export_all().unwrap()).unwrap();
    edit(&mut a, "d");

    let vv = a.version().clone();
    let heads = a.vv_to_frontiers(&vv).unwrap();
    assert_eq!(&heads, a.frontiers());
    assert_eq!(a.frontiers_to_vv(&heads).unwrap(), vv);
    assert_eq!(heads.to_version_vector(a.oplog()).unwrap(), vv);
    assert_eq!(vv.to_frontiers(a.oplog()).unwrap(), heads);

    let mut partial = vv.clone();
    partial.set_end(causaldoc_core::PeerId(1), 1);
    let partial_heads = a.vv_to_frontiers(&partial).unwrap();
    assert_eq!(a.frontiers_to_vv(&partial_heads).unwrap(), partial);
}

#[test]
fn unseen_heads_are_placed_through_the_history_they_imply() {
    let mut a = replica(1);
    let mut b = replica(2);
    edit(&mut a, "a");
    edit(&mut b, "b");
    b.import(&a.export_all().unwrap()).unwrap();
    edit(&mut b, "m");

    // 2:1 depends on 1:0, but only through history a has never seen.
    assert!(matches!(a.cmp_frontiers(b.frontiers()), Err(Error::Concurrent)));

    // A known head next to an unseen one is enough.
    let mixed = Frontiers::from(vec![OpId::new(1, 0), OpId::new(2, 1)]);
    assert_eq!(a.cmp_frontiers(&mixed).unwrap(), Ordering::Less);

    // A foreign head of an unknown peer says nothing about what a holds.
    let stranger = Frontiers::from_id(OpId::new(9, 4));
    assert!(matches!(a.cmp_frontiers(&stranger), Err(Error::Concurrent)));

    // A later op of a's own peer implies all of a's history.
    let ahead = Frontiers::from_id(OpId::new(1, 7));
    assert_eq!(a.cmp_frontiers(&ahead).unwrap(), Ordering::Less);

    let empty = replica(3);
    assert_eq!(empty.cmp_frontiers(&stranger).unwrap(), Ordering::Less);
    assert_eq!(
        empty.cmp_frontiers(&Frontiers::new()).unwrap(),
        Ordering::Equal
    );
}

#[test]
fn common_ancestor_of_diverged_replicas() {
    let mut a = replica(1);
    edit(&mut a, "base");
    let base = a.frontiers().clone();

    let mut b = replica(2);
    b.import(&a.export_all().unwrap()).unwrap();
    edit(&mut a, "x");
    edit(&mut b, "y");
    a.import(&b.export_all().unwrap()).unwrap();

    let ours = Frontiers::from_id(OpId::new(1, 4));
    let theirs = Frontiers::from_id(OpId::new(2, 0));
    assert_eq!(a.find_common_ancestor(&ours, &theirs).unwrap(), base);
    assert_eq!(
        a.find_common_ancestor(&base, a.frontiers()).unwrap(),
        base
    );

    let mut c = replica(3);
    edit(&mut c, "z");
    a.import(&c.export_all().unwrap()).unwrap();
    assert!(a
        .find_common_ancestor(&Frontiers::from_id(OpId::new(3, 0)), &ours)
        .unwrap()
        .is_empty());
    assert!(matches!(
        a.find_common_ancestor(&Frontiers::from_id(OpId::new(8, 0)), &ours),
        Err(Error::NotFound(_))
    ));
}
