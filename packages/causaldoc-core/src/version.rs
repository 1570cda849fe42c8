use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::{Counter, IdSpan, OpId, PeerId};
use crate::oplog::OpLog;

/// Outcome of comparing two causal summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CausalOrder {
    Equal,
    /// The left side causally precedes the right side.
    Less,
    Greater,
    /// Neither side dominates.
    Concurrent,
}

impl CausalOrder {
    pub fn to_ordering(self) -> Option<Ordering> {
        match self {
            CausalOrder::Equal => Some(Ordering::Equal),
            CausalOrder::Less => Some(Ordering::Less),
            CausalOrder::Greater => Some(Ordering::Greater),
            CausalOrder::Concurrent => None,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            CausalOrder::Less => CausalOrder::Greater,
            CausalOrder::Greater => CausalOrder::Less,
            other => other,
        }
    }
}

/// Per-peer count of known ops: peer `p` maps to `n` when counters `0..n` of `p` are known.
///
/// Peers absent from the map have `n == 0`; zero entries are never stored, so derived equality is
/// causal equality.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<PeerId, Counter>);

impl VersionVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Next expected counter for `peer`, or 0 if the peer is unseen.
    pub fn get(&self, peer: PeerId) -> Counter {
        self.0.get(&peer).copied().unwrap_or(0)
    }

    pub fn includes(&self, id: OpId) -> bool {
        id.counter < self.get(id.peer)
    }

    /// Whether every op known to `other` is known here.
    pub fn includes_vv(&self, other: &VersionVector) -> bool {
        other.0.iter().all(|(peer, end)| self.get(*peer) >= *end)
    }

    pub fn set_end(&mut self, peer: PeerId, end: Counter) {
        if end == 0 {
            self.0.remove(&peer);
        } else {
            self.0.insert(peer, end);
        }
    }

    /// Raise the entry for `id.peer` so that `id` is included.
    pub fn extend_to_include(&mut self, id: OpId) {
        let end = id.counter + 1;
        if self.get(id.peer) < end {
            self.0.insert(id.peer, end);
        }
    }

    pub fn merge(&mut self, other: &VersionVector) {
        for (peer, end) in &other.0 {
            if self.get(*peer) < *end {
                self.0.insert(*peer, *end);
            }
        }
    }

    pub fn intersection(&self, other: &VersionVector) -> VersionVector {
        self.0
            .iter()
            .map(|(peer, end)| (*peer, (*end).min(other.get(*peer))))
            .collect()
    }

    /// Counter ranges known here but absent from `other`, one span per peer, ordered by peer.
    pub fn diff_missing(&self, other: &VersionVector) -> Vec<IdSpan> {
        self.0
            .iter()
            .filter_map(|(peer, end)| {
                let start = other.get(*peer);
                (start < *end).then(|| IdSpan::new(*peer, start, *end))
            })
            .collect()
    }

    pub fn compare(&self, other: &VersionVector) -> CausalOrder {
        let mut less = false;
        let mut greater = false;
        for peer in self.0.keys().chain(other.0.keys()) {
            match self.get(*peer).cmp(&other.get(*peer)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return CausalOrder::Concurrent;
            }
        }
        match (less, greater) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Less,
            (false, true) => CausalOrder::Greater,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// Heads of the history this vector describes, resolved against `log`.
    pub fn to_frontiers(&self, log: &OpLog) -> Result<Frontiers> {
        log.vv_to_frontiers(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, Counter)> + '_ {
        self.0.iter().map(|(peer, end)| (*peer, *end))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<PeerId, Counter> {
        self.0.clone()
    }
}

impl PartialOrd for VersionVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).to_ordering()
    }
}

impl FromIterator<(PeerId, Counter)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (PeerId, Counter)>>(iter: I) -> Self {
        let mut vv = VersionVector::new();
        for (peer, end) in iter {
            if end > vv.get(peer) {
                vv.set_end(peer, end);
            }
        }
        vv
    }
}

impl From<BTreeMap<PeerId, Counter>> for VersionVector {
    fn from(map: BTreeMap<PeerId, Counter>) -> Self {
        map.into_iter().collect()
    }
}

/// Heads of the causal graph: ops that are not an ancestor of any other known op.
///
/// Kept sorted by `(peer, counter)` and deduplicated, so equality is set equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frontiers(Vec<OpId>);

impl Frontiers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_id(id: OpId) -> Self {
        Self(vec![id])
    }

    pub fn insert(&mut self, id: OpId) {
        if let Err(idx) = self.0.binary_search(&id) {
            self.0.insert(idx, id);
        }
    }

    pub fn remove(&mut self, id: OpId) -> bool {
        match self.0.binary_search(&id) {
            Ok(idx) => {
                self.0.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OpId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[OpId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Version vector of the causal closure of these heads, resolved against `log`.
    pub fn to_version_vector(&self, log: &OpLog) -> Result<VersionVector> {
        log.frontiers_to_vv(self)
    }
}

impl FromIterator<OpId> for Frontiers {
    fn from_iter<I: IntoIterator<Item = OpId>>(iter: I) -> Self {
        let mut ids: Vec<OpId> = iter.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self(ids)
    }
}

impl From<Vec<OpId>> for Frontiers {
    fn from(ids: Vec<OpId>) -> Self {
        ids.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a Frontiers {
    type Item = &'a OpId;
    type IntoIter = std::slice::Iter<'a, OpId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(entries: &[(u64, Counter)]) -> VersionVector {
        entries
            .iter()
            .map(|(peer, end)| (PeerId(*peer), *end))
            .collect()
    }

    #[test]
    fn missing_peers_read_as_zero() {
        let v = vv(&[(1, 3)]);
        assert_eq!(v.get(PeerId(1)), 3);
        assert_eq!(v.get(PeerId(2)), 0);
        assert!(v.includes(OpId::new(1, 2)));
        assert!(!v.includes(OpId::new(1, 3)));
        assert!(!v.includes(OpId::new(2, 0)));
    }

    #[test]
    fn zero_entries_do_not_affect_equality() {
        let mut a = vv(&[(1, 3)]);
        a.set_end(PeerId(2), 0);
        assert_eq!(a, vv(&[(1, 3), (2, 0)]));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn compare_covers_all_four_outcomes() {
        let base = vv(&[(1, 2), (2, 2)]);
        assert_eq!(base.compare(&base.clone()), CausalOrder::Equal);
        assert_eq!(base.compare(&vv(&[(1, 3), (2, 2)])), CausalOrder::Less);
        assert_eq!(base.compare(&vv(&[(1, 2)])), CausalOrder::Greater);
        assert_eq!(base.compare(&vv(&[(1, 3), (2, 1)])), CausalOrder::Concurrent);
        assert_eq!(base.partial_cmp(&vv(&[(1, 3), (2, 1)])), None);
        assert!(base < vv(&[(1, 2), (2, 2), (3, 1)]));
    }

    #[test]
    fn compare_against_empty() {
        let empty = VersionVector::new();
        assert_eq!(empty.compare(&VersionVector::new()), CausalOrder::Equal);
        assert_eq!(empty.compare(&vv(&[(4, 1)])), CausalOrder::Less);
        assert_eq!(vv(&[(4, 1)]).compare(&empty), CausalOrder::Greater);
    }

    #[test]
    fn diff_missing_lists_ranges_the_other_side_lacks() {
        let local = vv(&[(1, 5), (2, 2), (3, 1)]);
        let remote = vv(&[(1, 2), (2, 4)]);
        assert_eq!(
            local.diff_missing(&remote),
            vec![IdSpan::new(1, 2, 5), IdSpan::new(3, 0, 1)]
        );
        assert_eq!(remote.diff_missing(&local), vec![IdSpan::new(2, 2, 4)]);
    }

    #[test]
    fn merge_and_intersection() {
        let mut a = vv(&[(1, 5), (2, 1)]);
        let b = vv(&[(1, 2), (2, 4), (3, 1)]);
        assert_eq!(a.intersection(&b), vv(&[(1, 2), (2, 1)]));
        a.merge(&b);
        assert_eq!(a, vv(&[(1, 5), (2, 4), (3, 1)]));
        assert!(a.includes_vv(&b));
        assert!(!b.includes_vv(&a));
    }

    #[test]
    fn extend_to_include_only_grows() {
        let mut v = vv(&[(1, 5)]);
        v.extend_to_include(OpId::new(1, 2));
        assert_eq!(v.get(PeerId(1)), 5);
        v.extend_to_include(OpId::new(1, 7));
        assert_eq!(v.get(PeerId(1)), 8);
    }

    #[test]
    fn frontiers_are_sorted_sets() {
        let a: Frontiers = vec![OpId::new(2, 0), OpId::new(1, 4), OpId::new(2, 0)].into();
        let b: Frontiers = vec![OpId::new(1, 4), OpId::new(2, 0)].into();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.as_slice()[0], OpId::new(1, 4));

        let mut c = Frontiers::new();
        c.insert(OpId::new(2, 0));
        c.insert(OpId::new(1, 4));
        c.insert(OpId::new(1, 4));
        assert_eq!(c, a);
        assert!(c.remove(OpId::new(2, 0)));
        assert!(!c.remove(OpId::new(2, 0)));
        assert!(c.contains(OpId::new(1, 4)));
    }
}
