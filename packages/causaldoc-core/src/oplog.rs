use std::collections::{BTreeMap, VecDeque};

use tracing::{trace, warn};

use crate::change::{Change, Op, OpContent};
use crate::clock::LamportClock;
use crate::error::{Error, Result};
use crate::ids::{ContainerId, Counter, IdSpan, Lamport, OpId, PeerId};
use crate::version::{CausalOrder, Frontiers, VersionVector};

/// What an import call did with the changes it was handed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportStatus {
    /// Counter ranges newly added to the log, coalesced per peer.
    pub applied: Vec<IdSpan>,
    /// Counter ranges still waiting for missing dependencies after the call.
    pub pending: Vec<IdSpan>,
}

impl ImportStatus {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

enum Applied {
    New(IdSpan),
    Known,
    Blocked { missing: OpId, change: Change },
}

/// Changes whose dependencies are not yet in the log, keyed by the first missing op.
#[derive(Clone, Debug, Default)]
struct PendingChanges {
    by_missing: BTreeMap<OpId, Vec<Change>>,
}

impl PendingChanges {
    fn push(&mut self, missing: OpId, change: Change) {
        let waiting = self.by_missing.entry(missing).or_default();
        if !waiting
            .iter()
            .any(|c| c.id == change.id && c.ctr_end() == change.ctr_end())
        {
            waiting.push(change);
        }
    }

    /// Remove every change waiting on an op of `peer` below `end`.
    fn take_unblocked(&mut self, peer: PeerId, end: Counter) -> Vec<Change> {
        let keys: Vec<OpId> = self
            .by_missing
            .range(OpId::new(peer, 0)..OpId::new(peer, end))
            .map(|(id, _)| *id)
            .collect();
        keys.into_iter()
            .filter_map(|id| self.by_missing.remove(&id))
            .flatten()
            .collect()
    }

    fn take_all_unblocked(&mut self, vv: &VersionVector) -> Vec<Change> {
        let keys: Vec<OpId> = self
            .by_missing
            .keys()
            .filter(|id| vv.includes(**id))
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|id| self.by_missing.remove(&id))
            .flatten()
            .collect()
    }

    fn spans(&self) -> Vec<IdSpan> {
        coalesce(
            self.by_missing
                .values()
                .flatten()
                .map(|c| IdSpan::new(c.peer(), c.ctr_start(), c.ctr_end()))
                .collect(),
        )
    }

    fn len(&self) -> usize {
        self.by_missing.values().map(Vec::len).sum()
    }
}

/// Sort spans by peer and start, merging the ones that touch or overlap.
fn coalesce(mut spans: Vec<IdSpan>) -> Vec<IdSpan> {
    spans.sort_by_key(|s| (s.peer, s.start));
    let mut merged: Vec<IdSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if let Some(last) = merged.last_mut() {
            if last.peer == span.peer && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        }
        merged.push(span);
    }
    merged
}

fn causal_order_key(change: &Change) -> (Lamport, PeerId, Counter) {
    (change.lamport, change.peer(), change.ctr_start())
}

/// Append-only log of every change this replica knows about.
///
/// Changes live in per-peer arenas ordered by counter, so `(peer, counter)` is the index of any
/// op and dependency edges are plain `OpId`s. The version vector, frontiers and Lamport clock are
/// maintained together with every insertion.
#[derive(Clone, Debug, Default)]
pub struct OpLog {
    changes: BTreeMap<PeerId, Vec<Change>>,
    vv: VersionVector,
    frontiers: Frontiers,
    clock: LamportClock,
    pending: PendingChanges,
}

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vv(&self) -> &VersionVector {
        &self.vv
    }

    pub fn frontiers(&self) -> &Frontiers {
        &self.frontiers
    }

    /// Lamport timestamp past every op in the log.
    pub fn next_lamport(&self) -> Lamport {
        self.clock.now()
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.vv.includes(id)
    }

    /// Counter the next change of `peer` must start at.
    pub fn next_counter(&self, peer: PeerId) -> Counter {
        self.vv.get(peer)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Change containing `id`.
    pub fn get_change(&self, id: OpId) -> Result<&Change> {
        let changes = self.changes_of(id.peer);
        let idx = changes.partition_point(|c| c.ctr_end() <= id.counter);
        changes
            .get(idx)
            .filter(|c| c.contains(id))
            .ok_or_else(|| Error::NotFound(format!("no change contains op {id}")))
    }

    /// Changes of one peer in counter order.
    pub fn changes_of(&self, peer: PeerId) -> &[Change] {
        self.changes.get(&peer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_changes(&self) -> &BTreeMap<PeerId, Vec<Change>> {
        &self.changes
    }

    /// Ops embedded in the change that contains `id`.
    pub fn ops_in_change(&self, id: OpId) -> Result<&[Op]> {
        self.get_change(id).map(|c| c.ops.as_slice())
    }

    pub fn lamport_of(&self, id: OpId) -> Option<Lamport> {
        self.get_change(id).ok().map(|c| c.lamport_of(id.counter))
    }

    /// Changes of `span.peer` overlapping `[span.start, span.end)`.
    pub fn changes_in_span(&self, span: IdSpan) -> &[Change] {
        let changes = self.changes_of(span.peer);
        let from = changes.partition_point(|c| c.ctr_end() <= span.start);
        let to = changes.partition_point(|c| c.ctr_start() < span.end);
        &changes[from..to.max(from)]
    }

    /// Lamport timestamp a new change of `peer` with these deps would receive.
    pub fn assign_lamport(&self, peer: PeerId, deps: &Frontiers) -> Result<Lamport> {
        let local_prev = OpId::new(peer, self.next_counter(peer)).prev();
        let mut parents = Vec::with_capacity(deps.len() + 1);
        for id in deps.iter().copied().chain(local_prev) {
            let lamport = self
                .lamport_of(id)
                .ok_or(Error::DanglingDependency(id))?;
            parents.push(lamport);
        }
        Ok(LamportClock::assign(parents))
    }

    /// Record a new change of `peer`. Counters are assigned contiguously after the peer's last op.
    pub fn append(
        &mut self,
        peer: PeerId,
        ops: Vec<(ContainerId, OpContent)>,
        deps: Frontiers,
    ) -> Result<&Change> {
        self.append_at(peer, ops, deps, 0)
    }

    pub(crate) fn append_at(
        &mut self,
        peer: PeerId,
        ops: Vec<(ContainerId, OpContent)>,
        deps: Frontiers,
        timestamp: i64,
    ) -> Result<&Change> {
        if ops.is_empty() {
            return Err(Error::InvalidState("cannot append an empty change".into()));
        }
        if ops.iter().any(|(_, content)| content.atom_len() == 0) {
            return Err(Error::InvalidState("ops must occupy at least one counter".into()));
        }
        let lamport = self.assign_lamport(peer, &deps)?;
        let start = self.next_counter(peer);
        let mut counter = start;
        let mut built = Vec::with_capacity(ops.len());
        for (container, content) in ops {
            let len = content.checked_atom_len().ok_or_else(|| {
                Error::InvalidState(format!("op at {counter}@{peer} is too long"))
            })?;
            built.push(Op {
                counter,
                container,
                content,
            });
            counter = counter
                .checked_add(len)
                .ok_or_else(|| Error::InvalidState(format!("counter overflow for peer {peer}")))?;
        }
        if lamport.checked_add(counter - start).is_none() {
            return Err(Error::InvalidState(format!(
                "lamport {lamport} leaves no room for {} ops",
                counter - start
            )));
        }
        let ops = built;
        let change = Change {
            id: OpId::new(peer, start),
            lamport,
            deps,
            timestamp,
            ops,
        };
        trace!(peer = %peer, start, end = counter, lamport, "append change");
        Ok(self.insert_change(change))
    }

    fn insert_change(&mut self, change: Change) -> &Change {
        let peer = change.peer();
        for parent in change.parents() {
            self.frontiers.remove(parent);
        }
        self.frontiers.insert(change.id_last());
        self.vv.set_end(peer, change.ctr_end());
        self.clock.observe(change.lamport_end());
        let changes = self.changes.entry(peer).or_default();
        changes.push(change);
        &changes[changes.len() - 1]
    }

    /// Version vector of the causal closure of `roots`.
    fn closure(&self, roots: impl IntoIterator<Item = OpId>) -> Result<VersionVector> {
        let mut vv = VersionVector::new();
        let mut stack: Vec<OpId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            let known = vv.get(id.peer);
            if id.counter < known {
                continue;
            }
            if !self.contains(id) {
                return Err(Error::NotFound(format!("op {id} is not in the change log")));
            }
            vv.set_end(id.peer, id.counter + 1);
            for change in self.changes_in_span(IdSpan::new(id.peer, known, id.counter + 1)) {
                stack.extend(change.deps.iter().copied());
            }
        }
        Ok(vv)
    }

    pub fn frontiers_to_vv(&self, frontiers: &Frontiers) -> Result<VersionVector> {
        self.closure(frontiers.iter().copied())
    }

    /// Causal order of two sets of heads, both of which must be known to this log.
    pub fn compare_frontiers(&self, a: &Frontiers, b: &Frontiers) -> Result<CausalOrder> {
        if a == b {
            return Ok(CausalOrder::Equal);
        }
        Ok(self.frontiers_to_vv(a)?.compare(&self.frontiers_to_vv(b)?))
    }

    /// Causal order of this log's heads relative to `other`, which may name unseen ops.
    ///
    /// An unseen head `(p, c)` still implies every op of `p` this log holds, so the known part of
    /// `other`'s history is bounded from below. When that bound already covers the log, `other` is
    /// strictly ahead. Otherwise the unseen history could go either way and the result is
    /// `Concurrent`.
    pub fn compare_with_frontiers(&self, other: &Frontiers) -> Result<CausalOrder> {
        if other == &self.frontiers {
            return Ok(CausalOrder::Equal);
        }
        let (known, unseen): (Vec<OpId>, Vec<OpId>) =
            other.iter().copied().partition(|id| self.contains(*id));
        if unseen.is_empty() {
            return Ok(self.vv.compare(&self.closure(known)?));
        }
        let implied = unseen.iter().filter_map(|id| {
            let end = self.vv.get(id.peer);
            (end > 0).then(|| OpId::new(id.peer, id.counter.min(end - 1)))
        });
        let lower_bound = self.closure(known.iter().copied().chain(implied))?;
        if lower_bound.includes_vv(&self.vv) {
            Ok(CausalOrder::Less)
        } else {
            Ok(CausalOrder::Concurrent)
        }
    }

    /// Heads of the history shared by `a` and `b`.
    pub fn find_common_ancestor(&self, a: &Frontiers, b: &Frontiers) -> Result<Frontiers> {
        let shared = self.frontiers_to_vv(a)?.intersection(&self.frontiers_to_vv(b)?);
        self.vv_to_frontiers(&shared)
    }

    pub fn vv_to_frontiers(&self, vv: &VersionVector) -> Result<Frontiers> {
        if let Some((peer, end)) = vv.iter().find(|(peer, end)| *end > self.vv.get(*peer)) {
            return Err(Error::NotFound(format!(
                "version {}@{peer} is not in the change log",
                end - 1
            )));
        }
        let candidates: Vec<OpId> = vv.iter().map(|(peer, end)| OpId::new(peer, end - 1)).collect();
        let mut strict_parents = Vec::new();
        for id in &candidates {
            strict_parents.extend(self.get_change(*id)?.deps.iter().copied());
            strict_parents.extend(id.prev());
        }
        let ancestors = self.closure(strict_parents)?;
        Ok(candidates
            .into_iter()
            .filter(|id| !ancestors.includes(*id))
            .collect())
    }

    /// Changes not covered by `vv`, sliced to the missing suffix, in causal order.
    pub fn changes_since(&self, vv: &VersionVector) -> Vec<Change> {
        let mut out: Vec<Change> = self
            .vv
            .diff_missing(vv)
            .into_iter()
            .flat_map(|span| {
                self.changes_in_span(span)
                    .iter()
                    .map(move |c| c.slice_from(span.start))
            })
            .collect();
        out.sort_by_key(causal_order_key);
        out
    }

    /// Every change in a dependency-respecting order.
    pub fn iter_changes_causal(&self) -> impl Iterator<Item = &Change> + '_ {
        let mut all: Vec<&Change> = self.changes.values().flatten().collect();
        all.sort_by_key(|c| causal_order_key(c));
        all.into_iter()
    }

    pub fn pending_spans(&self) -> Vec<IdSpan> {
        self.pending.spans()
    }

    /// Apply foreign changes in dependency order, buffering the ones whose parents are missing.
    ///
    /// Runs to a fixed point: each applied change wakes the buffered changes waiting on it.
    /// Changes that fail validation are skipped; the first such error is returned alongside the
    /// status of everything else.
    pub fn import_changes(&mut self, mut candidates: Vec<Change>) -> (ImportStatus, Option<Error>) {
        candidates.sort_by_key(causal_order_key);
        let mut work: VecDeque<Change> = candidates.into();
        work.extend(self.pending.take_all_unblocked(&self.vv));

        let mut applied = Vec::new();
        let mut first_error = None;
        while let Some(change) = work.pop_front() {
            match self.try_apply(change) {
                Ok(Applied::New(span)) => {
                    trace!(peer = %span.peer, start = span.start, end = span.end, "applied change");
                    applied.push(span);
                    work.extend(self.pending.take_unblocked(span.peer, span.end));
                }
                Ok(Applied::Known) => {}
                Ok(Applied::Blocked { missing, change }) => {
                    trace!(id = %change.id, missing = %missing, "buffered change");
                    self.pending.push(missing, change);
                }
                Err(err) => {
                    warn!(error = %err, "rejected change during import");
                    first_error.get_or_insert(err);
                }
            }
        }

        let status = ImportStatus {
            applied: coalesce(applied),
            pending: self.pending.spans(),
        };
        trace!(pending = self.pending.len(), "import reached fixed point");
        (status, first_error)
    }

    fn try_apply(&mut self, change: Change) -> Result<Applied> {
        let known_end = self.next_counter(change.peer());
        if change.ctr_end() <= known_end {
            return Ok(Applied::Known);
        }
        if change.ctr_start() > known_end {
            let missing = OpId::new(change.peer(), change.ctr_start() - 1);
            return Ok(Applied::Blocked { missing, change });
        }
        let change = if change.ctr_start() < known_end {
            change.slice_from(known_end)
        } else {
            change
        };
        if change.checked_lamport_end().is_none() {
            return Err(Error::InvalidState(format!(
                "lamport range of change {} overflows",
                change.id
            )));
        }
        if let Some(missing) = change.deps.iter().copied().find(|id| !self.contains(*id)) {
            return Ok(Applied::Blocked { missing, change });
        }

        let parents: Vec<Lamport> = change
            .parents()
            .filter_map(|id| self.lamport_of(id))
            .collect();
        let expected = LamportClock::assign(parents);
        if change.lamport < expected {
            return Err(Error::InvalidLamport {
                id: change.id,
                lamport: change.lamport,
                expected,
            });
        }

        let span = IdSpan::new(change.peer(), change.ctr_start(), change.ctr_end());
        self.insert_change(change);
        Ok(Applied::New(span))
    }

    /// Check the log's structural invariants. Intended for tests and debugging.
    pub fn validate_invariants(&self) -> Result<()> {
        for (peer, changes) in &self.changes {
            let mut expected = 0;
            for change in changes {
                if change.ctr_start() != expected {
                    return Err(Error::CorruptVersion {
                        peer: *peer,
                        expected,
                        found: change.ctr_start(),
                    });
                }
                for dep in change.parents() {
                    if !self.contains(dep) {
                        return Err(Error::DanglingDependency(dep));
                    }
                }
                let expected_lamport =
                    LamportClock::assign(change.parents().filter_map(|id| self.lamport_of(id)));
                if change.lamport < expected_lamport {
                    return Err(Error::InvalidLamport {
                        id: change.id,
                        lamport: change.lamport,
                        expected: expected_lamport,
                    });
                }
                expected = change.ctr_end();
            }
            if self.vv.get(*peer) != expected {
                return Err(Error::InvalidState(format!(
                    "version vector disagrees with log for peer {peer}"
                )));
            }
        }
        if self.vv.len() != self.changes.len() {
            return Err(Error::InvalidState("version vector lists unknown peers".into()));
        }
        if self.vv_to_frontiers(&self.vv)? != self.frontiers {
            return Err(Error::InvalidState("frontiers are not the heads of the log".into()));
        }
        Ok(())
    }
}
