use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::change::{Change, Op, OpContent};
use crate::config::Config;
use crate::encoding::{decode_changes, encode_changes};
use crate::error::{Error, Result};
use crate::event::{EventHandler, Observers, SubscriptionId, VersionEvent};
use crate::ids::{ContainerId, Counter, IdSpan, Lamport, OpId, PeerId};
use crate::oplog::{ImportStatus, OpLog};
use crate::registry::{ContainerRegistry, Handler, ListHandler, MapHandler, TextHandler};
use crate::version::{CausalOrder, Frontiers, VersionVector};

/// Ops recorded since the last commit. Their counters are already fixed.
#[derive(Debug, Default)]
struct Transaction {
    ops: Vec<(ContainerId, OpContent)>,
    len: Counter,
}

/// A replica of a shared document.
///
/// One instance is a sequential actor: it is mutated through `&mut self` only, and replicas
/// converge by exchanging the byte batches produced by [`Document::export_from`].
#[derive(Debug)]
pub struct Document {
    peer: PeerId,
    config: Config,
    oplog: OpLog,
    registry: ContainerRegistry,
    txn: Transaction,
    observers: Observers,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            peer: config.peer.unwrap_or_else(PeerId::random),
            config,
            oplog: OpLog::new(),
            registry: ContainerRegistry::default(),
            txn: Transaction::default(),
            observers: Observers::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    /// Change the local peer id. Only allowed while nothing has been recorded under the current id.
    pub fn set_peer_id(&mut self, peer: impl Into<PeerId>) -> Result<()> {
        let peer = peer.into();
        if !self.oplog.changes_of(self.peer).is_empty() || !self.txn.ops.is_empty() {
            return Err(Error::InvalidState(format!(
                "peer {} already has local history",
                self.peer
            )));
        }
        if !self.oplog.changes_of(peer).is_empty() {
            return Err(Error::InvalidState(format!(
                "peer {peer} already has history in this document"
            )));
        }
        self.peer = peer;
        Ok(())
    }

    pub fn get_text(&mut self, name: &str) -> TextHandler {
        self.registry.root_text(name)
    }

    pub fn get_list(&mut self, name: &str) -> ListHandler {
        self.registry.root_list(name)
    }

    pub fn get_map(&mut self, name: &str) -> MapHandler {
        self.registry.root_map(name)
    }

    /// Resolve a container by `<counter>:<Type>@<peer>` or root name.
    pub fn get_container(&self, id: &str) -> Result<Handler> {
        self.registry.resolve(id)
    }

    pub fn container(&self, id: &ContainerId) -> Result<Handler> {
        self.registry.get(id)
    }

    pub fn containers(&self) -> impl Iterator<Item = &ContainerId> + '_ {
        self.registry.ids()
    }

    /// Record an op in the open transaction and return its id.
    pub(crate) fn push_op(&mut self, container: &ContainerId, content: OpContent) -> Result<OpId> {
        if !self.registry.contains(container) {
            return Err(Error::NotFound(format!("container {container}")));
        }
        let overflow = || Error::InvalidState(format!("counter overflow for peer {}", self.peer));
        let atoms = content.checked_atom_len().ok_or_else(overflow)?;
        let counter = self
            .oplog
            .next_counter(self.peer)
            .checked_add(self.txn.len)
            .ok_or_else(overflow)?;
        // txn.len <= counter, so a fitting end implies a fitting length
        counter.checked_add(atoms).ok_or_else(overflow)?;
        let len = self.txn.len + atoms;
        let op = Op {
            counter,
            container: container.clone(),
            content,
        };
        if let Some(child) = op.created_container(self.peer) {
            self.registry.register(child);
        }
        self.txn.len = len;
        self.txn.ops.push((op.container, op.content));
        Ok(OpId::new(self.peer, counter))
    }

    /// Seal the open transaction into one change. Does nothing when no ops are pending.
    pub fn commit(&mut self) -> Result<()> {
        self.commit_inner(None)
    }

    /// Like [`Document::commit`], labelling the resulting event with `origin`.
    pub fn commit_with(&mut self, origin: &str) -> Result<()> {
        self.commit_inner(Some(origin.to_string()))
    }

    fn commit_inner(&mut self, origin: Option<String>) -> Result<()> {
        if self.txn.ops.is_empty() {
            return Ok(());
        }
        let txn = std::mem::take(&mut self.txn);
        let containers = dedup_containers(txn.ops.iter().map(|(c, _)| c));
        let timestamp = if self.config.record_timestamp {
            chrono::Utc::now().timestamp()
        } else {
            0
        };
        let old_version = self.oplog.frontiers().clone();
        let deps = old_version.clone();
        let change = self.oplog.append_at(self.peer, txn.ops, deps, timestamp)?;
        debug!(
            peer = %change.peer(),
            start = change.ctr_start(),
            len = change.len(),
            lamport = change.lamport,
            "committed change"
        );
        let event = VersionEvent {
            old_version,
            new_version: self.oplog.frontiers().clone(),
            local: true,
            origin,
            containers,
        };
        self.observers.emit(&event);
        Ok(())
    }

    pub fn oplog(&self) -> &OpLog {
        &self.oplog
    }

    /// Version vector of the committed history.
    pub fn version(&self) -> &VersionVector {
        self.oplog.vv()
    }

    pub fn frontiers(&self) -> &Frontiers {
        self.oplog.frontiers()
    }

    pub fn next_lamport(&self) -> Lamport {
        self.oplog.next_lamport()
    }

    pub fn lamport_of(&self, id: OpId) -> Option<Lamport> {
        self.oplog.lamport_of(id)
    }

    pub fn get_change(&self, id: OpId) -> Result<&Change> {
        self.oplog.get_change(id)
    }

    pub fn changes_of(&self, peer: PeerId) -> &[Change] {
        self.oplog.changes_of(peer)
    }

    pub fn all_changes(&self) -> &BTreeMap<PeerId, Vec<Change>> {
        self.oplog.all_changes()
    }

    pub fn ops_in_change(&self, id: OpId) -> Result<&[Op]> {
        self.oplog.ops_in_change(id)
    }

    /// Every committed change in a dependency-respecting order, for replay by content layers.
    pub fn iter_changes_causal(&self) -> impl Iterator<Item = &Change> + '_ {
        self.oplog.iter_changes_causal()
    }

    pub fn changes_since(&self, vv: &VersionVector) -> Vec<Change> {
        self.oplog.changes_since(vv)
    }

    pub fn vv_to_frontiers(&self, vv: &VersionVector) -> Result<Frontiers> {
        self.oplog.vv_to_frontiers(vv)
    }

    pub fn frontiers_to_vv(&self, frontiers: &Frontiers) -> Result<VersionVector> {
        self.oplog.frontiers_to_vv(frontiers)
    }

    /// Compare this replica's version with `other`.
    pub fn compare(&self, other: &VersionVector) -> CausalOrder {
        self.version().compare(other)
    }

    /// Three-way comparison of this replica's frontiers with `other`.
    ///
    /// `other` may name ops this replica has never seen. It is `Less` when the history `other`
    /// provably contains already covers this replica; any other unseen case is `Error::Concurrent`.
    pub fn cmp_frontiers(&self, other: &Frontiers) -> Result<Ordering> {
        self.oplog
            .compare_with_frontiers(other)?
            .to_ordering()
            .ok_or(Error::Concurrent)
    }

    /// Three-way comparison of two sets of heads known to this replica.
    ///
    /// Concurrent heads have no three-way answer and yield `Error::Concurrent`; they are never
    /// folded into `Less` or `Greater`.
    pub fn cmp_frontiers_of(&self, a: &Frontiers, b: &Frontiers) -> Result<Ordering> {
        self.oplog
            .compare_frontiers(a, b)?
            .to_ordering()
            .ok_or(Error::Concurrent)
    }

    /// Latest heads that both `a` and `b` have in their history. Empty when they share nothing.
    pub fn find_common_ancestor(&self, a: &Frontiers, b: &Frontiers) -> Result<Frontiers> {
        self.oplog.find_common_ancestor(a, b)
    }

    /// Encode every committed change `vv` does not cover. Commits the open transaction first.
    pub fn export_from(&mut self, vv: &VersionVector) -> Result<Vec<u8>> {
        self.commit()?;
        let changes = self.oplog.changes_since(vv);
        let bytes = encode_changes(&changes)?;
        debug!(changes = changes.len(), bytes = bytes.len(), "exported changes");
        Ok(bytes)
    }

    pub fn export_all(&mut self) -> Result<Vec<u8>> {
        self.export_from(&VersionVector::new())
    }

    /// Merge a batch produced by another replica's export.
    ///
    /// Changes whose dependencies are missing stay buffered for later imports. If the batch carried
    /// structurally invalid changes, the valid ones are still applied and the first problem is
    /// returned as the error. What was applied is then visible through [`Document::version`] and
    /// [`Document::pending_changes`], or use [`Document::import_with_status`] to get both.
    pub fn import(&mut self, bytes: &[u8]) -> Result<ImportStatus> {
        self.import_batch(&[bytes])
    }

    /// Import several batches in one fixed-point pass.
    pub fn import_batch(&mut self, batches: &[&[u8]]) -> Result<ImportStatus> {
        match self.import_with_status(batches)? {
            (_, Some(err)) => Err(err),
            (status, None) => Ok(status),
        }
    }

    /// Like [`Document::import_batch`], but a structurally invalid change does not hide the status.
    ///
    /// The outer error is reserved for batches that could not be decoded at all, in which case
    /// nothing was applied. Otherwise the status describes every change that went in, paired with
    /// the first rejected change's error.
    pub fn import_with_status(
        &mut self,
        batches: &[&[u8]],
    ) -> Result<(ImportStatus, Option<Error>)> {
        self.commit()?;
        let mut changes = Vec::new();
        let mut structural = None;
        for bytes in batches {
            let decoded = decode_changes(bytes)?;
            changes.extend(decoded.changes);
            if structural.is_none() {
                structural = decoded.error;
            }
        }

        let old_version = self.oplog.frontiers().clone();
        let (status, rejected) = self.oplog.import_changes(changes);
        debug!(
            applied = status.applied.len(),
            pending = status.pending.len(),
            "imported changes"
        );

        if !status.applied.is_empty() {
            let containers = self.register_imported(&status.applied);
            let event = VersionEvent {
                old_version,
                new_version: self.oplog.frontiers().clone(),
                local: false,
                origin: None,
                containers,
            };
            self.observers.emit(&event);
        }

        Ok((status, structural.or(rejected)))
    }

    fn register_imported(&mut self, spans: &[IdSpan]) -> Vec<ContainerId> {
        let mut touched = BTreeSet::new();
        for span in spans {
            for change in self.oplog.changes_in_span(*span) {
                for op in change.ops.iter().filter(|op| op.ctr_end() > span.start) {
                    if let Some(child) = op.created_container(change.peer()) {
                        self.registry.register(child);
                    }
                    self.registry.register(op.container.clone());
                    touched.insert(op.container.clone());
                }
            }
        }
        touched.into_iter().collect()
    }

    /// Counter ranges received but still waiting for missing dependencies.
    pub fn pending_changes(&self) -> Vec<IdSpan> {
        self.oplog.pending_spans()
    }

    pub fn subscribe(&mut self, handler: EventHandler) -> SubscriptionId {
        self.observers.subscribe(handler, None, false)
    }

    /// Subscribe for the next event only. The subscription is removed once it has fired.
    pub fn subscribe_once(&mut self, handler: EventHandler) -> SubscriptionId {
        self.observers.subscribe(handler, None, true)
    }

    /// Subscribe to events whose changes touch `container`.
    pub fn subscribe_container(
        &mut self,
        container: &ContainerId,
        handler: EventHandler,
    ) -> SubscriptionId {
        self.observers.subscribe(handler, Some(container.clone()), false)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }
}

fn dedup_containers<'a>(ids: impl Iterator<Item = &'a ContainerId>) -> Vec<ContainerId> {
    ids.cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
