//! Byte format for exchanged change batches.
//!
//! Layout: the magic `CDOC`, one format-version byte, then a varint `bincode` body holding the
//! changes. Op counters are not transmitted: ops of a change occupy contiguous counters from the
//! change's start, so the decoder rebuilds them.

use std::collections::BTreeMap;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::change::{Change, Op, OpContent};
use crate::error::{Error, Result};
use crate::ids::{ContainerId, ContainerType, Counter, Lamport, OpId, PeerId};

const MAGIC: [u8; 4] = *b"CDOC";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;

#[derive(Serialize, Deserialize)]
struct WireBatch {
    changes: Vec<WireChange>,
}

#[derive(Serialize, Deserialize)]
struct WireChange {
    peer: u64,
    counter: Counter,
    lamport: Lamport,
    timestamp: i64,
    deps: Vec<(u64, Counter)>,
    ops: Vec<WireOp>,
}

#[derive(Serialize, Deserialize)]
struct WireOp {
    container: WireContainer,
    content: OpContent,
}

#[derive(Serialize, Deserialize)]
enum WireContainer {
    Root { name: String, kind: ContainerType },
    Normal { peer: u64, counter: Counter, kind: ContainerType },
}

/// Changes decoded from a batch, plus the structural error that cut part of it off, if any.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub changes: Vec<Change>,
    pub error: Option<Error>,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
}

fn container_to_wire(id: &ContainerId) -> WireContainer {
    match id {
        ContainerId::Root { name, kind } => WireContainer::Root {
            name: name.clone(),
            kind: *kind,
        },
        ContainerId::Normal { id, kind } => WireContainer::Normal {
            peer: id.peer.as_u64(),
            counter: id.counter,
            kind: *kind,
        },
    }
}

fn wire_to_container(wire: WireContainer) -> ContainerId {
    match wire {
        WireContainer::Root { name, kind } => ContainerId::Root { name, kind },
        WireContainer::Normal {
            peer,
            counter,
            kind,
        } => ContainerId::normal(OpId::new(peer, counter), kind),
    }
}

fn change_to_wire(change: &Change) -> WireChange {
    WireChange {
        peer: change.peer().as_u64(),
        counter: change.ctr_start(),
        lamport: change.lamport,
        timestamp: change.timestamp,
        deps: change
            .deps
            .iter()
            .map(|id| (id.peer.as_u64(), id.counter))
            .collect(),
        ops: change
            .ops
            .iter()
            .map(|op| WireOp {
                container: container_to_wire(&op.container),
                content: op.content.clone(),
            })
            .collect(),
    }
}

fn wire_to_change(wire: WireChange) -> Result<Change> {
    let peer = PeerId(wire.peer);
    if wire.ops.is_empty() {
        return Err(Error::Decode(format!(
            "change {}@{peer} carries no ops",
            wire.counter
        )));
    }
    let mut counter = wire.counter;
    let mut ops = Vec::with_capacity(wire.ops.len());
    for op in wire.ops {
        let len = op
            .content
            .checked_atom_len()
            .ok_or_else(|| Error::Decode(format!("op at {counter}@{peer} is too long")))?;
        if len == 0 {
            return Err(Error::Decode(format!("zero-length op at {counter}@{peer}")));
        }
        ops.push(Op {
            counter,
            container: wire_to_container(op.container),
            content: op.content,
        });
        counter = counter
            .checked_add(len)
            .ok_or_else(|| Error::Decode(format!("counter overflow for peer {peer}")))?;
    }
    if wire.lamport.checked_add(counter - wire.counter).is_none() {
        return Err(Error::Decode(format!(
            "lamport {} of change {}@{peer} overflows",
            wire.lamport, wire.counter
        )));
    }
    Ok(Change {
        id: OpId::new(peer, wire.counter),
        lamport: wire.lamport,
        deps: wire
            .deps
            .into_iter()
            .map(|(peer, counter)| OpId::new(peer, counter))
            .collect(),
        timestamp: wire.timestamp,
        ops,
    })
}

/// Serialize changes, in the order given, into a batch.
pub fn encode_changes<'a>(changes: impl IntoIterator<Item = &'a Change>) -> Result<Vec<u8>> {
    let batch = WireBatch {
        changes: changes.into_iter().map(change_to_wire).collect(),
    };
    let body = options()
        .serialize(&batch)
        .map_err(|e| Error::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse a batch.
///
/// A malformed payload fails outright. Per-peer counter gaps or overlaps inside the batch are
/// reported through `DecodedBatch::error` and only the affected peer's changes from the break
/// onward are dropped.
pub fn decode_changes(bytes: &[u8]) -> Result<DecodedBatch> {
    if bytes.len() < HEADER_LEN || bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::Decode("not a change batch".into()));
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(Error::Decode(format!("unsupported format version {version}")));
    }
    let batch: WireBatch = options()
        .deserialize(&bytes[HEADER_LEN..])
        .map_err(|e| Error::Decode(e.to_string()))?;

    let mut by_peer: BTreeMap<PeerId, Vec<Change>> = BTreeMap::new();
    for wire in batch.changes {
        let change = wire_to_change(wire)?;
        by_peer.entry(change.peer()).or_default().push(change);
    }

    let mut decoded = DecodedBatch::default();
    for (peer, mut changes) in by_peer {
        changes.sort_by_key(Change::ctr_start);
        let mut expected = changes[0].ctr_start();
        for change in changes {
            if change.ctr_start() != expected {
                decoded.error.get_or_insert(Error::CorruptVersion {
                    peer,
                    expected,
                    found: change.ctr_start(),
                });
                break;
            }
            expected = change.ctr_end();
            decoded.changes.push(change);
        }
    }
    Ok(decoded)
}
