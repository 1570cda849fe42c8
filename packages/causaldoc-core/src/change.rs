use serde::{Deserialize, Serialize};

use crate::ids::{ContainerId, ContainerType, Counter, Lamport, OpId, PeerId};
use crate::version::Frontiers;

/// Scalar values carried by content operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    String(String),
    Container(ContainerId),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::I64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Content mutation as recorded in the log.
///
/// The core only needs to know how many counters each mutation occupies and how to cut one in two;
/// what the mutation means for the container is up to the content layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpContent {
    /// Insert a run of characters. Occupies one counter per `char`.
    InsertText { pos: u32, text: String },
    /// Insert values into a sequence. Occupies one counter per value.
    InsertValues { pos: u32, values: Vec<Value> },
    /// Delete `len` elements starting at `pos`. Occupies one counter per deleted element.
    Delete { pos: u32, len: u32 },
    /// Set (`Some`) or clear (`None`) a map key.
    SetKey { key: String, value: Option<Value> },
    /// Create a child container named after this op's id.
    CreateContainer { kind: ContainerType },
}

impl OpContent {
    /// Counters this mutation occupies, or `None` when that does not fit a counter.
    pub fn checked_atom_len(&self) -> Option<u32> {
        match self {
            OpContent::InsertText { text, .. } => u32::try_from(text.chars().count()).ok(),
            OpContent::InsertValues { values, .. } => u32::try_from(values.len()).ok(),
            OpContent::Delete { len, .. } => Some(*len),
            OpContent::SetKey { .. } | OpContent::CreateContainer { .. } => Some(1),
        }
    }

    /// Counters this mutation occupies. Saturates at `u32::MAX`; ops are checked with
    /// [`OpContent::checked_atom_len`] before they enter a log.
    pub fn atom_len(&self) -> u32 {
        self.checked_atom_len().unwrap_or(u32::MAX)
    }

    /// The part of this mutation starting `offset` atoms in.
    fn suffix(&self, offset: u32) -> OpContent {
        match self {
            OpContent::InsertText { pos, text } => OpContent::InsertText {
                pos: pos + offset,
                text: text.chars().skip(offset as usize).collect(),
            },
            OpContent::InsertValues { pos, values } => OpContent::InsertValues {
                pos: pos + offset,
                values: values[offset as usize..].to_vec(),
            },
            // deleting the prefix shifts the remainder onto the same position
            OpContent::Delete { pos, len } => OpContent::Delete {
                pos: *pos,
                len: len - offset,
            },
            single => {
                debug_assert_eq!(offset, 0, "single-atom ops cannot be split");
                single.clone()
            }
        }
    }
}

/// A content operation embedded in a change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    pub counter: Counter,
    pub container: ContainerId,
    pub content: OpContent,
}

impl Op {
    pub fn atom_len(&self) -> u32 {
        self.content.atom_len()
    }

    pub fn ctr_end(&self) -> Counter {
        self.counter.saturating_add(self.atom_len())
    }

    /// Container created by this op, if it creates one.
    pub fn created_container(&self, peer: PeerId) -> Option<ContainerId> {
        match self.content {
            OpContent::CreateContainer { kind } => {
                Some(ContainerId::normal(OpId::new(peer, self.counter), kind))
            }
            _ => None,
        }
    }

    fn suffix_from(&self, counter: Counter) -> Op {
        let offset = counter - self.counter;
        Op {
            counter,
            container: self.container.clone(),
            content: self.content.suffix(offset),
        }
    }
}

/// Unit of causal granularity: a run of ops from one peer sharing one set of dependencies.
///
/// Spans counters `[id.counter, id.counter + len())`. Op `i` atoms into the change carries
/// lamport `lamport + i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub id: OpId,
    pub lamport: Lamport,
    /// Causal parents. The implicit local predecessor `(peer, counter - 1)` may be omitted.
    pub deps: Frontiers,
    /// Commit time in seconds since the Unix epoch; 0 when timestamps are not recorded.
    pub timestamp: i64,
    pub ops: Vec<Op>,
}

impl Change {
    pub fn peer(&self) -> PeerId {
        self.id.peer
    }

    pub fn ctr_start(&self) -> Counter {
        self.id.counter
    }

    pub fn ctr_end(&self) -> Counter {
        self.ops
            .last()
            .map(Op::ctr_end)
            .unwrap_or(self.id.counter)
    }

    pub fn len(&self) -> usize {
        (self.ctr_end() - self.ctr_start()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn id_last(&self) -> OpId {
        OpId::new(self.peer(), self.ctr_end().saturating_sub(1))
    }

    pub fn lamport_end(&self) -> Lamport {
        self.lamport + self.len() as Lamport
    }

    /// `lamport_end`, or `None` when the change's Lamport range does not fit.
    pub fn checked_lamport_end(&self) -> Option<Lamport> {
        Lamport::try_from(self.len())
            .ok()
            .and_then(|len| self.lamport.checked_add(len))
    }

    pub fn contains(&self, id: OpId) -> bool {
        id.peer == self.peer() && id.counter >= self.ctr_start() && id.counter < self.ctr_end()
    }

    pub fn lamport_of(&self, counter: Counter) -> Lamport {
        self.lamport + (counter - self.ctr_start())
    }

    /// Every op this change depends on: explicit deps plus the local predecessor.
    pub fn parents(&self) -> impl Iterator<Item = OpId> + '_ {
        self.deps.iter().copied().chain(self.id.prev())
    }

    /// The suffix of this change starting at `counter`.
    ///
    /// The suffix depends only on the op right before it, which is always its own peer's.
    pub fn slice_from(&self, counter: Counter) -> Change {
        if counter <= self.ctr_start() {
            return self.clone();
        }
        let ops = self
            .ops
            .iter()
            .filter(|op| op.ctr_end() > counter)
            .map(|op| {
                if op.counter < counter {
                    op.suffix_from(counter)
                } else {
                    op.clone()
                }
            })
            .collect();
        Change {
            id: OpId::new(self.peer(), counter),
            lamport: self.lamport_of(counter),
            deps: Frontiers::from_id(OpId::new(self.peer(), counter - 1)),
            timestamp: self.timestamp,
            ops,
        }
    }

    pub fn meta(&self) -> ChangeMeta {
        ChangeMeta {
            peer: self.peer(),
            counter: self.ctr_start(),
            length: self.ctr_end() - self.ctr_start(),
            lamport: self.lamport,
            deps: self.deps.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Introspection view of a change, without its ops.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMeta {
    pub peer: PeerId,
    pub counter: Counter,
    pub length: u32,
    pub lamport: Lamport,
    pub deps: Frontiers,
    pub timestamp: i64,
}
