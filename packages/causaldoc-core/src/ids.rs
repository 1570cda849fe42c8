use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lamport timestamp used for ordering operations.
pub type Lamport = u32;

/// Per-peer operation counter. Counters of one peer form the gap-free range `0..n`.
pub type Counter = u32;

/// Unique identifier for a replica.
///
/// Crosses the API boundary as a decimal string so hosts without 64-bit integers keep full precision.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerId(pub u64);

impl PeerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(PeerId)
            .map_err(|e| Error::Decode(format!("invalid peer id {s:?}: {e}")))
    }
}

impl From<u64> for PeerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<PeerId> for String {
    fn from(peer: PeerId) -> Self {
        peer.to_string()
    }
}

impl TryFrom<String> for PeerId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Globally unique identifier for an operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OpId {
    pub peer: PeerId,
    pub counter: Counter,
}

impl OpId {
    pub fn new(peer: impl Into<PeerId>, counter: Counter) -> Self {
        Self {
            peer: peer.into(),
            counter,
        }
    }

    /// The op issued by the same peer right before this one.
    pub fn prev(self) -> Option<OpId> {
        self.counter.checked_sub(1).map(|counter| OpId {
            peer: self.peer,
            counter,
        })
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.peer)
    }
}

/// Half-open counter range `[start, end)` of a single peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IdSpan {
    pub peer: PeerId,
    pub start: Counter,
    pub end: Counter,
}

impl IdSpan {
    pub fn new(peer: impl Into<PeerId>, start: Counter, end: Counter) -> Self {
        Self {
            peer: peer.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, id: OpId) -> bool {
        id.peer == self.peer && id.counter >= self.start && id.counter < self.end
    }
}

/// Kinds of content structure a container id can name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ContainerType {
    Text,
    List,
    Map,
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerType::Text => "Text",
            ContainerType::List => "List",
            ContainerType::Map => "Map",
        };
        f.write_str(name)
    }
}

impl FromStr for ContainerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Text" => Ok(ContainerType::Text),
            "List" => Ok(ContainerType::List),
            "Map" => Ok(ContainerType::Map),
            other => Err(Error::Decode(format!("unknown container type {other:?}"))),
        }
    }
}

/// Identifies a content structure.
///
/// Root containers are named by the application. Containers created at runtime are named by the
/// op that created them, rendered as `<counter>:<Type>@<peer>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ContainerId {
    Root { name: String, kind: ContainerType },
    Normal { id: OpId, kind: ContainerType },
}

impl ContainerId {
    pub fn root(name: impl Into<String>, kind: ContainerType) -> Self {
        ContainerId::Root {
            name: name.into(),
            kind,
        }
    }

    pub fn normal(id: OpId, kind: ContainerType) -> Self {
        ContainerId::Normal { id, kind }
    }

    pub fn kind(&self) -> ContainerType {
        match self {
            ContainerId::Root { kind, .. } | ContainerId::Normal { kind, .. } => *kind,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ContainerId::Root { .. })
    }

    /// Parse the `<counter>:<Type>@<peer>` form. Root names are resolved by the registry instead.
    pub fn parse_normal(s: &str) -> Result<Self> {
        let malformed = || Error::Decode(format!("malformed container id {s:?}"));
        let (counter, rest) = s.split_once(':').ok_or_else(malformed)?;
        let (kind, peer) = rest.split_once('@').ok_or_else(malformed)?;
        let counter = counter.parse::<Counter>().map_err(|_| malformed())?;
        Ok(ContainerId::Normal {
            id: OpId::new(peer.parse::<PeerId>()?, counter),
            kind: kind.parse()?,
        })
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerId::Root { name, .. } => f.write_str(name),
            ContainerId::Normal { id, kind } => write!(f, "{}:{}@{}", id.counter, kind, id.peer),
        }
    }
}
