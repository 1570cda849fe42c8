use thiserror::Error;

use crate::ids::{Counter, Lamport, OpId, PeerId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("dependency {0} is not present in the change log")]
    DanglingDependency(OpId),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("change {id} carries lamport {lamport}, expected at least {expected}")]
    InvalidLamport {
        id: OpId,
        lamport: Lamport,
        expected: Lamport,
    },
    #[error("counters for peer {peer} are not contiguous: expected {expected}, found {found}")]
    CorruptVersion {
        peer: PeerId,
        expected: Counter,
        found: Counter,
    },
    #[error("versions are concurrent")]
    Concurrent,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}
