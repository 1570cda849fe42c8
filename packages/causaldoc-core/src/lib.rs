#![forbid(unsafe_code)]
//! Causal version engine for replicated documents.
//! Every op carries a `(peer, counter)` id and a Lamport timestamp; ops are grouped into
//! append-only changes whose history is summarized by version vectors and frontiers. Replicas
//! converge by exchanging encoded change batches, buffering whatever arrives out of causal order.

pub mod change;
pub mod clock;
pub mod config;
pub mod doc;
pub mod encoding;
pub mod error;
pub mod event;
pub mod ids;
pub mod oplog;
pub mod registry;
pub mod version;

pub use change::{Change, ChangeMeta, Op, OpContent, Value};
pub use clock::LamportClock;
pub use config::Config;
pub use doc::Document;
pub use encoding::{decode_changes, encode_changes, DecodedBatch};
pub use error::{Error, Result};
pub use event::{EventHandler, SubscriptionId, VersionEvent};
pub use ids::{ContainerId, ContainerType, Counter, IdSpan, Lamport, OpId, PeerId};
pub use oplog::{ImportStatus, OpLog};
pub use registry::{ContainerRegistry, Handler, ListHandler, MapHandler, TextHandler};
pub use version::{CausalOrder, Frontiers, VersionVector};
