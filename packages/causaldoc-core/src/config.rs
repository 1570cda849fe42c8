use serde::{Deserialize, Serialize};

use crate::ids::PeerId;

/// Construction-time settings for a [`crate::Document`].
///
/// Deserializes with per-field defaults, so hosts can pass a partial JSON object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Peer id to start with. A random one is drawn when absent.
    pub peer: Option<PeerId>,
    /// Stamp committed changes with the wall-clock time in seconds.
    pub record_timestamp: bool,
}

impl Config {
    pub fn with_peer(mut self, peer: impl Into<PeerId>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    pub fn with_record_timestamp(mut self, record: bool) -> Self {
        self.record_timestamp = record;
        self
    }
}
