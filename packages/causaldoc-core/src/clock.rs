use crate::ids::Lamport;

/// Lamport clock owned by a single document.
///
/// Tracks the next timestamp past everything the replica has seen, local or imported.
#[derive(Clone, Debug, Default)]
pub struct LamportClock {
    next: Lamport,
}

impl LamportClock {
    /// The next Lamport timestamp past every observed op.
    pub fn now(&self) -> Lamport {
        self.next
    }

    /// Record that ops up to (but excluding) `end` exist.
    pub fn observe(&mut self, end: Lamport) {
        self.next = self.next.max(end);
    }

    /// Lamport for a new change whose parents carry the given timestamps.
    ///
    /// A change without parents starts at 0.
    pub fn assign(parents: impl IntoIterator<Item = Lamport>) -> Lamport {
        parents
            .into_iter()
            .map(|lamport| lamport.saturating_add(1))
            .max()
            .unwrap_or(0)
    }
}
