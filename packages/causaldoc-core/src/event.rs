use std::fmt;

use crate::ids::ContainerId;
use crate::version::Frontiers;

pub type SubscriptionId = u32;

/// Emitted after a commit or an import changed the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionEvent {
    pub old_version: Frontiers,
    pub new_version: Frontiers,
    /// `true` for local commits, `false` for imports.
    pub local: bool,
    /// Label passed to `Document::commit_with`.
    pub origin: Option<String>,
    /// Containers touched by the new changes, deduplicated and sorted.
    pub containers: Vec<ContainerId>,
}

pub type EventHandler = Box<dyn FnMut(&VersionEvent) + Send>;

struct Observer {
    handler: EventHandler,
    container: Option<ContainerId>,
    /// Dropped after the first event it receives.
    once: bool,
}

impl Observer {
    fn wants(&self, event: &VersionEvent) -> bool {
        match &self.container {
            None => true,
            Some(id) => event.containers.binary_search(id).is_ok(),
        }
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    next_id: SubscriptionId,
    entries: Vec<(SubscriptionId, Observer)>,
}

impl Observers {
    pub(crate) fn subscribe(
        &mut self,
        handler: EventHandler,
        container: Option<ContainerId>,
        once: bool,
    ) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((
            id,
            Observer {
                handler,
                container,
                once,
            },
        ));
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sub, _)| *sub != id);
        self.entries.len() != before
    }

    pub(crate) fn emit(&mut self, event: &VersionEvent) {
        self.entries.retain_mut(|(_, observer)| {
            if !observer.wants(event) {
                return true;
            }
            (observer.handler)(event);
            !observer.once
        });
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("subscriptions", &self.entries.len())
            .finish()
    }
}
