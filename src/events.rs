//! Fan-out of status change events to subscribers.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::model::{RepositoryId, WorkingDirectoryStatus};

/// Emitted when a repository's status snapshot actually changed.
///
/// Delivery is at-least-once; a snapshot equal to the previous one is never
/// delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeEvent {
    pub repository: RepositoryId,
    pub status: WorkingDirectoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_status: Option<WorkingDirectoryStatus>,
}

/// Clones each broadcast event out to every live subscriber.
///
/// All watchers created by one pool share a single broadcaster; events carry
/// the repository id so subscribers can tell them apart.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    senders: Arc<Mutex<Vec<Sender<StatusChangeEvent>>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<StatusChangeEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.senders.lock().unwrap().push(sender);
        receiver
    }

    pub fn broadcast(&self, event: StatusChangeEvent) {
        let mut senders = self.senders.lock().unwrap();
        // Dropping a receiver is how subscribers unsubscribe; prune those
        // senders as we go.
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}
