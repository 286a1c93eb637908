//! Serialization of mutating operations per repository.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::model::RepositoryId;
use crate::pool::WatcherPool;

/// Runs mutating operations one at a time per repository and chains a status
/// re-sync behind each of them.
///
/// The underlying process invocation layer already keeps git commands from
/// overlapping per working directory; the gate here exists because one
/// logical operation may span several invocations, and because the
/// operation → sync causality has to hold even when the operation fails.
pub struct RepositoryManager {
    pool: WatcherPool,
    gates: Mutex<HashMap<RepositoryId, Arc<Mutex<()>>>>,
}

impl RepositoryManager {
    pub fn new(pool: WatcherPool) -> Self {
        RepositoryManager {
            pool,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &WatcherPool {
        &self.pool
    }

    /// Runs `operation` while holding the repository's gate, then schedules a
    /// watcher sync and returns the operation's result unchanged.
    ///
    /// The sync is fire-and-forget relative to the caller: the return path
    /// never waits on a status query. It is scheduled even when the operation
    /// failed, since state may have partially changed.
    pub fn run<T, E>(
        &self,
        repo: &RepositoryId,
        operation: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let gate = {
            let mut gates = self.gates.lock().unwrap();
            Arc::clone(gates.entry(repo.clone()).or_default())
        };

        let result = {
            let _held = gate.lock().unwrap();
            operation()
        };

        match self.pool.acquire(repo) {
            // The queued sync survives this reference being dropped: watcher
            // teardown drains pending syncs before exiting.
            Ok(watcher) => watcher.schedule_sync(),
            Err(err) => {
                log::warn!("Could not sync {} after an operation: {:#}", repo, err);
            }
        }

        result
    }
}
