//! Connection-resilient proxy for a remote watch service.
//!
//! When the watch service lives across a process or connection boundary, the
//! subscriber side keeps its own handle space: local handles stay stable for
//! the life of the subscription while remote handles are reissued on every
//! reconnect. Because replays are not deduplicated against in-flight events,
//! the change-event stream is at-least-once; receivers diff against their own
//! cache, so re-applying an identical status is a no-op.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::RepositoryId;
use crate::service::{WatchServer, WatchServiceError, WatcherHandle};

struct MultiplexState {
    next_local: u64,
    /// Everything ever watched and not yet unwatched, replayed on reconnect.
    repos: HashMap<WatcherHandle, RepositoryId>,
    /// Current remote handle per local handle; entries are missing while a
    /// reconnect is in progress or a replay failed.
    remotes: HashMap<WatcherHandle, WatcherHandle>,
}

/// Wraps a [`WatchServer`] and re-subscribes everything after a reconnect.
///
/// Implements [`WatchServer`] itself, so callers cannot tell a direct service
/// from a reconnecting proxy.
pub struct ReconnectingWatchServer<S> {
    server: S,
    state: Mutex<MultiplexState>,
}

impl<S: WatchServer> ReconnectingWatchServer<S> {
    pub fn new(server: S) -> Self {
        ReconnectingWatchServer {
            server,
            state: Mutex::new(MultiplexState {
                next_local: 1,
                repos: HashMap::new(),
                remotes: HashMap::new(),
            }),
        }
    }

    /// Called by the transport glue once a connection has been
    /// re-established. Replays every recorded subscription as a fresh remote
    /// watch; a failure for one repository does not block the others.
    pub fn reconnected(&self) {
        let subscriptions: Vec<(WatcherHandle, RepositoryId)> = {
            let state = self.state.lock().unwrap();
            state
                .repos
                .iter()
                .map(|(local, repo)| (*local, repo.clone()))
                .collect()
        };

        log::debug!("Replaying {} watch subscriptions", subscriptions.len());

        for (local, repo) in subscriptions {
            match self.server.watch_changes(&repo) {
                Ok(remote) => {
                    let mut state = self.state.lock().unwrap();
                    // The subscription may have been unwatched while the
                    // replay call was in flight.
                    if state.repos.contains_key(&local) {
                        state.remotes.insert(local, remote);
                    } else if let Err(err) = self.server.unwatch_changes(remote) {
                        log::warn!("Failed to drop stale replayed watch: {}", err);
                    }
                }
                Err(err) => {
                    log::warn!("Failed to replay watch for {}: {}", repo, err);
                    self.state.lock().unwrap().remotes.remove(&local);
                }
            }
        }
    }

    /// Number of recorded subscriptions, for diagnostics.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().repos.len()
    }
}

impl<S: WatchServer> WatchServer for ReconnectingWatchServer<S> {
    fn watch_changes(&self, repo: &RepositoryId) -> Result<WatcherHandle, WatchServiceError> {
        // Record before calling out: if the remote call fails, the entry
        // stays behind and self-heals on the next reconnect.
        let local = {
            let mut state = self.state.lock().unwrap();
            let local = WatcherHandle::from_raw(state.next_local);
            state.next_local += 1;
            state.repos.insert(local, repo.clone());
            local
        };

        let remote = self.server.watch_changes(repo)?;
        self.state.lock().unwrap().remotes.insert(local, remote);
        Ok(local)
    }

    fn unwatch_changes(&self, local: WatcherHandle) -> Result<(), WatchServiceError> {
        let remote = {
            let mut state = self.state.lock().unwrap();
            state.repos.remove(&local);
            state.remotes.remove(&local)
        };

        match remote {
            Some(remote) => self.server.unwatch_changes(remote),
            None => Err(WatchServiceError::UnknownWatcher(local)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn repo(path: &str) -> RepositoryId {
        RepositoryId::new(path)
    }

    /// Fake remote service that issues fresh handles per watch call and can
    /// be told to fail for specific repositories.
    #[derive(Default)]
    struct FakeServer {
        state: Mutex<FakeState>,
    }

    #[derive(Default)]
    struct FakeState {
        next_handle: u64,
        live: HashSet<WatcherHandle>,
        watched: Vec<RepositoryId>,
        failing: HashSet<RepositoryId>,
    }

    impl FakeServer {
        fn fail_for(&self, repo: &RepositoryId) {
            self.state.lock().unwrap().failing.insert(repo.clone());
        }

        fn live_handles(&self) -> HashSet<WatcherHandle> {
            self.state.lock().unwrap().live.clone()
        }

        fn watch_calls(&self) -> Vec<RepositoryId> {
            self.state.lock().unwrap().watched.clone()
        }
    }

    impl WatchServer for &FakeServer {
        fn watch_changes(&self, repo: &RepositoryId) -> Result<WatcherHandle, WatchServiceError> {
            let mut state = self.state.lock().unwrap();
            if state.failing.contains(repo) {
                return Err(WatchServiceError::Acquire(anyhow::anyhow!(
                    "connection refused"
                )));
            }
            state.next_handle += 1;
            let handle = WatcherHandle::from_raw(state.next_handle);
            state.live.insert(handle);
            state.watched.push(repo.clone());
            Ok(handle)
        }

        fn unwatch_changes(&self, handle: WatcherHandle) -> Result<(), WatchServiceError> {
            let mut state = self.state.lock().unwrap();
            if state.live.remove(&handle) {
                Ok(())
            } else {
                Err(WatchServiceError::UnknownWatcher(handle))
            }
        }
    }

    #[test]
    fn local_handles_survive_a_reconnect() {
        let server = FakeServer::default();
        let multiplexer = ReconnectingWatchServer::new(&server);

        let local = multiplexer.watch_changes(&repo("/repo")).unwrap();
        let remote_before = server.live_handles();

        // Simulated drop: the remote side forgets everything.
        server.state.lock().unwrap().live.clear();
        multiplexer.reconnected();

        let remote_after = server.live_handles();
        assert_eq!(remote_after.len(), 1);
        assert!(remote_before.is_disjoint(&remote_after));

        // The pre-disconnect handle still works without re-watching.
        multiplexer.unwatch_changes(local).unwrap();
        assert!(server.live_handles().is_empty());
        assert_eq!(multiplexer.subscription_count(), 0);
    }

    #[test]
    fn unwatch_with_unknown_handle_fails_loudly() {
        let server = FakeServer::default();
        let multiplexer = ReconnectingWatchServer::new(&server);

        let err = multiplexer
            .unwatch_changes(WatcherHandle::from_raw(99))
            .unwrap_err();
        assert!(matches!(err, WatchServiceError::UnknownWatcher(_)));
    }

    #[test]
    fn replay_failure_for_one_repository_does_not_block_others() {
        let server = FakeServer::default();
        let multiplexer = ReconnectingWatchServer::new(&server);

        let _broken = multiplexer.watch_changes(&repo("/broken")).unwrap();
        let healthy = multiplexer.watch_changes(&repo("/healthy")).unwrap();

        server.fail_for(&repo("/broken"));
        server.state.lock().unwrap().live.clear();
        multiplexer.reconnected();

        assert_eq!(server.live_handles().len(), 1);
        multiplexer.unwatch_changes(healthy).unwrap();
    }

    #[test]
    fn failed_watch_keeps_the_subscription_for_the_next_reconnect() {
        let server = FakeServer::default();
        let multiplexer = ReconnectingWatchServer::new(&server);

        server.fail_for(&repo("/repo"));
        assert!(multiplexer.watch_changes(&repo("/repo")).is_err());
        assert_eq!(multiplexer.subscription_count(), 1);

        // The repository comes back; the recorded subscription self-heals.
        server.state.lock().unwrap().failing.clear();
        multiplexer.reconnected();
        assert_eq!(server.live_handles().len(), 1);
    }

    #[test]
    fn reconnect_replays_every_subscription() {
        let server = FakeServer::default();
        let multiplexer = ReconnectingWatchServer::new(&server);

        for path in ["/a", "/b", "/c"] {
            multiplexer.watch_changes(&repo(path)).unwrap();
        }

        server.state.lock().unwrap().live.clear();
        multiplexer.reconnected();

        assert_eq!(server.live_handles().len(), 3);
        assert_eq!(server.watch_calls().len(), 6);
    }
}
