//! Reference counting of shared [`RepositoryWatcher`] instances.
//!
//! Many logical subscribers to the same repository share one physical watch:
//! the pool keys watchers by repository id and tears one down only when its
//! last reference is released.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::events::EventBroadcaster;
use crate::model::RepositoryId;
use crate::watcher::RepositoryWatcher;

/// Constructs a watcher on the 0→1 acquire. Injected so tests can count
/// constructions and hand back fakes.
pub type WatcherFactory =
    Box<dyn Fn(&RepositoryId) -> anyhow::Result<RepositoryWatcher> + Send + Sync>;

struct PoolEntry {
    watcher: Arc<RepositoryWatcher>,
    refcount: usize,
}

struct PoolInner {
    factory: WatcherFactory,
    broadcaster: EventBroadcaster,
    entries: Mutex<HashMap<RepositoryId, PoolEntry>>,
}

/// Keyed cache of reference-counted watchers. Cheap to clone; all clones
/// share the same cache.
#[derive(Clone)]
pub struct WatcherPool {
    inner: Arc<PoolInner>,
}

impl WatcherPool {
    pub fn new(broadcaster: EventBroadcaster, factory: WatcherFactory) -> Self {
        WatcherPool {
            inner: Arc::new(PoolInner {
                factory,
                broadcaster,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns a counted reference to the repository's watcher, constructing
    /// it on first acquire. Every acquire must be balanced by dropping the
    /// returned reference; the pool never evicts on its own.
    pub fn acquire(&self, repo: &RepositoryId) -> anyhow::Result<WatcherRef> {
        let mut entries = self.inner.entries.lock().unwrap();

        let watcher = match entries.get_mut(repo) {
            Some(entry) => {
                entry.refcount += 1;
                Arc::clone(&entry.watcher)
            }
            None => {
                let watcher = Arc::new((self.inner.factory)(repo)?);
                entries.insert(
                    repo.clone(),
                    PoolEntry {
                        watcher: Arc::clone(&watcher),
                        refcount: 1,
                    },
                );
                log::debug!("Created watcher for {}", repo);
                watcher
            }
        };

        Ok(WatcherRef {
            repo: repo.clone(),
            watcher,
            pool: self.clone(),
        })
    }

    /// Broadcaster shared by every watcher this pool creates.
    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.inner.broadcaster
    }

    /// Number of live watcher instances, for diagnostics.
    pub fn watcher_count(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    fn release(&self, repo: &RepositoryId) {
        let evicted = {
            let mut entries = self.inner.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(repo) else {
                log::error!("Released a watcher reference for untracked {}", repo);
                return;
            };

            entry.refcount -= 1;
            if entry.refcount == 0 {
                entries.remove(repo)
            } else {
                None
            }
        };

        // The watcher joins its job thread when dropped; do that outside the
        // cache lock.
        if let Some(entry) = evicted {
            log::debug!("Tearing down watcher for {}", repo);
            entry.watcher.dispose();
            drop(entry);
        }
    }
}

/// Counted reference to a shared watcher, released on drop.
pub struct WatcherRef {
    repo: RepositoryId,
    watcher: Arc<RepositoryWatcher>,
    pool: WatcherPool,
}

impl Deref for WatcherRef {
    type Target = RepositoryWatcher;

    fn deref(&self) -> &RepositoryWatcher {
        &self.watcher
    }
}

impl Drop for WatcherRef {
    fn drop(&mut self) {
        self.pool.release(&self.repo);
    }
}
