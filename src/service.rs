//! The watch service facade: numbered watch handles over the reference pool.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::StatusChangeEvent;
use crate::model::RepositoryId;
use crate::pool::{WatcherPool, WatcherRef};
use crate::session_id::SessionId;
use crate::watcher::WatchGuard;

/// Opaque handle identifying one active watch registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatcherHandle(u64);

impl WatcherHandle {
    /// Reconstructs a handle received over a transport boundary.
    pub fn from_raw(value: u64) -> Self {
        WatcherHandle(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum WatchServiceError {
    /// Unrecognized handles fail loudly; silently ignoring one would mask a
    /// logic bug in the caller.
    #[error("unknown watcher handle {0}")]
    UnknownWatcher(WatcherHandle),

    #[error(transparent)]
    Acquire(#[from] anyhow::Error),
}

/// The acquire/release surface a subscriber talks to, whether directly or
/// through a reconnecting proxy.
pub trait WatchServer: Send + Sync {
    fn watch_changes(&self, repo: &RepositoryId) -> Result<WatcherHandle, WatchServiceError>;
    fn unwatch_changes(&self, handle: WatcherHandle) -> Result<(), WatchServiceError>;
}

/// One active registration. Field order matters: the watch hook comes out
/// before the pool reference is released.
struct ActiveWatch {
    repo: RepositoryId,
    _watch: WatchGuard,
    _reference: WatcherRef,
}

struct Registry {
    next_handle: u64,
    active: HashMap<WatcherHandle, ActiveWatch>,
}

/// Hands out watch handles backed by the shared watcher pool.
pub struct WatchService {
    session_id: SessionId,
    pool: WatcherPool,
    registry: Mutex<Registry>,
}

impl WatchService {
    pub fn new(pool: WatcherPool) -> Self {
        let session_id = SessionId::new();
        log::debug!("Watch service started (session {})", session_id);

        WatchService {
            session_id,
            pool,
            registry: Mutex::new(Registry {
                next_handle: 1,
                active: HashMap::new(),
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Stream of status change events for every watched repository.
    pub fn subscribe(&self) -> Receiver<StatusChangeEvent> {
        self.pool.broadcaster().subscribe()
    }

    /// Number of currently registered watches, for diagnostics.
    pub fn active_watch_count(&self) -> usize {
        self.registry.lock().unwrap().active.len()
    }
}

impl WatchServer for WatchService {
    fn watch_changes(&self, repo: &RepositoryId) -> Result<WatcherHandle, WatchServiceError> {
        let reference = self.pool.acquire(repo)?;
        let watch = reference.watch()?;

        let mut registry = self.registry.lock().unwrap();
        let handle = WatcherHandle(registry.next_handle);
        registry.next_handle += 1;
        registry.active.insert(
            handle,
            ActiveWatch {
                repo: repo.clone(),
                _watch: watch,
                _reference: reference,
            },
        );

        log::debug!("Watching {} as handle {}", repo, handle);
        Ok(handle)
    }

    fn unwatch_changes(&self, handle: WatcherHandle) -> Result<(), WatchServiceError> {
        let removed = self.registry.lock().unwrap().active.remove(&handle);

        match removed {
            Some(active) => {
                log::debug!("Unwatching {} (handle {})", active.repo, handle);
                drop(active);
                Ok(())
            }
            None => Err(WatchServiceError::UnknownWatcher(handle)),
        }
    }
}
