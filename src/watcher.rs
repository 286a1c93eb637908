//! Per-repository change watching.
//!
//! Each [`RepositoryWatcher`] owns a job thread that funnels every status
//! recompute through one path: filesystem events arm a single-slot debounce
//! deadline, callers rendezvous through [`sync`](RepositoryWatcher::sync), and
//! the serializer fires [`schedule_sync`](RepositoryWatcher::schedule_sync)
//! after mutating operations. The thread diffs each fresh snapshot against the
//! last one and broadcasts an event only when something actually changed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvError, Sender};
use jod_thread::JoinHandle;

use crate::events::{EventBroadcaster, StatusChangeEvent};
use crate::model::{RepositoryId, WorkingDirectoryStatus};
use crate::status::StatusSource;

/// Default window for coalescing filesystem event bursts before recomputing.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

struct SyncRequest {
    /// Present for rendezvous syncs; the job thread signals it once the
    /// recompute is done.
    reply: Option<Sender<()>>,
}

/// Watches one repository and keeps its live status snapshot.
pub struct RepositoryWatcher {
    repo: RepositoryId,
    sync_sender: Sender<SyncRequest>,

    /// Signaled before dropping so the job thread leaves its loop. Without it
    /// we would hang forever joining the thread.
    shutdown_sender: Sender<()>,

    install: Arc<Mutex<WatchInstall>>,
    context: Arc<SyncContext>,
    disposed: AtomicBool,

    /// Joined on drop; it might block briefly while the thread drains queued
    /// sync requests.
    #[allow(unused)]
    job_thread: JoinHandle<Result<(), RecvError>>,
}

impl RepositoryWatcher {
    /// Spins up the watcher's job thread. The filesystem hook is not
    /// installed until the first [`watch`](Self::watch) call.
    pub fn start(
        repo: RepositoryId,
        source: Arc<dyn StatusSource>,
        broadcaster: EventBroadcaster,
        fs: watchfs::Watcher,
        debounce: Duration,
    ) -> Self {
        let (sync_sender, sync_receiver) = crossbeam_channel::unbounded();
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);
        let fs_events = fs.event_receiver();

        let context = Arc::new(SyncContext {
            repo: repo.clone(),
            source,
            broadcaster,
            last_status: Mutex::new(None),
        });

        let thread_context = Arc::clone(&context);
        let job_thread = jod_thread::Builder::new()
            .name("RepositoryWatcher thread".to_owned())
            .spawn(move || {
                log::trace!("RepositoryWatcher thread started");
                run_job_loop(
                    thread_context,
                    fs_events,
                    sync_receiver,
                    shutdown_receiver,
                    debounce,
                )
            })
            .expect("Could not start RepositoryWatcher thread");

        Self {
            repo,
            sync_sender,
            shutdown_sender,
            install: Arc::new(Mutex::new(WatchInstall {
                fs: Arc::new(fs),
                installs: 0,
            })),
            context,
            disposed: AtomicBool::new(false),
            job_thread,
        }
    }

    pub fn repo(&self) -> &RepositoryId {
        &self.repo
    }

    /// Installs the filesystem hook and returns a guard that removes it when
    /// dropped. Many guards may be live at once; only the first installs the
    /// underlying watch and only the last removes it.
    pub fn watch(&self) -> anyhow::Result<WatchGuard> {
        if self.disposed.load(Ordering::SeqCst) {
            anyhow::bail!("cannot watch {}: the watcher was disposed", self.repo);
        }

        let mut install = self.install.lock().unwrap();
        if install.installs == 0 {
            install.fs.watch(self.repo.root())?;
        }
        install.installs += 1;

        Ok(WatchGuard {
            root: self.repo.root().to_path_buf(),
            install: Arc::clone(&self.install),
        })
    }

    /// Recomputes status now, waiting for the recompute to finish.
    ///
    /// An equal snapshot produces no event; the cached status is refreshed
    /// either way.
    pub fn sync(&self) {
        let (reply_sender, reply_receiver) = crossbeam_channel::bounded(1);
        let request = SyncRequest {
            reply: Some(reply_sender),
        };

        if self.sync_sender.send(request).is_err() {
            log::warn!("Sync requested for {} after its watcher was disposed", self.repo);
            return;
        }

        let _ = reply_receiver.recv();
    }

    /// Queues a recompute without waiting for it, for callers whose return
    /// path must not stall on a status query.
    pub fn schedule_sync(&self) {
        let request = SyncRequest { reply: None };
        if self.sync_sender.send(request).is_err() {
            log::warn!("Sync scheduled for {} after its watcher was disposed", self.repo);
        }
    }

    /// The most recently computed snapshot, if any recompute has run yet.
    pub fn last_status(&self) -> Option<WorkingDirectoryStatus> {
        self.context.last_status.lock().unwrap().clone()
    }

    /// Shuts the job thread down. Queued sync requests are drained first, so
    /// a sync already in flight still completes.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_sender.try_send(());
    }
}

impl Drop for RepositoryWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct WatchInstall {
    fs: Arc<watchfs::Watcher>,
    installs: usize,
}

/// Removes the filesystem hook on drop, once no other guard remains.
pub struct WatchGuard {
    root: PathBuf,
    install: Arc<Mutex<WatchInstall>>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let mut install = self.install.lock().unwrap();
        install.installs -= 1;
        if install.installs == 0 {
            if let Err(err) = install.fs.unwatch(&self.root) {
                log::warn!("Failed to unwatch {}: {}", self.root.display(), err);
            }
        }
    }
}

/// State shared between the watcher handle and its job thread.
///
/// `last_status` is only ever written from `recompute`, and `recompute` only
/// ever runs on the job thread, so caller-triggered and debounce-triggered
/// recomputes cannot race.
struct SyncContext {
    repo: RepositoryId,
    source: Arc<dyn StatusSource>,
    broadcaster: EventBroadcaster,
    last_status: Mutex<Option<WorkingDirectoryStatus>>,
}

impl SyncContext {
    fn recompute(&self) {
        let new_status = match self.source.query(&self.repo) {
            Ok(status) => status,
            Err(err) => {
                // A transient failure must not masquerade as "the repository
                // is now empty"; keep the cached snapshot and emit nothing.
                log::warn!("Status recompute failed for {}: {:#}", self.repo, err);
                return;
            }
        };

        let old_status = {
            let mut last = self.last_status.lock().unwrap();
            last.replace(new_status.clone())
        };

        if old_status.as_ref() != Some(&new_status) {
            log::debug!(
                "Status changed for {} ({} changes)",
                self.repo,
                new_status.changes.len()
            );
            self.broadcaster.broadcast(StatusChangeEvent {
                repository: self.repo.clone(),
                status: new_status,
                old_status,
            });
        }
    }
}

fn run_job_loop(
    context: Arc<SyncContext>,
    fs_events: Receiver<watchfs::PathEvent>,
    sync_receiver: Receiver<SyncRequest>,
    shutdown_receiver: Receiver<()>,
    debounce: Duration,
) -> Result<(), RecvError> {
    // Single-slot debounce: the first filesystem event arms the deadline,
    // later events inside the window are coalesced into the same recompute.
    let mut pending_deadline: Option<Instant> = None;

    loop {
        let tick = match pending_deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_millis(500),
        };

        select! {
            recv(fs_events) -> event => {
                match event {
                    Ok(event) => {
                        log::trace!("Filesystem event for {}: {:?}", context.repo, event);
                        if pending_deadline.is_none() {
                            pending_deadline = Some(Instant::now() + debounce);
                        }
                    }
                    // The backend is gone; nothing left to watch.
                    Err(_) => return Ok(()),
                }
            },
            recv(sync_receiver) -> request => {
                let request = request?;
                context.recompute();
                if let Some(reply) = request.reply {
                    let _ = reply.send(());
                }
            },
            recv(shutdown_receiver) -> _ => {
                log::trace!("RepositoryWatcher shutdown signal received...");
                while let Ok(request) = sync_receiver.try_recv() {
                    context.recompute();
                    if let Some(reply) = request.reply {
                        let _ = reply.send(());
                    }
                }
                return Ok(());
            },
            default(tick) => {
                if let Some(deadline) = pending_deadline {
                    if Instant::now() >= deadline {
                        pending_deadline = None;
                        context.recompute();
                    }
                }
            },
        }
    }
}
