use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use notify::RecursiveMode;
use notify_debouncer_full::{
    new_debouncer,
    notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode},
    DebounceEventResult, Debouncer, RecommendedCache,
};

use crate::{PathEvent, WatchBackend};

/// `WatchBackend` that uses the `notify` crate behind a short debounce.
pub struct StdBackend {
    debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
    event_receiver: Receiver<PathEvent>,
    watches: HashSet<PathBuf>,
}

impl StdBackend {
    pub fn new() -> io::Result<StdBackend> {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let debouncer = Self::create_debouncer(event_tx)?;

        Ok(Self {
            debouncer,
            event_receiver: event_rx,
            watches: HashSet::new(),
        })
    }

    fn create_debouncer(
        event_tx: Sender<PathEvent>,
    ) -> io::Result<Debouncer<notify::RecommendedWatcher, RecommendedCache>> {
        // 50ms tames write bursts without making single-file edits feel slow.
        let debounce_timeout = Duration::from_millis(50);

        new_debouncer(
            debounce_timeout,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for path_event in Self::convert_event(&event.event) {
                            if event_tx.send(path_event).is_err() {
                                // Receiver gone; the owning watcher was dropped.
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        if error.paths.is_empty() {
                            // The platform watcher lost events. Consumers
                            // re-derive state from the filesystem, so a rescan
                            // marker through the normal stream is enough.
                            log::warn!(
                                "File watcher requested rescan, some events may have been missed"
                            );
                            if event_tx.send(PathEvent::Rescan).is_err() {
                                return;
                            }
                        } else {
                            log::warn!(
                                "File watcher error: {:?} (path: {:?})",
                                error.kind,
                                error.paths.first()
                            );
                        }
                    }
                }
            },
        )
        .map_err(|err| io::Error::other(format!("{:?}", err)))
    }

    /// Convert a notify event to our PathEvent(s)
    fn convert_event(event: &notify::Event) -> Vec<PathEvent> {
        let mut path_events = Vec::new();

        match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Folder)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Create(CreateKind::Other) => {
                for path in &event.paths {
                    path_events.push(PathEvent::Create(path.clone()));
                }
            }

            EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Other) => {
                for path in &event.paths {
                    path_events.push(PathEvent::Write(path.clone()));
                }
            }

            // Metadata changes don't alter content hashes or status output.
            EventKind::Modify(ModifyKind::Metadata(_)) => {}

            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // Both paths present: old path at [0], new path at [1]
                if event.paths.len() >= 2 {
                    path_events.push(PathEvent::Remove(event.paths[0].clone()));
                    path_events.push(PathEvent::Create(event.paths[1].clone()));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    path_events.push(PathEvent::Remove(path.clone()));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    path_events.push(PathEvent::Create(path.clone()));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Any))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Other)) => {
                // Ambiguous rename - treat as modification
                for path in &event.paths {
                    path_events.push(PathEvent::Write(path.clone()));
                }
            }

            EventKind::Remove(RemoveKind::File)
            | EventKind::Remove(RemoveKind::Folder)
            | EventKind::Remove(RemoveKind::Any)
            | EventKind::Remove(RemoveKind::Other) => {
                for path in &event.paths {
                    path_events.push(PathEvent::Remove(path.clone()));
                }
            }

            EventKind::Access(_) => {}

            EventKind::Other | EventKind::Any => {
                for path in &event.paths {
                    path_events.push(PathEvent::Write(path.clone()));
                }
            }
        }

        path_events
    }
}

impl WatchBackend for StdBackend {
    fn watch(&mut self, path: &Path) -> io::Result<()> {
        if self.watches.contains(path)
            || path
                .ancestors()
                .any(|ancestor| self.watches.contains(ancestor))
        {
            Ok(())
        } else {
            // Only add to watches AFTER the watch succeeds, so a failed watch
            // doesn't permanently mark the path as "watched".
            match self.debouncer.watch(path, RecursiveMode::Recursive) {
                Ok(()) => {
                    log::info!("Watching path: {}", path.display());
                    self.watches.insert(path.to_path_buf());
                    Ok(())
                }
                Err(err) => {
                    log::warn!("Failed to watch path {}: {:?}", path.display(), err);
                    Err(io::Error::other(format!("{:?}", err)))
                }
            }
        }
    }

    fn unwatch(&mut self, path: &Path) -> io::Result<()> {
        match self.debouncer.unwatch(path) {
            Ok(()) => {
                log::info!("Unwatched path: {}", path.display());
                self.watches.remove(path);
                Ok(())
            }
            Err(err) => {
                // Common when a parent directory holds the actual watch; keep
                // our tracking set consistent and don't propagate.
                if matches!(
                    err.kind,
                    notify::ErrorKind::WatchNotFound | notify::ErrorKind::PathNotFound
                ) {
                    log::debug!(
                        "Path was not directly watched (likely covered by parent): {}",
                        path.display()
                    );
                    self.watches.remove(path);
                    Ok(())
                } else {
                    log::warn!("Failed to unwatch path {}: {:?}", path.display(), err);
                    Err(io::Error::other(format!("{:?}", err)))
                }
            }
        }
    }

    fn event_receiver(&self) -> Receiver<PathEvent> {
        self.event_receiver.clone()
    }
}
