use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

use crate::{PathEvent, WatchBackend};

/// `WatchBackend` driven entirely by hand, useful for testing.
///
/// Events are injected through the paired [`ManualHandle`] and delivered only
/// when they fall under a watched root, mimicking how a real backend scopes
/// its reporting.
pub struct ManualBackend {
    watches: Arc<Mutex<HashSet<PathBuf>>>,
    event_receiver: Receiver<PathEvent>,
}

impl ManualBackend {
    pub fn new() -> (ManualBackend, ManualHandle) {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let watches = Arc::new(Mutex::new(HashSet::new()));

        let backend = ManualBackend {
            watches: Arc::clone(&watches),
            event_receiver: event_rx,
        };
        let handle = ManualHandle {
            watches,
            sender: event_tx,
        };

        (backend, handle)
    }
}

impl WatchBackend for ManualBackend {
    fn watch(&mut self, path: &Path) -> io::Result<()> {
        self.watches.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> io::Result<()> {
        self.watches.lock().unwrap().remove(path);
        Ok(())
    }

    fn event_receiver(&self) -> Receiver<PathEvent> {
        self.event_receiver.clone()
    }
}

/// Injection side of a [`ManualBackend`].
#[derive(Clone)]
pub struct ManualHandle {
    watches: Arc<Mutex<HashSet<PathBuf>>>,
    sender: Sender<PathEvent>,
}

impl ManualHandle {
    /// Inject an event. Events for paths outside every watched root are
    /// dropped, as a real backend would never have reported them. `Rescan` is
    /// always delivered.
    pub fn emit(&self, event: PathEvent) {
        let covered = match event.path() {
            Some(path) => {
                let watches = self.watches.lock().unwrap();
                path.ancestors().any(|ancestor| watches.contains(ancestor))
            }
            None => true,
        };

        if covered {
            let _ = self.sender.send(event);
        }
    }

    /// Number of currently watched roots.
    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap().len()
    }

    /// Whether `path` falls under some watched root.
    pub fn is_watched(&self, path: &Path) -> bool {
        let watches = self.watches.lock().unwrap();
        path.ancestors().any(|ancestor| watches.contains(ancestor))
    }
}
