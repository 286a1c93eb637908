/*!
Recursive filesystem change watching with a configurable backend.

watchfs only reports that paths changed; it deliberately has no read/write
surface. Its primary consumer is vigil, which answers every event by asking
the version-control tool for fresh truth rather than trusting the event
payload.

## Backends
* `StdBackend`, which uses the `notify` crate behind a short debounce
* `ManualBackend`, which lets tests inject events by hand
*/

mod manual_backend;
mod std_backend;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use manual_backend::{ManualBackend, ManualHandle};
pub use std_backend::StdBackend;

mod sealed {
    use super::*;

    /// Sealing trait for WatchBackend.
    pub trait Sealed {}

    impl Sealed for StdBackend {}
    impl Sealed for ManualBackend {}
}

/// A filesystem change observed under a watched root.
///
/// `Rescan` means the backend lost track of some events (for example, the
/// platform watcher overflowed) and consumers should treat everything under
/// their watched roots as potentially changed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PathEvent {
    Create(PathBuf),
    Write(PathBuf),
    Remove(PathBuf),
    Rescan,
}

impl PathEvent {
    /// The path this event refers to, if it refers to one at all.
    pub fn path(&self) -> Option<&Path> {
        match self {
            PathEvent::Create(path) | PathEvent::Write(path) | PathEvent::Remove(path) => {
                Some(path)
            }
            PathEvent::Rescan => None,
        }
    }
}

/// Backend that can be used to create a `Watcher`.
///
/// This trait is sealed and cannot be implemented outside this crate.
pub trait WatchBackend: sealed::Sealed + Send + 'static {
    fn watch(&mut self, path: &Path) -> io::Result<()>;
    fn unwatch(&mut self, path: &Path) -> io::Result<()>;
    fn event_receiver(&self) -> crossbeam_channel::Receiver<PathEvent>;
}

struct WatcherInner {
    backend: Box<dyn WatchBackend>,
}

/// A filesystem watcher with a configurable backend.
///
/// All operations take a lock on the internal backend.
pub struct Watcher {
    inner: Mutex<WatcherInner>,
}

impl Watcher {
    /// Creates a new `Watcher` with the default backend, `StdBackend`.
    pub fn new_default() -> io::Result<Self> {
        Ok(Self::new(StdBackend::new()?))
    }

    /// Creates a new `Watcher` with the given backend.
    pub fn new<B: WatchBackend>(backend: B) -> Self {
        Self {
            inner: Mutex::new(WatcherInner {
                backend: Box::new(backend),
            }),
        }
    }

    /// Begin watching a path, recursively.
    #[inline]
    pub fn watch<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        self.inner.lock().unwrap().backend.watch(path)
    }

    /// Stop watching a path.
    #[inline]
    pub fn unwatch<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        self.inner.lock().unwrap().backend.unwatch(path)
    }

    /// Retrieve a handle to the event receiver for this `Watcher`.
    #[inline]
    pub fn event_receiver(&self) -> crossbeam_channel::Receiver<PathEvent> {
        self.inner.lock().unwrap().backend.event_receiver()
    }
}
