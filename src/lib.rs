pub mod blame;
pub mod cli;
pub mod config;
pub mod events;
pub mod exec;
pub mod logging;
pub mod manager;
pub mod model;
pub mod pool;
pub mod remote;
pub mod service;
pub mod status;
pub mod watcher;

mod session_id;

pub use events::{EventBroadcaster, StatusChangeEvent};
pub use manager::RepositoryManager;
pub use model::{RepositoryId, WorkingDirectoryStatus};
pub use pool::{WatcherFactory, WatcherPool};
pub use remote::ReconnectingWatchServer;
pub use service::{WatchServer, WatchService, WatcherHandle};
pub use session_id::SessionId;
pub use watcher::RepositoryWatcher;
