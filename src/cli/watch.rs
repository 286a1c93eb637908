use std::{
    io::{stdout, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::Parser;

use crate::{
    config::Settings,
    events::EventBroadcaster,
    exec::{self, GitVersion},
    pool::{WatcherFactory, WatcherPool},
    service::{WatchServer, WatchService},
    status::{GitStatusSource, StatusSource, DEFAULT_STATUS_LIMIT},
    watcher::{RepositoryWatcher, DEFAULT_DEBOUNCE},
};

use super::resolve_path;

/// Watch the repository containing PATH and print a JSON line for every
/// status change.
#[derive(Debug, Parser)]
pub struct WatchCommand {
    /// Path inside the repository to watch. Defaults to the current
    /// directory.
    #[clap(default_value = "")]
    pub path: PathBuf,

    /// How long to let filesystem event bursts quiesce before recomputing
    /// status, like "1s" or "250ms".
    #[clap(long, value_parser = humantime::parse_duration)]
    pub debounce: Option<Duration>,

    /// Maximum number of change entries to report per snapshot.
    #[clap(long)]
    pub limit: Option<usize>,

    /// Directory to write rotating log files into.
    #[clap(long)]
    pub log_path: Option<PathBuf>,
}

impl WatchCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let path = resolve_path(&self.path);
        let repo = exec::discover_repository(&path)?;
        let settings = Settings::load(repo.root())?;

        let debounce = self
            .debounce
            .or(settings.debounce)
            .unwrap_or(DEFAULT_DEBOUNCE);
        let limit = self
            .limit
            .or(settings.status_limit)
            .unwrap_or(DEFAULT_STATUS_LIMIT);

        let version = GitVersion::detect()?;
        let source: Arc<dyn StatusSource> = Arc::new(GitStatusSource::new(version, limit)?);

        let broadcaster = EventBroadcaster::new();
        let factory_broadcaster = broadcaster.clone();
        let factory: WatcherFactory = Box::new(move |repo| {
            let fs = watchfs::Watcher::new_default()?;
            Ok(RepositoryWatcher::start(
                repo.clone(),
                Arc::clone(&source),
                factory_broadcaster.clone(),
                fs,
                debounce,
            ))
        });

        let pool = WatcherPool::new(broadcaster, factory);
        let service = WatchService::new(pool.clone());
        let events = service.subscribe();

        let _handle = service.watch_changes(&repo)?;
        log::info!("Watching {} (session {})", repo, service.session_id());

        // Establish the baseline snapshot before reporting diffs against it.
        pool.acquire(&repo)?.sync();

        let output = stdout();
        for event in events {
            let mut handle = output.lock();
            serde_json::to_writer(&mut handle, &event)?;
            writeln!(handle)?;
            handle.flush()?;
        }

        Ok(())
    }
}
