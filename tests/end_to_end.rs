//! Integration tests that exercise vigil against real git repositories.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};

use libvigil::events::EventBroadcaster;
use libvigil::exec::{self, ExecOptions, GitVersion};
use libvigil::model::{FileStatus, RepositoryId};
use libvigil::pool::{WatcherFactory, WatcherPool};
use libvigil::service::{WatchServer, WatchService};
use libvigil::status::{GitStatusSource, StatusSource};
use libvigil::watcher::RepositoryWatcher;
use libvigil::RepositoryManager;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn git(args: &[&str], cwd: &Path) {
    exec::git(args, cwd, &ExecOptions::default())
        .unwrap_or_else(|err| panic!("git {:?} failed: {}", args, err));
}

/// Creates a repository with a known committer identity, so commits work on
/// machines with no global git config.
fn init_repository() -> (TempDir, RepositoryId) {
    let dir = tempdir().unwrap();
    git(&["init"], dir.path());

    let config_path = dir.path().join(".git/config");
    let mut content = fs::read_to_string(&config_path).unwrap_or_default();
    content.push_str("[user]\n\tname = Test\n\temail = test@test.com\n");
    fs::write(&config_path, content).unwrap();

    let repo = exec::discover_repository(dir.path()).unwrap();
    (dir, repo)
}

fn commit_all(repo: &RepositoryId, message: &str) {
    git(&["add", "."], repo.root());
    git(&["commit", "-m", message], repo.root());
}

fn status_source(limit: usize) -> GitStatusSource {
    let version = GitVersion::detect().unwrap();
    GitStatusSource::new(version, limit).unwrap()
}

/// Pool whose watchers use the real filesystem backend and the real git
/// status source.
fn real_pool(limit: usize, debounce: Duration) -> WatcherPool {
    let source: Arc<dyn StatusSource> = Arc::new(status_source(limit));
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

    WatcherPool::new(broadcaster, factory)
}

#[test]
fn status_reports_untracked_then_staged_file() {
    let (_dir, repo) = init_repository();
    let source = status_source(1000);

    fs::write(repo.root().join("new.txt"), "hello\n").unwrap();

    let status = source.query(&repo).unwrap();
    assert!(status.exists);
    assert!(!status.incomplete);
    assert_eq!(status.changes.len(), 1);

    let change = &status.changes[0];
    assert_eq!(change.uri, repo.root().join("new.txt"));
    assert_eq!(change.status, FileStatus::New);
    assert_eq!(change.staged, Some(false));

    git(&["add", "new.txt"], repo.root());
    let status = source.query(&repo).unwrap();
    assert_eq!(status.changes.len(), 1);
    assert_eq!(status.changes[0].status, FileStatus::New);
    assert_eq!(status.changes[0].staged, Some(true));
}

#[test]
fn status_is_clean_after_commit() {
    let (_dir, repo) = init_repository();
    let source = status_source(1000);

    fs::write(repo.root().join("a.txt"), "a\n").unwrap();
    commit_all(&repo, "add a");

    let status = source.query(&repo).unwrap();
    assert!(status.is_clean());
    assert!(status.branch.is_some());
    assert!(status.current_head.is_some());
}

#[test]
fn staged_rename_carries_the_old_path() {
    let (_dir, repo) = init_repository();
    let source = status_source(1000);

    fs::write(repo.root().join("before.txt"), "contents\n").unwrap();
    commit_all(&repo, "add before");
    git(&["mv", "before.txt", "after.txt"], repo.root());

    let status = source.query(&repo).unwrap();
    assert_eq!(status.changes.len(), 1);

    let change = &status.changes[0];
    assert_eq!(change.status, FileStatus::Renamed);
    assert_eq!(change.uri, repo.root().join("after.txt"));
    assert_eq!(change.old_uri, Some(repo.root().join("before.txt")));
    assert_eq!(change.staged, Some(true));
}

#[test]
fn status_truncates_at_the_entry_limit() {
    let (_dir, repo) = init_repository();
    let source = status_source(2);

    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(repo.root().join(name), "x\n").unwrap();
    }

    let status = source.query(&repo).unwrap();
    assert_eq!(status.changes.len(), 2);
    assert!(status.incomplete);
}

#[test]
fn status_of_a_non_repository_is_nonexistent() {
    let dir = tempdir().unwrap();
    let source = status_source(1000);

    let status = source.query(&RepositoryId::new(dir.path())).unwrap();
    assert!(!status.exists);
    assert!(status.changes.is_empty());
}

#[test]
fn watch_reports_a_created_file() {
    let (_dir, repo) = init_repository();
    let pool = real_pool(1000, Duration::from_millis(200));
    let service = WatchService::new(pool.clone());
    let events = service.subscribe();

    let _handle = service.watch_changes(&repo).unwrap();

    // Establish the clean baseline; its broadcast is drained before the
    // interesting part.
    pool.acquire(&repo).unwrap().sync();
    let baseline = events.recv_timeout(EVENT_TIMEOUT).unwrap();
    assert!(baseline.status.is_clean());

    fs::write(repo.root().join("watched.txt"), "ping\n").unwrap();

    let event = events.recv_timeout(EVENT_TIMEOUT).unwrap();
    assert_eq!(event.repository, repo);
    assert_eq!(event.status.changes.len(), 1);
    assert_eq!(event.status.changes[0].uri, repo.root().join("watched.txt"));
    assert_eq!(event.old_status.as_ref().map(|s| s.is_clean()), Some(true));
}

#[test]
fn manager_operations_resync_without_waiting_for_the_debounce() {
    let (_dir, repo) = init_repository();
    // A debounce far longer than the test proves the resync path does not go
    // through the filesystem event window.
    let pool = real_pool(1000, Duration::from_secs(600));
    let events = pool.broadcaster().subscribe();
    let manager = RepositoryManager::new(pool.clone());

    // Keep the watcher alive across both operations.
    let reference = pool.acquire(&repo).unwrap();
    reference.sync();
    let baseline = events.recv_timeout(EVENT_TIMEOUT).unwrap();
    assert!(baseline.status.is_clean());

    let result: anyhow::Result<()> = manager.run(&repo, || {
        fs::write(repo.root().join("op.txt"), "written by an operation\n")?;
        Ok(())
    });
    result.unwrap();

    let event = events.recv_timeout(EVENT_TIMEOUT).unwrap();
    assert_eq!(event.status.changes.len(), 1);
    assert_eq!(event.status.changes[0].uri, repo.root().join("op.txt"));
}

#[test]
fn unwatched_repositories_release_their_watcher() {
    let (_dir, repo) = init_repository();
    let pool = real_pool(1000, Duration::from_millis(200));
    let service = WatchService::new(pool.clone());

    let handle = service.watch_changes(&repo).unwrap();
    assert_eq!(pool.watcher_count(), 1);

    service.unwatch_changes(handle).unwrap();
    assert_eq!(pool.watcher_count(), 0);
}

#[test]
fn blame_attributes_committed_and_uncommitted_lines() {
    let (_dir, repo) = init_repository();
    let path = repo.root().join("poem.txt");

    fs::write(&path, "one\ntwo\n").unwrap();
    commit_all(&repo, "add poem");
    fs::write(&path, "one\ntwo\nthree\n").unwrap();

    let blame = libvigil::blame::blame_file(&repo, &path).unwrap().unwrap();

    assert_eq!(blame.uri, path);
    assert_eq!(blame.lines.len(), 3);
    for (index, line) in blame.lines.iter().enumerate() {
        assert_eq!(line.line, index);
    }

    let committed = blame.commit_for_line(0).unwrap();
    assert_eq!(committed.summary, "add poem");
    assert_eq!(committed.author.name, "Test");
    assert_eq!(committed.author.email, "test@test.com");
    assert_eq!(committed.body, None);

    let uncommitted = blame.commit_for_line(2).unwrap();
    assert!(uncommitted.sha.starts_with("0000000"));
    assert_eq!(uncommitted.summary, "uncommitted");
    assert_eq!(uncommitted.author.name, "You");
}

#[test]
fn blame_of_an_untracked_file_has_no_history() {
    let (_dir, repo) = init_repository();
    let path = repo.root().join("fresh.txt");
    fs::write(&path, "no commits here\n").unwrap();

    let blame = libvigil::blame::blame_file(&repo, &path).unwrap();
    assert!(blame.is_none());
}

#[test]
fn commit_message_bodies_are_fetched() {
    let (_dir, repo) = init_repository();
    let path = repo.root().join("detailed.txt");

    fs::write(&path, "line\n").unwrap();
    git(&["add", "."], repo.root());
    git(
        &["commit", "-m", "subject line", "-m", "A longer explanation."],
        repo.root(),
    );

    let blame = libvigil::blame::blame_file(&repo, &path).unwrap().unwrap();
    let commit = blame.commit_for_line(0).unwrap();
    assert_eq!(commit.summary, "subject line");
    assert_eq!(commit.body.as_deref(), Some("A longer explanation."));
}
