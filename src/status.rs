//! Parsing of `git status --porcelain=v2 --branch -z` output into a
//! [`WorkingDirectoryStatus`], plus the [`StatusSource`] seam the watcher uses
//! to obtain fresh snapshots.

use std::path::Path;

use anyhow::Context;

use crate::exec::{self, ExecOptions, GitVersion};
use crate::model::{
    AheadBehind, FileChange, FileStatus, RepositoryId, WorkingDirectoryStatus,
};

/// Default cap on the number of entries taken from one status query.
pub const DEFAULT_STATUS_LIMIT: usize = 1000;

/// A change as it appears in the raw output: repository-relative path, not
/// yet resolved against the root. Kept separate so the nested-repository
/// post-filter can look at the raw path shape.
struct RawChange {
    path: String,
    status: FileStatus,
    old_path: Option<String>,
    staged: Option<bool>,
}

impl RawChange {
    /// Nested repositories show up in status output as a bare directory entry
    /// with a trailing separator. They are excluded from the flat change list.
    fn is_nested_repository(&self) -> bool {
        self.path.ends_with('/') || self.path.ends_with('\\')
    }

    fn resolve(self, root: &Path) -> FileChange {
        FileChange {
            uri: root.join(&self.path),
            status: self.status,
            old_uri: self.old_path.map(|old| root.join(old)),
            staged: self.staged,
        }
    }
}

/// Maps a porcelain status code to a [`FileStatus`].
///
/// Accepts both the single-letter codes of the `<xy>` slots and the
/// `R<score>`/`C<score>` similarity forms. Unrecognized codes degrade to
/// `Modified` so that an unfamiliar but structurally valid entry never brings
/// the watcher down.
fn map_status_code(code: &str) -> FileStatus {
    match code {
        "M" => FileStatus::Modified,
        "D" => FileStatus::Deleted,
        "A" => FileStatus::New,
        _ if code.starts_with('R') => FileStatus::Renamed,
        _ if code.starts_with('C') => FileStatus::Copied,
        _ => {
            log::debug!("Unrecognized status code {:?}, treating as Modified", code);
            FileStatus::Modified
        }
    }
}

/// Emits staged/unstaged changes for the two `<xy>` slots of an ordinary or
/// rename entry. `.` means "unchanged in that slot" and emits nothing.
fn push_slot_changes(
    changes: &mut Vec<RawChange>,
    xy: &str,
    path: &str,
    old_path: Option<&str>,
) {
    let mut slots = xy.chars();
    let index = slots.next().unwrap_or('.');
    let worktree = slots.next().unwrap_or('.');

    for (code, staged) in [(index, true), (worktree, false)] {
        if code != '.' {
            changes.push(RawChange {
                path: path.to_owned(),
                status: map_status_code(&code.to_string()),
                old_path: old_path.map(str::to_owned),
                staged: Some(staged),
            });
        }
    }
}

#[derive(Default)]
struct BranchHeaders {
    current_head: Option<String>,
    branch: Option<String>,
    upstream_branch: Option<String>,
    ahead_behind: Option<AheadBehind>,
}

impl BranchHeaders {
    fn parse(&mut self, header: &str) {
        if let Some(oid) = header.strip_prefix("# branch.oid ") {
            // "(initial)" means no commit yet.
            if oid != "(initial)" {
                self.current_head = Some(oid.to_owned());
            }
        } else if let Some(head) = header.strip_prefix("# branch.head ") {
            if head != "(detached)" {
                self.branch = Some(head.to_owned());
            }
        } else if let Some(upstream) = header.strip_prefix("# branch.upstream ") {
            self.upstream_branch = Some(upstream.to_owned());
        } else if let Some(ab) = header.strip_prefix("# branch.ab ") {
            self.ahead_behind = parse_ahead_behind(ab);
        }
    }
}

fn parse_ahead_behind(raw: &str) -> Option<AheadBehind> {
    // "+<ahead> -<behind>"
    let (ahead, behind) = raw.split_once(' ')?;
    Some(AheadBehind {
        ahead: ahead.strip_prefix('+')?.parse().ok()?,
        behind: behind.strip_prefix('-')?.parse().ok()?,
    })
}

/// Parses raw `status --porcelain=v2 --branch -z` output.
///
/// Scans at most `limit` entries; if the output holds more, the snapshot is
/// marked `incomplete` and the changes parsed so far are kept. Header and
/// ignored entries do not count against the limit.
pub fn parse_status(raw: &str, root: &Path, limit: usize) -> WorkingDirectoryStatus {
    let mut headers = BranchHeaders::default();
    let mut changes: Vec<RawChange> = Vec::new();
    let mut entry_count = 0;
    let mut incomplete = false;

    let mut fields = raw.split('\0');
    while let Some(field) = fields.next() {
        if field.is_empty() {
            continue;
        }

        if field.starts_with("# ") {
            headers.parse(field);
            continue;
        }

        if field.starts_with('!') {
            // Ignored entry: dropped, and does not advance the entry counter.
            continue;
        }

        if entry_count == limit {
            incomplete = true;
            break;
        }
        entry_count += 1;

        match field.as_bytes()[0] {
            b'1' => {
                // 1 <xy> <sub> <mH> <mI> <mW> <hH> <hI> <path>
                let mut parts = field.splitn(9, ' ');
                let (Some(_), Some(xy)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let Some(path) = parts.nth(6) else {
                    continue;
                };
                push_slot_changes(&mut changes, xy, path, None);
            }
            b'2' => {
                // 2 <xy> <sub> <mH> <mI> <mW> <hH> <hI> <X><score> <path>
                // followed by the original path as its own field.
                let mut parts = field.splitn(10, ' ');
                let (Some(_), Some(xy)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let Some(path) = parts.nth(7) else {
                    continue;
                };
                let old_path = fields.next();
                push_slot_changes(&mut changes, xy, path, old_path);
            }
            b'u' => {
                // u <xy> <sub> <m1> <m2> <m3> <mW> <h1> <h2> <h3> <path>
                let mut parts = field.splitn(11, ' ');
                let Some(path) = parts.nth(10) else {
                    continue;
                };
                changes.push(RawChange {
                    path: path.to_owned(),
                    status: FileStatus::Conflicted,
                    old_path: None,
                    staged: None,
                });
            }
            b'?' => {
                let Some(path) = field.get(2..) else {
                    continue;
                };
                changes.push(RawChange {
                    path: path.to_owned(),
                    status: FileStatus::New,
                    old_path: None,
                    staged: Some(false),
                });
            }
            _ => {
                log::debug!("Skipping unrecognized status record: {:?}", field);
            }
        }
    }

    let changes = changes
        .into_iter()
        .filter(|change| !change.is_nested_repository())
        .map(|change| change.resolve(root))
        .collect();

    WorkingDirectoryStatus {
        exists: true,
        branch: headers.branch,
        upstream_branch: headers.upstream_branch,
        ahead_behind: headers.ahead_behind,
        current_head: headers.current_head,
        changes,
        incomplete,
    }
}

/// Source of fresh status snapshots for one repository.
///
/// Closures of the right shape implement this too, which is how tests drive
/// watchers without a git binary.
pub trait StatusSource: Send + Sync + 'static {
    fn query(&self, repo: &RepositoryId) -> anyhow::Result<WorkingDirectoryStatus>;
}

impl<F> StatusSource for F
where
    F: Fn(&RepositoryId) -> anyhow::Result<WorkingDirectoryStatus> + Send + Sync + 'static,
{
    fn query(&self, repo: &RepositoryId) -> anyhow::Result<WorkingDirectoryStatus> {
        self(repo)
    }
}

/// [`StatusSource`] backed by the real git binary.
pub struct GitStatusSource {
    limit: usize,
}

impl GitStatusSource {
    /// Fails if the installed git predates porcelain v2 output.
    pub fn new(version: GitVersion, limit: usize) -> anyhow::Result<Self> {
        if !version.supports_status_v2() {
            anyhow::bail!(
                "git {} is too old; {} requires git 2.11 or newer for machine-readable status",
                version,
                env!("CARGO_PKG_NAME"),
            );
        }

        Ok(GitStatusSource { limit })
    }
}

impl StatusSource for GitStatusSource {
    fn query(&self, repo: &RepositoryId) -> anyhow::Result<WorkingDirectoryStatus> {
        let result = exec::git(
            &[
                "status",
                "--porcelain=v2",
                "--branch",
                "-z",
                "--untracked-files=all",
            ],
            repo.root(),
            &ExecOptions::default(),
        );

        match result {
            Ok(output) => Ok(parse_status(&output.stdout, repo.root(), self.limit)),
            Err(err) if err.is_not_a_repository() || !repo.root().exists() => {
                log::debug!("Repository at {} is gone: {}", repo, err);
                Ok(WorkingDirectoryStatus::nonexistent())
            }
            Err(err) => Err(err).with_context(|| format!("status query failed for {}", repo)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const H1: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";
    const H2: &str = "95d09f2b10159347eece71399a7e2e907ea3df4f";

    fn root() -> PathBuf {
        PathBuf::from("/repo")
    }

    fn parse(raw: &str) -> WorkingDirectoryStatus {
        parse_status(raw, &root(), DEFAULT_STATUS_LIMIT)
    }

    #[test]
    fn branch_headers_populate_scalars() {
        let raw = format!(
            "# branch.oid {H1}\0# branch.head main\0# branch.upstream origin/main\0# branch.ab +2 -1\0"
        );
        let status = parse(&raw);

        assert_eq!(status.current_head.as_deref(), Some(H1));
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(status.upstream_branch.as_deref(), Some("origin/main"));
        assert_eq!(
            status.ahead_behind,
            Some(AheadBehind {
                ahead: 2,
                behind: 1
            })
        );
        assert!(status.exists);
        assert!(status.changes.is_empty());
        assert!(!status.incomplete);
    }

    #[test]
    fn detached_head_and_initial_oid_stay_absent() {
        let status = parse("# branch.oid (initial)\0# branch.head (detached)\0");
        assert_eq!(status.branch, None);
        assert_eq!(status.current_head, None);
    }

    #[test]
    fn changed_entry_emits_staged_and_unstaged_records() {
        let raw = format!("1 MM N... 100644 100644 100644 {H1} {H2} file.txt\0");
        let status = parse(&raw);

        assert_eq!(
            status.changes,
            vec![
                FileChange {
                    uri: root().join("file.txt"),
                    status: FileStatus::Modified,
                    old_uri: None,
                    staged: Some(true),
                },
                FileChange {
                    uri: root().join("file.txt"),
                    status: FileStatus::Modified,
                    old_uri: None,
                    staged: Some(false),
                },
            ]
        );
    }

    #[test]
    fn dot_slots_emit_nothing() {
        let raw = format!("1 .M N... 100644 100644 100644 {H1} {H2} worktree-only.txt\0");
        let status = parse(&raw);

        assert_eq!(status.changes.len(), 1);
        assert_eq!(status.changes[0].staged, Some(false));

        let raw = format!("1 D. N... 100644 000000 000000 {H1} {H2} staged-delete.txt\0");
        let status = parse(&raw);

        assert_eq!(status.changes.len(), 1);
        assert_eq!(status.changes[0].status, FileStatus::Deleted);
        assert_eq!(status.changes[0].staged, Some(true));
    }

    #[test]
    fn rename_entry_consumes_original_path_field() {
        let raw = format!("2 R. N... 100644 100644 100644 {H1} {H2} R100 new.txt\0old.txt\0");
        let status = parse(&raw);

        assert_eq!(
            status.changes,
            vec![FileChange {
                uri: root().join("new.txt"),
                status: FileStatus::Renamed,
                old_uri: Some(root().join("old.txt")),
                staged: Some(true),
            }]
        );
    }

    #[test]
    fn rename_with_worktree_modification_emits_both_slots() {
        let raw = format!("2 RM N... 100644 100644 100644 {H1} {H2} R75 new.txt\0old.txt\0");
        let status = parse(&raw);

        assert_eq!(status.changes.len(), 2);
        assert_eq!(status.changes[0].status, FileStatus::Renamed);
        assert_eq!(status.changes[0].staged, Some(true));
        assert_eq!(status.changes[1].status, FileStatus::Modified);
        assert_eq!(status.changes[1].staged, Some(false));
        assert_eq!(status.changes[1].old_uri, Some(root().join("old.txt")));
    }

    #[test]
    fn unmerged_entry_is_conflicted_without_staged_flag() {
        let raw = format!("u UU N... 100644 100644 100644 100644 {H1} {H2} {H2} clash.txt\0");
        let status = parse(&raw);

        assert_eq!(
            status.changes,
            vec![FileChange {
                uri: root().join("clash.txt"),
                status: FileStatus::Conflicted,
                old_uri: None,
                staged: None,
            }]
        );
    }

    #[test]
    fn untracked_entry_is_new_and_unstaged() {
        let status = parse("? fresh.txt\0");
        assert_eq!(
            status.changes,
            vec![FileChange {
                uri: root().join("fresh.txt"),
                status: FileStatus::New,
                old_uri: None,
                staged: Some(false),
            }]
        );
    }

    #[test]
    fn ignored_entries_are_dropped_and_do_not_count() {
        let raw = "! target/\0? a.txt\0? b.txt\0";
        let status = parse_status(raw, &root(), 2);

        assert_eq!(status.changes.len(), 2);
        assert!(!status.incomplete);
    }

    #[test]
    fn limit_truncates_and_flags_incomplete() {
        let raw = "? a\0? b\0? c\0? d\0? e\0";
        let status = parse_status(raw, &root(), 2);

        assert_eq!(status.changes.len(), 2);
        assert_eq!(status.changes[0].uri, root().join("a"));
        assert_eq!(status.changes[1].uri, root().join("b"));
        assert!(status.incomplete);
    }

    #[test]
    fn exact_limit_is_not_incomplete() {
        let status = parse_status("? a\0? b\0", &root(), 2);
        assert_eq!(status.changes.len(), 2);
        assert!(!status.incomplete);
    }

    #[test]
    fn nested_repositories_are_filtered_but_count_against_limit() {
        let raw = "? vendored/\0? a.txt\0? b.txt\0";
        let status = parse_status(raw, &root(), 2);

        // The nested repository consumed one of the two entry slots during the
        // scan and was removed afterwards.
        assert_eq!(status.changes.len(), 1);
        assert_eq!(status.changes[0].uri, root().join("a.txt"));
        assert!(status.incomplete);
    }

    #[test]
    fn unknown_codes_default_to_modified() {
        let raw = format!("1 T. N... 100644 100644 100644 {H1} {H2} typechange.txt\0");
        let status = parse(&raw);

        assert_eq!(status.changes[0].status, FileStatus::Modified);
    }

    #[test]
    fn copy_codes_map_to_copied() {
        assert_eq!(map_status_code("C"), FileStatus::Copied);
        assert_eq!(map_status_code("C75"), FileStatus::Copied);
        assert_eq!(map_status_code("R100"), FileStatus::Renamed);
    }

    #[test]
    fn paths_with_spaces_survive() {
        let raw = format!("1 .M N... 100644 100644 100644 {H1} {H2} dir with space/my file.txt\0");
        let status = parse(&raw);

        assert_eq!(
            status.changes[0].uri,
            root().join("dir with space/my file.txt")
        );
    }

    #[test]
    fn empty_output_is_clean() {
        let status = parse("");
        assert!(status.exists);
        assert!(status.is_clean());
        assert!(!status.incomplete);
    }

    #[test]
    fn source_rejects_pre_v2_git() {
        let old = GitVersion {
            major: 2,
            minor: 9,
            patch: 0,
        };
        assert!(GitStatusSource::new(old, DEFAULT_STATUS_LIMIT).is_err());

        let new = GitVersion {
            major: 2,
            minor: 39,
            patch: 0,
        };
        assert!(GitStatusSource::new(new, DEFAULT_STATUS_LIMIT).is_ok());
    }
}
