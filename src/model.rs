//! Core value types for repository status, blame attribution, and the
//! identities that key all of vigil's maps.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identity of one working directory root.
///
/// Holds the canonical path of the repository root; two ids are
/// interchangeable exactly when they compare equal. Use
/// [`crate::exec::discover_repository`] to build one from arbitrary user
/// input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(PathBuf);

impl RepositoryId {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RepositoryId(root.into())
    }

    pub fn root(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Commits ahead of and behind the upstream branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadBehind {
    pub ahead: u32,
    pub behind: u32,
}

/// Snapshot of a working directory's divergence from its last commit.
///
/// Equality is full structural equality, and the order of `changes` is
/// significant: the list is positionally derived from status output, so two
/// snapshots listing the same paths in a different order are different
/// observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDirectoryStatus {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ahead_behind: Option<AheadBehind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_head: Option<String>,
    pub changes: Vec<FileChange>,
    /// True iff the entry limit was hit before the raw output was exhausted.
    #[serde(default)]
    pub incomplete: bool,
}

impl WorkingDirectoryStatus {
    /// Status of a location that is not (or no longer) a repository.
    pub fn nonexistent() -> Self {
        WorkingDirectoryStatus {
            exists: false,
            branch: None,
            upstream_branch: None,
            ahead_behind: None,
            current_head: None,
            changes: Vec::new(),
            incomplete: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }
}

/// How a path differs from HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    New,
    Copied,
    Modified,
    Renamed,
    Deleted,
    Conflicted,
}

impl FileStatus {
    /// Human-readable label. New files read differently depending on whether
    /// they sit in the index ("Added") or only in the working tree
    /// ("Untracked").
    pub fn describe(self, staged: bool) -> &'static str {
        match self {
            FileStatus::New => {
                if staged {
                    "Added"
                } else {
                    "Untracked"
                }
            }
            FileStatus::Copied => "Copied",
            FileStatus::Modified => "Modified",
            FileStatus::Renamed => "Renamed",
            FileStatus::Deleted => "Deleted",
            FileStatus::Conflicted => "Conflicted",
        }
    }

    /// Single-letter abbreviation of [`describe`](Self::describe), for
    /// compact listings.
    pub fn abbreviation(self, staged: bool) -> char {
        // describe never returns an empty label
        self.describe(staged).chars().next().unwrap()
    }
}

/// One changed path in a status snapshot.
///
/// A single path may appear twice, once staged and once unstaged, when both
/// the index and the working tree differ from HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub uri: PathBuf,
    pub status: FileStatus,
    /// Previous path, only meaningful for `Renamed` and `Copied`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_uri: Option<PathBuf>,
    /// `None` means the distinction does not apply (conflicts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged: Option<bool>,
}

impl FileChange {
    pub fn is_staged(&self) -> bool {
        self.staged == Some(true)
    }
}

/// Author identity attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    /// Epoch seconds.
    pub timestamp: i64,
}

/// Commit metadata as resolved during blame parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub sha: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub author: CommitIdentity,
}

/// Attribution of one line to the commit that last touched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLine {
    pub sha: String,
    /// Zero-based line number in the current file contents.
    pub line: usize,
}

/// Per-line authorship of one file.
///
/// `commits` is deduplicated by sha in first-seen order; `lines` is ordered by
/// line number, so `lines[i].line == i` for complete blame output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBlame {
    pub uri: PathBuf,
    pub commits: Vec<Commit>,
    pub lines: Vec<CommitLine>,
}

impl FileBlame {
    /// The commit that last touched `line` (zero-based), if attributed.
    pub fn commit_for_line(&self, line: usize) -> Option<&Commit> {
        let sha = &self.lines.iter().find(|l| l.line == line)?.sha;
        self.commits.iter().find(|c| &c.sha == sha)
    }
}
