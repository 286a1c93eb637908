//! Invocation of the external `git` binary.
//!
//! Everything vigil knows about a repository comes from running `git` and
//! parsing its output; this module is the only place a child process is
//! spawned. Invocations are serialized process-wide per working directory, so
//! no two git commands ever run concurrently against the same repository.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Context;
use thiserror::Error;

use crate::model::RepositoryId;

/// Result of one external `git` invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Options for one invocation.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Exit codes that count as success. Anything else becomes
    /// [`ExecError::UnexpectedExit`].
    pub success_exit_codes: HashSet<i32>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            success_exit_codes: HashSet::from([0]),
        }
    }
}

impl ExecOptions {
    pub fn accepting(codes: impl IntoIterator<Item = i32>) -> Self {
        ExecOptions {
            success_exit_codes: codes.into_iter().collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start git {args:?}: {source}")]
    Spawn {
        args: Vec<String>,
        source: io::Error,
    },

    #[error("git {args:?} exited with code {exit_code}: {stderr}")]
    UnexpectedExit {
        args: Vec<String>,
        exit_code: i32,
        stderr: String,
    },
}

impl ExecError {
    /// Whether this failure means the working directory is not (or no longer)
    /// inside a repository. Callers use this to downgrade log noise for
    /// repositories that vanished out from under a watch.
    pub fn is_not_a_repository(&self) -> bool {
        match self {
            ExecError::UnexpectedExit { stderr, .. } => {
                stderr.contains("not a git repository")
            }
            ExecError::Spawn { .. } => false,
        }
    }

    /// Whether this failure means the blamed path has no commit history:
    /// either the path is not in HEAD, or the repository has no commits.
    pub fn is_no_history(&self) -> bool {
        match self {
            ExecError::UnexpectedExit { stderr, .. } => {
                stderr.contains("no such path") || stderr.contains("no such ref")
            }
            ExecError::Spawn { .. } => false,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::UnexpectedExit { exit_code, .. } => Some(*exit_code),
            ExecError::Spawn { .. } => None,
        }
    }
}

fn cwd_lock(cwd: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap();
    Arc::clone(locks.entry(cwd.to_path_buf()).or_default())
}

/// Runs `git` with the given arguments in `cwd`, capturing output as (lossy)
/// UTF-8.
pub fn git(args: &[&str], cwd: &Path, options: &ExecOptions) -> Result<ExecOutput, ExecError> {
    let lock = cwd_lock(cwd);
    let _held = lock.lock().unwrap();

    log::trace!("git {} (in {})", args.join(" "), cwd.display());

    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|source| ExecError::Spawn {
            args: args.iter().map(|s| s.to_string()).collect(),
            source,
        })?;

    // Killed-by-signal has no code; fold it into the unexpected-exit path.
    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if options.success_exit_codes.contains(&exit_code) {
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    } else {
        Err(ExecError::UnexpectedExit {
            args: args.iter().map(|s| s.to_string()).collect(),
            exit_code,
            stderr,
        })
    }
}

/// Version of the installed git binary, probed once at startup and passed to
/// the components that depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl GitVersion {
    pub fn detect() -> anyhow::Result<GitVersion> {
        let cwd = std::env::current_dir().context("failed to read the current directory")?;
        let output = git(&["--version"], &cwd, &ExecOptions::default())
            .context("failed to run `git --version`; is git installed?")?;

        Self::parse(&output.stdout)
            .with_context(|| format!("unrecognized `git --version` output: {:?}", output.stdout))
    }

    fn parse(raw: &str) -> Option<GitVersion> {
        // "git version 2.39.2" or "git version 2.39.2.windows.1"
        let version = raw.trim().strip_prefix("git version ")?;
        let mut numbers = version
            .split('.')
            .map_while(|part| part.parse::<u32>().ok());

        Some(GitVersion {
            major: numbers.next()?,
            minor: numbers.next()?,
            patch: numbers.next().unwrap_or(0),
        })
    }

    /// `status --porcelain=v2` arrived in git 2.11.
    pub fn supports_status_v2(&self) -> bool {
        (self.major, self.minor) >= (2, 11)
    }
}

impl std::fmt::Display for GitVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Finds the repository containing `path` and returns its canonical root.
pub fn discover_repository(path: &Path) -> anyhow::Result<RepositoryId> {
    let start = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };

    let output = git(&["rev-parse", "--show-toplevel"], start, &ExecOptions::default())
        .with_context(|| format!("no repository found containing {}", path.display()))?;

    let root = fs_err::canonicalize(output.stdout.trim())?;
    Ok(RepositoryId::new(root))
}
