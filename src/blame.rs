//! Parsing of `git blame --incremental` output into a per-line commit
//! attribution map.
//!
//! Incremental blame emits line-groups progressively: a header naming the
//! commit and the line span, then attribute lines for commits the stream has
//! not described yet, terminated by a `filename` line. Later groups for an
//! already-described commit carry the header and `filename` only.

use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;

use crate::exec::{self, ExecOptions};
use crate::model::{Commit, CommitIdentity, CommitLine, FileBlame, RepositoryId};

/// Sha prefix git uses for lines that are not committed yet.
const UNCOMMITTED_SHA_PREFIX: &str = "0000000";

/// One line-group under construction.
struct EntryBuilder {
    sha: String,
    /// 1-based first line of the span in the current file contents.
    final_line: usize,
    line_count: usize,
    author: Option<String>,
    author_mail: Option<String>,
    author_time: Option<i64>,
    summary: Option<String>,
}

impl EntryBuilder {
    /// Parses a group header: `<sha> <origLine> <finalLine> <lineCount>`.
    fn from_header(line: &str) -> Option<EntryBuilder> {
        let mut parts = line.split_whitespace();
        let sha = parts.next()?;
        let _orig_line = parts.next()?;
        let final_line: usize = parts.next()?.parse().ok()?;
        let line_count = parts.next()?.parse().ok()?;

        // Line numbers are 1-based; a zero would underflow the span fill.
        if final_line == 0 {
            return None;
        }

        Some(EntryBuilder {
            sha: sha.to_owned(),
            final_line,
            line_count,
            author: None,
            author_mail: None,
            author_time: None,
            summary: None,
        })
    }

    /// Feeds one attribute line. Returns true when the entry is complete
    /// (`filename` terminates every group).
    fn feed(&mut self, line: &str) -> bool {
        let (key, value) = match line.split_once(' ') {
            Some(pair) => pair,
            // Keys with no value, like "boundary".
            None => (line, ""),
        };

        match key {
            "author" => self.author = Some(value.to_owned()),
            "author-mail" => {
                // Values come angle-bracket wrapped: <a@b>
                let mail = value
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>');
                self.author_mail = Some(mail.to_owned());
            }
            "author-time" => self.author_time = value.trim().parse().ok(),
            "summary" => {
                let summary = value.strip_prefix('"').map_or(value, |rest| {
                    rest.strip_suffix('"').unwrap_or(rest)
                });
                self.summary = Some(summary.to_owned());
            }
            "filename" => return true,
            // committer*, previous, boundary and friends are not carried into
            // the model.
            _ => {}
        }

        false
    }

    fn is_uncommitted(&self) -> bool {
        self.sha.starts_with(UNCOMMITTED_SHA_PREFIX)
    }

    fn resolve_commit(
        &self,
        fetch_body: &mut impl FnMut(&str) -> anyhow::Result<String>,
    ) -> anyhow::Result<Commit> {
        if self.is_uncommitted() {
            // Lines not committed yet never trigger a body fetch.
            return Ok(Commit {
                sha: self.sha.clone(),
                summary: "uncommitted".to_owned(),
                body: None,
                author: CommitIdentity {
                    name: "You".to_owned(),
                    email: String::new(),
                    timestamp: self.author_time.unwrap_or(0),
                },
            });
        }

        let body = fetch_body(&self.sha)
            .with_context(|| format!("failed to fetch message body for {}", self.sha))?;
        let body = body.trim();

        Ok(Commit {
            sha: self.sha.clone(),
            summary: self.summary.clone().unwrap_or_default(),
            body: if body.is_empty() {
                None
            } else {
                Some(body.to_owned())
            },
            author: CommitIdentity {
                name: self.author.clone().unwrap_or_default(),
                email: self.author_mail.clone().unwrap_or_default(),
                timestamp: self.author_time.unwrap_or(0),
            },
        })
    }
}

/// Parses raw incremental blame output for one file.
///
/// Returns `None` when the output is empty, which is how git reports a file
/// with no history. `fetch_body` resolves a commit sha to its message body
/// and is called at most once per distinct committed sha.
pub fn parse_blame(
    uri: PathBuf,
    raw: &str,
    mut fetch_body: impl FnMut(&str) -> anyhow::Result<String>,
) -> anyhow::Result<Option<FileBlame>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let mut commits: IndexMap<String, Commit> = IndexMap::new();
    let mut lines: Vec<CommitLine> = Vec::new();
    let mut current: Option<EntryBuilder> = None;

    for line in raw.lines() {
        match current.as_mut() {
            None => {
                current = EntryBuilder::from_header(line);
                if current.is_none() {
                    log::debug!("Skipping unrecognized blame header: {:?}", line);
                }
            }
            Some(entry) => {
                if entry.feed(line) {
                    let entry = current.take().unwrap();

                    if !commits.contains_key(&entry.sha) {
                        let commit = entry.resolve_commit(&mut fetch_body)?;
                        commits.insert(entry.sha.clone(), commit);
                    }

                    for offset in 0..entry.line_count {
                        lines.push(CommitLine {
                            sha: entry.sha.clone(),
                            // Header line numbers are 1-based.
                            line: entry.final_line - 1 + offset,
                        });
                    }
                }
            }
        }
    }

    lines.sort_by_key(|line| line.line);

    Ok(Some(FileBlame {
        uri,
        commits: commits.into_values().collect(),
        lines,
    }))
}

/// Blames `path` within `repo` using the real git binary.
pub fn blame_file(repo: &RepositoryId, path: &Path) -> anyhow::Result<Option<FileBlame>> {
    let uri = if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo.root().join(path)
    };
    let relative = uri.strip_prefix(repo.root()).unwrap_or(&uri);
    let relative = relative.to_string_lossy();

    let output = match exec::git(
        &["blame", "--incremental", "--", &relative],
        repo.root(),
        &ExecOptions::default(),
    ) {
        Ok(output) => output,
        // Untracked files and repositories without commits have no history
        // to attribute; git reports both as fatal errors.
        Err(err) if err.is_no_history() => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to blame {}", uri.display()))
        }
    };

    parse_blame(uri, &output.stdout, |sha| {
        let show = exec::git(
            &["show", "--format=%b", "-s", sha],
            repo.root(),
            &ExecOptions::default(),
        )?;
        Ok(show.stdout)
    })
}
