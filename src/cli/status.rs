use std::{
    io::{stdout, BufWriter, Write},
    path::PathBuf,
};

use clap::Parser;

use crate::{
    config::Settings,
    exec::{self, GitVersion},
    model::WorkingDirectoryStatus,
    status::{GitStatusSource, StatusSource, DEFAULT_STATUS_LIMIT},
};

use super::resolve_path;

/// Print the status snapshot of the repository containing PATH.
#[derive(Debug, Parser)]
pub struct StatusCommand {
    /// Path inside the repository to inspect. Defaults to the current
    /// directory.
    #[clap(default_value = "")]
    pub path: PathBuf,

    /// Maximum number of change entries to report.
    #[clap(long)]
    pub limit: Option<usize>,

    /// Output machine-readable JSON instead of a human-readable listing.
    #[clap(long)]
    pub json: bool,
}

impl StatusCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let path = resolve_path(&self.path);
        let repo = exec::discover_repository(&path)?;
        let settings = Settings::load(repo.root())?;
        let limit = self
            .limit
            .or(settings.status_limit)
            .unwrap_or(DEFAULT_STATUS_LIMIT);

        let version = GitVersion::detect()?;
        let source = GitStatusSource::new(version, limit)?;
        let status = source.query(&repo)?;

        let output = stdout();
        let mut handle = BufWriter::new(output.lock());

        if self.json {
            serde_json::to_writer_pretty(&mut handle, &status)?;
            writeln!(handle)?;
        } else {
            write_human_readable(&mut handle, &status)?;
        }

        handle.flush()?;
        Ok(())
    }
}

fn write_human_readable(
    out: &mut impl Write,
    status: &WorkingDirectoryStatus,
) -> anyhow::Result<()> {
    match &status.branch {
        Some(branch) => write!(out, "On branch {}", branch)?,
        None => write!(out, "HEAD detached")?,
    }
    if let Some(upstream) = &status.upstream_branch {
        write!(out, ", tracking {}", upstream)?;
    }
    writeln!(out)?;

    if let Some(ab) = &status.ahead_behind {
        writeln!(out, "Ahead {}, behind {}", ab.ahead, ab.behind)?;
    }

    if status.is_clean() {
        writeln!(out, "Working directory clean")?;
        return Ok(());
    }

    for change in &status.changes {
        let staged = change.staged.unwrap_or(false);
        write!(
            out,
            "{} {}",
            change.status.abbreviation(staged),
            change.uri.display()
        )?;
        if let Some(old_uri) = &change.old_uri {
            write!(out, " (from {})", old_uri.display())?;
        }
        writeln!(out)?;
    }

    if status.incomplete {
        writeln!(out, "(change list truncated)")?;
    }

    Ok(())
}
