use std::{
    io::{stdout, BufWriter, Write},
    path::PathBuf,
};

use clap::Parser;

use crate::{blame, exec, model::FileBlame};

use super::resolve_path;

/// Show which commit last touched each line of FILE.
#[derive(Debug, Parser)]
pub struct BlameCommand {
    /// The file to blame.
    pub file: PathBuf,

    /// Output machine-readable JSON instead of a human-readable listing.
    #[clap(long)]
    pub json: bool,
}

impl BlameCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let file = resolve_path(&self.file);
        let repo = exec::discover_repository(&file)?;

        let Some(file_blame) = blame::blame_file(&repo, &file)? else {
            println!("{} has no history", file.display());
            return Ok(());
        };

        let output = stdout();
        let mut handle = BufWriter::new(output.lock());

        if self.json {
            serde_json::to_writer_pretty(&mut handle, &file_blame)?;
            writeln!(handle)?;
        } else {
            write_human_readable(&mut handle, &file_blame)?;
        }

        handle.flush()?;
        Ok(())
    }
}

fn write_human_readable(out: &mut impl Write, file_blame: &FileBlame) -> anyhow::Result<()> {
    for line in &file_blame.lines {
        let commit = file_blame
            .commits
            .iter()
            .find(|commit| commit.sha == line.sha);

        let short_sha = &line.sha[..line.sha.len().min(8)];
        match commit {
            Some(commit) => writeln!(
                out,
                "{:>5}  {}  {:20}  {}",
                line.line + 1,
                short_sha,
                commit.author.name,
                commit.summary
            )?,
            None => writeln!(out, "{:>5}  {}", line.line + 1, short_sha)?,
        }
    }

    Ok(())
}
