//! Defines vigil's CLI through clap types.

mod blame;
mod status;
mod watch;

use std::{
    borrow::Cow,
    env,
    path::Path,
    str::FromStr,
};

use clap::Parser;
use thiserror::Error;

pub use self::blame::BlameCommand;
pub use self::status::StatusCommand;
pub use self::watch::WatchCommand;

/// Command line options that vigil accepts, defined using the clap crate.
#[derive(Debug, Parser)]
#[clap(name = "vigil", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    /// Subcommand to run in this invocation.
    #[clap(subcommand)]
    pub subcommand: Subcommand,
}

impl Options {
    pub fn run(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Status(subcommand) => subcommand.run(),
            Subcommand::Blame(subcommand) => subcommand.run(),
            Subcommand::Watch(subcommand) => subcommand.run(),
        }
    }
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Sets verbosity level. Can be specified multiple times.
    #[clap(long("verbose"), short, global(true), action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Set color behavior. Valid values are auto, always, and never.
    #[clap(long("color"), global(true), default_value("auto"))]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ColorChoiceParseError {
                attempted: source.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid color choice '{attempted}'. Valid values are: auto, always, never")]
pub struct ColorChoiceParseError {
    attempted: String,
}

#[derive(Debug, Parser)]
pub enum Subcommand {
    Status(StatusCommand),
    Blame(BlameCommand),
    Watch(WatchCommand),
}

impl Subcommand {
    /// Directory for file logging, only used by long-running commands.
    pub fn log_path(&self) -> Option<&Path> {
        match self {
            Subcommand::Watch(cmd) => cmd.log_path.as_deref(),
            _ => None,
        }
    }
}

pub fn resolve_path(path: &Path) -> Cow<'_, Path> {
    if path.is_absolute() {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(env::current_dir().unwrap().join(path))
    }
}
