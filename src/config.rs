//! Optional per-repository settings file.
//!
//! A `vigil.json5` at the repository root tunes the watch behavior; CLI flags
//! override it, and a missing file just means defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE_NAME: &str = "vigil.json5";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    /// How long to let filesystem event bursts quiesce before recomputing
    /// status, as a humantime string ("1s", "250ms").
    #[serde(
        default,
        with = "humantime_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub debounce: Option<Duration>,

    /// Cap on the number of entries taken from one status query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_limit: Option<usize>,
}

impl Settings {
    /// Loads settings from the repository root. A missing file yields
    /// defaults; a malformed file is an error rather than a silent fallback.
    pub fn load(root: &Path) -> anyhow::Result<Settings> {
        let path = root.join(SETTINGS_FILE_NAME);

        let contents = match fs_err::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(err) => return Err(err.into()),
        };

        json5::from_str(&contents)
            .with_context(|| format!("malformed settings file {}", path.display()))
    }
}

mod humantime_duration {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}
