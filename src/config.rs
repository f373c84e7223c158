//! Optional `muxrun.toml` configuration.
//!
//! Every key mirrors a CLI flag and the flag wins when both are given. The
//! file is looked up in the current directory unless `--config` points
//! elsewhere; a missing default file is not an error.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::RunError;

pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_REPLACE_STR: &str = "{}";
pub const DEFAULT_TICK_MS: u64 = 50;
pub const DEFAULT_TAIL_LINES: usize = 16;

/// How the run presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Split-pane UI on a tty, line output otherwise.
    #[default]
    Auto,
    /// Force the split-pane UI.
    Tty,
    /// Force prefixed line output.
    Plain,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub parallelism: Option<usize>,
    pub replace_str: Option<String>,
    pub tick_ms: Option<u64>,
    pub tail_lines: Option<usize>,
    pub mode: Option<Mode>,
    pub break_on_fail: Option<bool>,
}

impl Config {
    /// Loads the config file. `explicit` must exist; the default path is
    /// optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, RunError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from("muxrun.toml"), false),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text)
                .map_err(|err| RunError::Config(format!("{}: {err}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(err) => Err(RunError::Config(format!("{}: {err}", path.display()))),
        }
    }

    fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_keys() {
        let config = Config::parse(
            r#"
            parallelism = 8
            replace_str = "%"
            tick_ms = 25
            tail_lines = 32
            mode = "plain"
            break_on_fail = true
            "#,
        )
        .unwrap();
        assert_eq!(config.parallelism, Some(8));
        assert_eq!(config.replace_str.as_deref(), Some("%"));
        assert_eq!(config.tick_ms, Some(25));
        assert_eq!(config.tail_lines, Some(32));
        assert_eq!(config.mode, Some(Mode::Plain));
        assert_eq!(config.break_on_fail, Some(true));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.parallelism.is_none());
        assert!(config.mode.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("paralellism = 2").is_err());
    }
}
