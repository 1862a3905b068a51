//! CLI configuration.
//!
//! An optional TOML file tweaks the front-end only — the language and VM
//! have no configuration surface. Unknown keys are rejected so typos
//! fail loudly instead of being ignored.
//!
//! ```toml
//! color = false
//! history = "/home/me/.rill_history"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// ANSI colours in front-end diagnostics (default on).
    pub color: Option<bool>,
    /// REPL history file; history is session-only when unset.
    pub history: Option<PathBuf>,
}

impl Config {
    pub fn color_enabled(&self) -> bool {
        self.color.unwrap_or(true)
    }
}

/// Loads the file at `path`, or the defaults when no path was given.
pub fn load(path: Option<&Path>) -> Result<Config, String> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let content = fs::read_to_string(path)
        .map_err(|e| format!("could not read config '{}': {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| format!("invalid config '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_defaults() {
        let config = load(None).expect("defaults always load");
        assert!(config.color_enabled());
        assert!(config.history.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config =
            toml::from_str("color = false\nhistory = \"/tmp/h\"\n").expect("valid config");
        assert!(!config.color_enabled());
        assert_eq!(config.history, Some(PathBuf::from("/tmp/h")));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("colour = true\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "color = false").expect("write config");
        let config = load(Some(file.path())).expect("config loads");
        assert!(!config.color_enabled());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let error = load(Some(Path::new("/nonexistent/rill.toml"))).unwrap_err();
        assert!(error.contains("could not read config"));
    }
}
