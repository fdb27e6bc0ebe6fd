use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;

use crate::config::Constants;
use crate::error::Result;

pub static GLOBAL_CONFIG: Lazy<Settings> = Lazy::new(Settings::from_env);

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_LOG_LEVEL: &str = "info";

const DATA_DIR_KEY: &str = "DATA_DIR";
const LOG_LEVEL_KEY: &str = "LOG_LEVEL";
const CONSTANTS_FILE_KEY: &str = "CONSTANTS_FILE";

/// Node-level settings resolved from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub constants_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            constants_file: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Settings {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Settings {
        let mut settings = Settings::default();
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(LOG_LEVEL_KEY) {
            settings.log_level = level;
        }
        settings.constants_file = lookup(CONSTANTS_FILE_KEY).map(PathBuf::from);
        settings
    }

    /// Level filter for env_logger; unknown names fall back to Info.
    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }

    /// Loads the constants file when configured, otherwise the defaults.
    pub fn constants(&self) -> Result<Constants> {
        match &self.constants_file {
            Some(path) => Constants::load(path),
            None => Ok(Constants::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_environment() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.log_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DATA_DIR", "/tmp/node_a"),
            ("LOG_LEVEL", "debug"),
            ("CONSTANTS_FILE", "/etc/chain.toml"),
        ]
        .into();
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/node_a"));
        assert_eq!(settings.log_filter(), log::LevelFilter::Debug);
        assert_eq!(
            settings.constants_file,
            Some(PathBuf::from("/etc/chain.toml"))
        );
    }

    #[test]
    fn test_constants_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constants.toml");
        std::fs::write(&path, "active_delegates = 7\n").unwrap();
        let settings = Settings {
            constants_file: Some(path),
            ..Settings::default()
        };
        assert_eq!(settings.constants().unwrap().active_delegates, 7);
    }
}
