//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RollupError};

/// Database file name every index directory carries.
pub const DEFAULT_DB_NAME: &str = "db.db";

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub walker: WalkerConfig,
    pub rollup: RollupConfig,
    pub paths: PathsConfig,
}

/// Bottom-up walk behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalkerConfig {
    /// Worker threads in the task pool.
    pub threads: usize,
    /// Record non-directory entries per node (statistics only).
    pub track_non_dirs: bool,
}

/// Rollup decision and merge behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RollupConfig {
    /// Score directories without touching any database or directory.
    pub dry_run: bool,
    /// Print `<path> <score>` for every processed directory.
    pub print_scores: bool,
    /// Name of the per-directory database file.
    pub db_name: String,
}

/// Filesystem paths used by the tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Optional JSONL event log; `None` disables structured events.
    pub event_log: Option<PathBuf>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism().map_or(1, std::num::NonZero::get),
            track_non_dirs: false,
        }
    }
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            print_scores: false,
            db_name: DEFAULT_DB_NAME.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[GUR-CONFIG] WARNING: HOME not set, falling back to /tmp for config path");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("gufi").join("config.toml"),
            event_log: None,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| RollupError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(RollupError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("GUFI_WALKER_THREADS") {
            self.walker.threads = parse_env_usize("GUFI_WALKER_THREADS", &raw)?;
        }
        if let Some(raw) = lookup("GUFI_WALKER_TRACK_NON_DIRS") {
            self.walker.track_non_dirs = parse_env_bool("GUFI_WALKER_TRACK_NON_DIRS", &raw)?;
        }
        if let Some(raw) = lookup("GUFI_ROLLUP_DRY_RUN") {
            self.rollup.dry_run = parse_env_bool("GUFI_ROLLUP_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("GUFI_ROLLUP_PRINT_SCORES") {
            self.rollup.print_scores = parse_env_bool("GUFI_ROLLUP_PRINT_SCORES", &raw)?;
        }
        if let Some(raw) = lookup("GUFI_PATHS_EVENT_LOG") {
            self.paths.event_log = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    /// Reject settings the walker or the rollup engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.walker.threads == 0 {
            return Err(RollupError::InvalidConfig {
                details: "walker.threads must be at least 1".to_string(),
            });
        }
        if self.rollup.db_name.is_empty() || self.rollup.db_name.contains('/') {
            return Err(RollupError::InvalidConfig {
                details: format!(
                    "rollup.db_name must be a bare file name, got {:?}",
                    self.rollup.db_name
                ),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| RollupError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RollupError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, RollupError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.walker.threads >= 1);
        assert_eq!(cfg.rollup.db_name, "db.db");
    }

    #[test]
    fn zero_threads_rejected() {
        let mut cfg = Config::default();
        cfg.walker.threads = 0;
        let err = cfg.validate().expect_err("expected invalid thread count");
        assert!(matches!(err, RollupError::InvalidConfig { .. }));
    }

    #[test]
    fn db_name_with_separator_rejected() {
        let mut cfg = Config::default();
        cfg.rollup.db_name = "nested/db.db".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("GUFI_WALKER_THREADS", "7"),
            ("GUFI_ROLLUP_DRY_RUN", "yes"),
            ("GUFI_PATHS_EVENT_LOG", "/tmp/rollup.jsonl"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("overrides parse");
        assert_eq!(cfg.walker.threads, 7);
        assert!(cfg.rollup.dry_run);
        assert!(!cfg.rollup.print_scores);
        assert_eq!(
            cfg.paths.event_log,
            Some(PathBuf::from("/tmp/rollup.jsonl"))
        );
    }

    #[test]
    fn malformed_env_override_is_parse_error() {
        let env = vars(&[("GUFI_WALKER_THREADS", "many")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .expect_err("expected parse failure");
        assert_eq!(err.code(), "GUR-1003");
    }

    #[test]
    fn toml_sections_parse_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [walker]
            threads = 3

            [rollup]
            dry_run = true
            "#,
        )
        .expect("valid toml");
        assert_eq!(cfg.walker.threads, 3);
        assert!(!cfg.walker.track_non_dirs);
        assert!(cfg.rollup.dry_run);
        assert_eq!(cfg.rollup.db_name, "db.db");
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[walker]\nthreads = 2\n").unwrap();
        let cfg = Config::load(Some(&path)).expect("config loads");
        assert_eq!(cfg.paths.config_file, path);
        assert!(cfg.walker.threads >= 1);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/gufi/config.toml")));
        assert!(matches!(result, Err(RollupError::MissingConfig { .. })));
    }
}
