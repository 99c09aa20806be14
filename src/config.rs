#![forbid(unsafe_code)]

//! TOML-backed search options.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::{PlannerConfig, Projection, QueryError};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SIFT_CONFIG";

/// Options shared by every search of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Case-insensitive string and wildcard matching.
    pub ignore_case: bool,
    /// Fold filters on the timestamp column using the archive's time range.
    pub timestamp_pruning: bool,
    /// Rewrite range-index filters into record bounds.
    pub range_index_pruning: bool,
    /// Stop after this many matches per archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Columns to keep in each emitted record.
    pub projection: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            ignore_case: false,
            timestamp_pruning: true,
            range_index_pruning: true,
            max_results: None,
            projection: Vec::new(),
        }
    }
}

impl SearchConfig {
    /// Loads the config from `explicit`, else `$SIFT_CONFIG`, else the
    /// platform config directory. A missing file yields the defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(default_config_path);
        match path {
            Some(path) if path.exists() => read_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Writes the config as pretty TOML, creating parent directories.
    pub fn persist(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path().ok_or(ConfigError::NoConfigPath)?,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&target, serialized).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }

    /// Planner options derived from this config.
    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            case_sensitive: !self.ignore_case,
            timestamp_pruning: self.timestamp_pruning,
            range_index_pruning: self.range_index_pruning,
        }
    }

    /// Validated output projection.
    pub fn projection(&self) -> Result<Projection, QueryError> {
        Projection::new(self.projection.as_slice())
    }
}

fn read_file(path: &Path) -> Result<SearchConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Failures loading or persisting a [`SearchConfig`].
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("failed to read search config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse search config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize search config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("failed to write search config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no config directory found; pass --config or set SIFT_CONFIG")]
    NoConfigPath,
}

/// `<config dir>/sift/config.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sift").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() -> Result<(), ConfigError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SearchConfig::load(Some(dir.path().join("absent.toml")))?;
        assert_eq!(config, SearchConfig::default());
        assert!(config.planner_config().case_sensitive);
        Ok(())
    }

    #[test]
    fn persist_then_load() -> Result<(), ConfigError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let config = SearchConfig {
            ignore_case: true,
            timestamp_pruning: false,
            max_results: Some(10),
            projection: vec!["a.b".into()],
            ..SearchConfig::default()
        };
        assert_eq!(config.persist(Some(&path))?, path);
        let loaded = SearchConfig::load(Some(path))?;
        assert_eq!(loaded, config);
        let planner = loaded.planner_config();
        assert!(!planner.case_sensitive);
        assert!(!planner.timestamp_pruning);
        assert!(planner.range_index_pruning);
        Ok(())
    }

    #[test]
    fn partial_files_keep_defaults() -> Result<(), ConfigError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_results = 3\n").expect("write");
        let config = SearchConfig::load(Some(path))?;
        assert_eq!(config.max_results, Some(3));
        assert!(config.timestamp_pruning);
        Ok(())
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "ignore_case = \"yes\"\n").expect("write");
        let err = SearchConfig::load(Some(path.clone())).expect_err("bad type");
        assert!(matches!(err, ConfigError::Parse { path: p, .. } if p == path));
    }

    #[test]
    fn projection_is_validated() {
        let config = SearchConfig {
            projection: vec!["a".into(), "a".into()],
            ..SearchConfig::default()
        };
        assert_eq!(config.projection().expect_err("dup").code(), "DuplicateProjection");
    }
}
