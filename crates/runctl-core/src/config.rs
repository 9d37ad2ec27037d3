//! Runner configuration file.
//!
//! An optional YAML file supplies defaults for flags the operator rarely
//! changes per run. Flags given on the command line always win; the config
//! only fills fields left unset.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::request::RunRequest;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Defaults applied to every run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub fifo_dir: Option<PathBuf>,
    #[serde(default)]
    pub snapshotter: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl RunnerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fills unset request fields from the config.
    pub fn apply(&self, req: &mut RunRequest) {
        if req.fifo_dir.is_none() {
            req.fifo_dir = self.fifo_dir.clone();
        }
        if req.snapshotter.is_none() {
            req.snapshotter = self.snapshotter.clone();
        }
        if req.platform.is_none() {
            req.platform = self.platform.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RunMode;
    use std::io::Write;

    fn request() -> RunRequest {
        RunRequest {
            id: "c1".to_string(),
            mode: RunMode::WithReference {
                reference: "img".to_string(),
            },
            args: vec![],
            mounts: vec![],
            tty: false,
            detach: false,
            remove: false,
            null_io: false,
            log_uri: None,
            fifo_dir: None,
            cgroup: None,
            platform: None,
            snapshotter: None,
            pid_file: None,
            checkpoint: None,
        }
    }

    #[test]
    fn loads_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "snapshotter: overlayfs").unwrap();
        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.snapshotter.as_deref(), Some("overlayfs"));
        assert!(config.fifo_dir.is_none());
    }

    #[test]
    fn cli_values_win_over_config() {
        let config = RunnerConfig {
            fifo_dir: Some(PathBuf::from("/from/config")),
            snapshotter: Some("overlayfs".to_string()),
            platform: None,
        };
        let mut req = request();
        req.fifo_dir = Some(PathBuf::from("/from/cli"));
        config.apply(&mut req);
        assert_eq!(req.fifo_dir.as_deref(), Some(Path::new("/from/cli")));
        assert_eq!(req.snapshotter.as_deref(), Some("overlayfs"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = RunnerConfig::from_file(Path::new("/nonexistent/runctl.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "snapshotter: [unterminated").unwrap();
        let err = RunnerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
