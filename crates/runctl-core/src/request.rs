//! Run request construction and validation.

use std::path::PathBuf;

use runctl_proto::{Error, InstanceSpec, IoMode, MountSpec, Result, RootSource, TaskOpts};

/// How the instance's filesystem/process definition is supplied.
///
/// The first two positional arguments have a dual interpretation: with a
/// config file only the instance id is positional; otherwise the first
/// positional is the image reference and the second the id. The choice is
/// resolved once here and never re-inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    WithConfig { config: PathBuf },
    WithReference { reference: String },
}

impl RunMode {
    /// Resolves positional arguments into a mode, an instance id, and the
    /// command to run. Fails with [`Error::InvalidArguments`] before any
    /// remote call can happen.
    pub fn resolve(
        config: Option<PathBuf>,
        positionals: &[String],
    ) -> Result<(RunMode, String, Vec<String>)> {
        if let Some(config) = config {
            if positionals.len() > 1 {
                return Err(Error::InvalidArguments(
                    "with a config file, only the instance id should be provided".to_string(),
                ));
            }
            let id = positionals.first().cloned().unwrap_or_default();
            if id.is_empty() {
                return Err(Error::InvalidArguments(
                    "instance id must be provided".to_string(),
                ));
            }
            Ok((RunMode::WithConfig { config }, id, Vec::new()))
        } else {
            let reference = positionals.first().cloned().unwrap_or_default();
            if reference.is_empty() {
                return Err(Error::InvalidArguments(
                    "image ref must be provided".to_string(),
                ));
            }
            let id = positionals.get(1).cloned().unwrap_or_default();
            if id.is_empty() {
                return Err(Error::InvalidArguments(
                    "instance id must be provided".to_string(),
                ));
            }
            Ok((
                RunMode::WithReference { reference },
                id,
                positionals[2..].to_vec(),
            ))
        }
    }
}

/// One run, fully described. Built by the CLI layer, consumed by
/// [`Runner::run`](crate::Runner::run), immutable afterwards.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub id: String,
    pub mode: RunMode,
    /// Command and arguments for the task; may be empty when the config
    /// file supplies them.
    pub args: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub tty: bool,
    pub detach: bool,
    /// Remove the instance (with snapshot cleanup) after the run.
    pub remove: bool,
    pub null_io: bool,
    pub log_uri: Option<String>,
    pub fifo_dir: Option<PathBuf>,
    pub cgroup: Option<String>,
    pub platform: Option<String>,
    pub snapshotter: Option<String>,
    pub pid_file: Option<PathBuf>,
    pub checkpoint: Option<String>,
}

impl RunRequest {
    /// Local validation. Never issues a remote call.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidArguments(
                "instance id must be provided".to_string(),
            ));
        }
        if self.tty && self.null_io {
            return Err(Error::InvalidArguments(
                "tty and null-io cannot be used together".to_string(),
            ));
        }
        if self.tty && self.log_uri.is_some() {
            return Err(Error::InvalidArguments(
                "tty and log-uri cannot be used together".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn instance_spec(&self) -> InstanceSpec {
        InstanceSpec {
            id: self.id.clone(),
            root: match &self.mode {
                RunMode::WithConfig { config } => RootSource::ConfigFile(config.clone()),
                RunMode::WithReference { reference } => RootSource::Reference(reference.clone()),
            },
            args: self.args.clone(),
            mounts: self.mounts.clone(),
            snapshotter: self.snapshotter.clone(),
            cgroup: self.cgroup.clone(),
            platform: self.platform.clone(),
        }
    }

    /// Selects the I/O wiring for the task. `terminal_size` is present
    /// exactly when a console was acquired.
    pub(crate) fn io_mode(&self, terminal_size: Option<(u16, u16)>) -> IoMode {
        if self.null_io {
            IoMode::Null
        } else if let Some(uri) = &self.log_uri {
            IoMode::LogUri(uri.clone())
        } else if let Some((cols, rows)) = terminal_size {
            IoMode::Terminal { cols, rows }
        } else {
            IoMode::Fifo {
                dir: self.fifo_dir.clone(),
            }
        }
    }

    pub(crate) fn task_opts(&self) -> TaskOpts {
        TaskOpts {
            checkpoint: self.checkpoint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn reference_mode_splits_ref_id_and_command() {
        let (mode, id, command) =
            RunMode::resolve(None, &strings(&["img", "c1", "echo", "hi"])).unwrap();
        assert_eq!(
            mode,
            RunMode::WithReference {
                reference: "img".to_string()
            }
        );
        assert_eq!(id, "c1");
        assert_eq!(command, strings(&["echo", "hi"]));
    }

    #[test]
    fn missing_reference_is_invalid() {
        let err = RunMode::resolve(None, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(m) if m.contains("image ref")));
    }

    #[test]
    fn missing_id_is_invalid() {
        let err = RunMode::resolve(None, &strings(&["img"])).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(m) if m.contains("instance id")));
    }

    #[test]
    fn config_mode_takes_only_the_id() {
        let (mode, id, command) =
            RunMode::resolve(Some(PathBuf::from("spec.json")), &strings(&["c1"])).unwrap();
        assert_eq!(
            mode,
            RunMode::WithConfig {
                config: PathBuf::from("spec.json")
            }
        );
        assert_eq!(id, "c1");
        assert!(command.is_empty());
    }

    #[test]
    fn config_mode_rejects_extra_positionals() {
        let err = RunMode::resolve(Some(PathBuf::from("spec.json")), &strings(&["c1", "extra"]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(m) if m.contains("config file")));
    }

    #[test]
    fn config_mode_still_requires_an_id() {
        let err = RunMode::resolve(Some(PathBuf::from("spec.json")), &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(m) if m.contains("instance id")));
    }

    fn request() -> RunRequest {
        RunRequest {
            id: "c1".to_string(),
            mode: RunMode::WithReference {
                reference: "img".to_string(),
            },
            args: strings(&["true"]),
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
    fn tty_conflicts_with_null_io() {
        let mut req = request();
        req.tty = true;
        req.null_io = true;
        assert!(matches!(
            req.validate(),
            Err(Error::InvalidArguments(m)) if m.contains("null-io")
        ));
    }

    #[test]
    fn tty_conflicts_with_log_uri() {
        let mut req = request();
        req.tty = true;
        req.log_uri = Some("file:///tmp/log".to_string());
        assert!(matches!(
            req.validate(),
            Err(Error::InvalidArguments(m)) if m.contains("log-uri")
        ));
    }

    #[test]
    fn null_io_wins_io_selection() {
        let mut req = request();
        req.null_io = true;
        assert_eq!(req.io_mode(None), IoMode::Null);
    }

    #[test]
    fn terminal_size_selects_terminal_io() {
        let req = request();
        assert_eq!(
            req.io_mode(Some((80, 24))),
            IoMode::Terminal { cols: 80, rows: 24 }
        );
    }

    #[test]
    fn default_io_is_fifo_with_requested_dir() {
        let mut req = request();
        req.fifo_dir = Some(PathBuf::from("/run/fifos"));
        assert_eq!(
            req.io_mode(None),
            IoMode::Fifo {
                dir: Some(PathBuf::from("/run/fifos"))
            }
        );
    }
}
