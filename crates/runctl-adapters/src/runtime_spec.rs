//! Runtime-spec config file loading.
//!
//! Only the process section is interpreted; the rest of the document passes
//! through the orchestrator untouched anyway.

use std::path::Path;

use runctl_proto::ClientError;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default)]
    pub process: Option<ProcessSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessSpec {
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` strings, runtime-spec style.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl RuntimeSpec {
    pub fn from_file(path: &Path) -> Result<Self, ClientError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ClientError::Io {
            op: "read config file",
            source,
        })?;
        serde_json::from_str(&raw).map_err(|err| ClientError::Failed {
            op: "parse config file",
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_the_process_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ociVersion":"1.0.2","process":{{"args":["echo","hi"],"env":["A=1"],"cwd":"/tmp"}}}}"#
        )
        .unwrap();
        let spec = RuntimeSpec::from_file(file.path()).unwrap();
        let process = spec.process.unwrap();
        assert_eq!(process.args, vec!["echo", "hi"]);
        assert_eq!(process.env, vec!["A=1"]);
        assert_eq!(process.cwd.as_deref(), Some("/tmp"));
    }

    #[test]
    fn tolerates_a_missing_process_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ociVersion":"1.0.2"}}"#).unwrap();
        let spec = RuntimeSpec::from_file(file.path()).unwrap();
        assert!(spec.process.is_none());
    }

    #[test]
    fn invalid_json_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(RuntimeSpec::from_file(file.path()).is_err());
    }
}
