//! Error taxonomy for the run lifecycle.
//!
//! Local validation and parse errors never trigger remote calls; client
//! errors are surfaced verbatim and never retried. A non-zero workload exit
//! code is not an error here — it travels as `RunOutcome` in runctl-core so
//! the numeric code and diagnostic messages stay orthogonal.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Local argument validation failed. No remote calls were issued.
    #[error("{0}")]
    InvalidArguments(String),

    /// A mount token was not a well-formed `key=val` record.
    #[error("invalid mount specification: {raw:?}")]
    MalformedMountString { raw: String },

    /// A mount token used a key outside the recognized set.
    #[error("mount option {key:?} not supported")]
    UnsupportedMountOption { key: String },

    /// Console acquisition or the raw-mode switch failed.
    #[error("terminal: {0}")]
    Terminal(String),

    /// A workload client call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed to write pid file {path:?}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The exit-status event carried an error instead of a clean code.
    #[error("decoding exit status: {0}")]
    ExitDecode(String),
}

/// Failure reported by a [`WorkloadClient`](crate::WorkloadClient)
/// implementation. The orchestrator passes these through without retrying:
/// remote operations are not assumed idempotent.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{op}: {message}")]
    Failed { op: &'static str, message: String },

    #[error("{kind} {id:?} not found")]
    NotFound { kind: &'static str, id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_is_transparent() {
        let err = Error::from(ClientError::Failed {
            op: "create instance",
            message: "backend unavailable".to_string(),
        });
        assert_eq!(err.to_string(), "create instance: backend unavailable");
    }

    #[test]
    fn invalid_arguments_carries_only_the_message() {
        let err = Error::InvalidArguments("image ref must be provided".to_string());
        assert_eq!(err.to_string(), "image ref must be provided");
    }
}
