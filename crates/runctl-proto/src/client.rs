//! The workload client trait and its wire types.
//!
//! The workload-management service itself is an external collaborator. The
//! orchestrator only sees this RPC-style interface; backends (in-process,
//! gRPC, whatever) implement it.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{ClientError, Error};
use crate::mount::MountSpec;

/// Where the instance's filesystem and process definition come from.
///
/// Exactly one of the two applies to a run; the choice is made once at
/// argument-validation time and never re-inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootSource {
    /// An image reference or rootfs path, resolved by the backing service.
    Reference(String),
    /// A runtime-spec config file describing the process directly.
    ConfigFile(PathBuf),
}

/// Everything needed to materialize an instance.
///
/// Options the orchestrator does not interpret (mounts, snapshotter, cgroup,
/// platform) pass through to the backing service untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub id: String,
    pub root: RootSource,
    /// Process arguments; may be empty when the config file supplies them.
    pub args: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub snapshotter: Option<String>,
    pub cgroup: Option<String>,
    pub platform: Option<String>,
}

/// A created, not-yet-running workload environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
}

/// The runnable process bound to an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub instance_id: String,
    /// OS process id of the task's init process, available from creation.
    pub pid: u32,
}

/// How the task's standard streams are wired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoMode {
    /// All streams bound to a discard sink.
    Null,
    /// Streams piped through named pipes rooted at the given directory.
    Fifo { dir: Option<PathBuf> },
    /// Streams carried by the caller's terminal.
    Terminal { cols: u16, rows: u16 },
    /// Output appended to a logging target.
    LogUri(String),
}

#[derive(Debug, Clone, Default)]
pub struct TaskOpts {
    /// Checkpoint to restore the task from, if the backend supports it.
    pub checkpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOpts {
    /// Also discard the instance's snapshot.
    pub snapshot_cleanup: bool,
}

/// Terminal exit event for a task. Produced at most once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
    /// Set when the wait itself failed rather than the task exiting.
    pub error: Option<String>,
}

impl ExitStatus {
    pub fn exited(code: u32) -> Self {
        Self { code, error: None }
    }

    /// Decodes the event into its exit code. A carried error is fatal to
    /// the run.
    pub fn result(&self) -> Result<u32, Error> {
        match &self.error {
            Some(message) => Err(Error::ExitDecode(message.clone())),
            None => Ok(self.code),
        }
    }
}

/// RPC-style interface to the workload-management service.
///
/// Implementations are not assumed idempotent; callers never retry. The pid
/// of a task is carried on its [`TaskHandle`] rather than fetched with a
/// separate round trip.
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ClientError>;

    async fn delete_instance(
        &self,
        instance: &Instance,
        opts: DeleteOpts,
    ) -> Result<(), ClientError>;

    async fn create_task(
        &self,
        instance: &Instance,
        io: &IoMode,
        opts: &TaskOpts,
    ) -> Result<TaskHandle, ClientError>;

    async fn start_task(&self, task: &TaskHandle) -> Result<(), ClientError>;

    /// Returns a channel that yields the task's single terminal exit event.
    async fn wait_task(
        &self,
        task: &TaskHandle,
    ) -> Result<oneshot::Receiver<ExitStatus>, ClientError>;

    /// Deletes the task and returns its recorded exit status.
    async fn delete_task(&self, task: &TaskHandle) -> Result<ExitStatus, ClientError>;

    /// Delivers a host signal to the task.
    async fn kill_task(&self, task: &TaskHandle, signal: i32) -> Result<(), ClientError>;

    /// Propagates a terminal size change to the task.
    async fn resize_task(&self, task: &TaskHandle, cols: u16, rows: u16)
    -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exit_decodes_to_code() {
        assert_eq!(ExitStatus::exited(7).result().unwrap(), 7);
    }

    #[test]
    fn carried_error_is_fatal() {
        let status = ExitStatus {
            code: 255,
            error: Some("wait failed".to_string()),
        };
        assert!(matches!(status.result(), Err(Error::ExitDecode(m)) if m == "wait failed"));
    }
}
