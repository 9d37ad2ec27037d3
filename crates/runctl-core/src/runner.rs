//! The run lifecycle state machine.
//!
//! One call to [`Runner::run`] drives a workload from nothing to either a
//! detached running task or a final exit code, registering every remote
//! resource for deferred teardown the moment it exists.

use std::path::Path;
use std::sync::Arc;

use runctl_proto::{Error, Result, WorkloadClient};
use tracing::{debug, info};

use crate::cleanup::{Cleanup, CleanupStack};
use crate::console::Console;
use crate::forwarder::Forwarder;
use crate::request::RunRequest;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The task was started and left running.
    Detached { instance_id: String },
    /// The task ran to completion with this exit code.
    Exited { code: u32 },
}

impl RunOutcome {
    /// The process exit code the caller should propagate.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Detached { .. } => 0,
            RunOutcome::Exited { code } => {
                i32::try_from(*code).unwrap_or(i32::MAX)
            }
        }
    }
}

/// Drives single runs against a [`WorkloadClient`].
pub struct Runner {
    client: Arc<dyn WorkloadClient>,
}

impl Runner {
    pub fn new(client: Arc<dyn WorkloadClient>) -> Self {
        Self { client }
    }

    /// Runs the request to completion. Deferred cleanup executes whether
    /// the run succeeds or fails partway; the stack's drop drains anything
    /// left if the body never returns at all.
    pub async fn run(&self, req: &RunRequest) -> Result<RunOutcome> {
        let mut cleanup = CleanupStack::new(Arc::clone(&self.client));
        let outcome = self.run_inner(req, &mut cleanup).await;
        cleanup.run().await;
        outcome
    }

    async fn run_inner(
        &self,
        req: &RunRequest,
        cleanup: &mut CleanupStack,
    ) -> Result<RunOutcome> {
        req.validate()?;

        // Terminal acquisition happens first so a headless invocation fails
        // before any remote resource exists.
        let mut console = if req.tty {
            let mut console = Console::current()?;
            console.set_raw()?;
            Some(console)
        } else {
            None
        };

        let instance = self.client.create_instance(&req.instance_spec()).await?;
        debug!(instance = %instance.id, "instance created");
        if req.remove && !req.detach {
            cleanup.push(Cleanup::DeleteInstance {
                instance: instance.clone(),
                snapshot_cleanup: true,
            });
        }

        let io = req.io_mode(console.as_ref().map(Console::size));
        let task = self
            .client
            .create_task(&instance, &io, &req.task_opts())
            .await?;
        debug!(instance = %instance.id, pid = task.pid, "task created");

        // Wait subscription precedes start so the exit event cannot be
        // missed, however fast the task finishes.
        let status_rx = if req.detach {
            None
        } else {
            cleanup.push(Cleanup::DeleteTask { task: task.clone() });
            Some(self.client.wait_task(&task).await?)
        };

        if let Some(path) = &req.pid_file {
            write_pid_file(path, task.pid)?;
        }

        self.client.start_task(&task).await?;
        info!(instance = %instance.id, pid = task.pid, "task started");

        let Some(status_rx) = status_rx else {
            return Ok(RunOutcome::Detached {
                instance_id: instance.id,
            });
        };

        let forwarder = match &console {
            Some(console) => Forwarder::spawn_resize_relay(
                Arc::clone(&self.client),
                task.clone(),
                console.size(),
            ),
            None => Forwarder::spawn_signal_relay(Arc::clone(&self.client), task.clone()),
        };

        let status = status_rx.await;
        forwarder.stop();
        if let Some(console) = &mut console {
            console.reset();
        }
        let status = status.map_err(|_| {
            Error::ExitDecode("exit-status channel closed before the task exited".to_string())
        })?;

        let code = status.result()?;
        debug!(instance = %instance.id, code, "task exited");

        // The normal path deletes the task itself; the deferred entry is
        // disarmed so the delete runs exactly once.
        cleanup.disarm_task(&task);
        self.client.delete_task(&task).await?;

        Ok(RunOutcome::Exited { code })
    }
}

fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    std::fs::write(path, format!("{pid}\n")).map_err(|source| Error::PidFile {
        path: path.to_path_buf(),
        source,
    })
}
