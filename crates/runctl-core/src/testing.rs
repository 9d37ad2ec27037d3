//! Scripted in-memory client for exercising the runner without a backend.
//!
//! Records every call in order and can be told to fail at one chosen
//! operation, which is enough to drive the lifecycle through its error
//! paths deterministically.

use std::sync::Mutex;

use async_trait::async_trait;
use runctl_proto::{
    ClientError, DeleteOpts, ExitStatus, Instance, InstanceSpec, IoMode, TaskHandle, TaskOpts,
    WorkloadClient,
};
use tokio::sync::oneshot;

/// Fixed pid reported for every scripted task.
pub const SCRIPTED_PID: u32 = 4242;

/// One recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateInstance {
        id: String,
    },
    DeleteInstance {
        instance_id: String,
        snapshot_cleanup: bool,
    },
    CreateTask {
        instance_id: String,
        io: IoMode,
    },
    StartTask {
        instance_id: String,
    },
    WaitTask {
        instance_id: String,
    },
    DeleteTask {
        instance_id: String,
    },
    KillTask {
        instance_id: String,
        signal: i32,
    },
    ResizeTask {
        instance_id: String,
        cols: u16,
        rows: u16,
    },
}

/// Operation at which the scripted client fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    CreateInstance,
    CreateTask,
    StartTask,
    DeleteTask,
}

pub struct ScriptedClient {
    exit: ExitStatus,
    fail_at: Option<FailAt>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedClient {
    /// A client whose task exits cleanly with `code`.
    pub fn exiting(code: u32) -> Self {
        Self::with_exit(ExitStatus::exited(code))
    }

    pub fn with_exit(exit: ExitStatus) -> Self {
        Self {
            exit,
            fail_at: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client that fails at the given operation; the task would exit with
    /// `code` if it got that far.
    pub fn failing_at(fail_at: FailAt, code: u32) -> Self {
        Self {
            exit: ExitStatus::exited(code),
            fail_at: Some(fail_at),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls recorded so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Call>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: Call) {
        self.lock().push(call);
    }

    fn fail_if(&self, at: FailAt, op: &'static str) -> Result<(), ClientError> {
        if self.fail_at == Some(at) {
            return Err(ClientError::Failed {
                op,
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadClient for ScriptedClient {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ClientError> {
        self.record(Call::CreateInstance {
            id: spec.id.clone(),
        });
        self.fail_if(FailAt::CreateInstance, "create instance")?;
        Ok(Instance {
            id: spec.id.clone(),
        })
    }

    async fn delete_instance(
        &self,
        instance: &Instance,
        opts: DeleteOpts,
    ) -> Result<(), ClientError> {
        self.record(Call::DeleteInstance {
            instance_id: instance.id.clone(),
            snapshot_cleanup: opts.snapshot_cleanup,
        });
        Ok(())
    }

    async fn create_task(
        &self,
        instance: &Instance,
        io: &IoMode,
        _opts: &TaskOpts,
    ) -> Result<TaskHandle, ClientError> {
        self.record(Call::CreateTask {
            instance_id: instance.id.clone(),
            io: io.clone(),
        });
        self.fail_if(FailAt::CreateTask, "create task")?;
        Ok(TaskHandle {
            instance_id: instance.id.clone(),
            pid: SCRIPTED_PID,
        })
    }

    async fn start_task(&self, task: &TaskHandle) -> Result<(), ClientError> {
        self.record(Call::StartTask {
            instance_id: task.instance_id.clone(),
        });
        self.fail_if(FailAt::StartTask, "start task")?;
        Ok(())
    }

    async fn wait_task(
        &self,
        task: &TaskHandle,
    ) -> Result<oneshot::Receiver<ExitStatus>, ClientError> {
        self.record(Call::WaitTask {
            instance_id: task.instance_id.clone(),
        });
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(self.exit.clone());
        Ok(rx)
    }

    async fn delete_task(&self, task: &TaskHandle) -> Result<ExitStatus, ClientError> {
        self.record(Call::DeleteTask {
            instance_id: task.instance_id.clone(),
        });
        self.fail_if(FailAt::DeleteTask, "delete task")?;
        Ok(self.exit.clone())
    }

    async fn kill_task(&self, task: &TaskHandle, signal: i32) -> Result<(), ClientError> {
        self.record(Call::KillTask {
            instance_id: task.instance_id.clone(),
            signal,
        });
        Ok(())
    }

    async fn resize_task(
        &self,
        task: &TaskHandle,
        cols: u16,
        rows: u16,
    ) -> Result<(), ClientError> {
        self.record(Call::ResizeTask {
            instance_id: task.instance_id.clone(),
            cols,
            rows,
        });
        Ok(())
    }
}
