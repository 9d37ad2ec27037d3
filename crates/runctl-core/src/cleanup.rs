//! Deferred cleanup.
//!
//! Remote resources are registered for teardown as soon as they exist, then
//! individually disarmed once the normal path has taken ownership of them.
//! Whatever is still registered when the run ends is released in reverse
//! registration order, and failures are logged rather than propagated so a
//! late cleanup error can never mask the run's real outcome. A stack that
//! is dropped still holding actions (the run body panicked or was
//! cancelled) drains them on a detached task.

use std::sync::Arc;

use runctl_proto::{DeleteOpts, Instance, TaskHandle, WorkloadClient};
use tracing::{debug, warn};

/// One registered teardown action.
#[derive(Debug, Clone)]
pub enum Cleanup {
    DeleteInstance {
        instance: Instance,
        snapshot_cleanup: bool,
    },
    DeleteTask {
        task: TaskHandle,
    },
}

/// LIFO stack of teardown actions for a single run.
pub struct CleanupStack {
    client: Arc<dyn WorkloadClient>,
    actions: Vec<Cleanup>,
}

impl CleanupStack {
    pub fn new(client: Arc<dyn WorkloadClient>) -> Self {
        Self {
            client,
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: Cleanup) {
        self.actions.push(action);
    }

    /// Removes a registered task deletion once the normal path has deleted
    /// the task itself.
    pub fn disarm_task(&mut self, task: &TaskHandle) {
        self.actions.retain(|action| {
            !matches!(action, Cleanup::DeleteTask { task: t } if t == task)
        });
    }

    /// Runs every remaining action, newest first. Errors are logged and
    /// swallowed; the stack is empty afterwards.
    pub async fn run(&mut self) {
        drain(std::mem::take(&mut self.actions), self.client.as_ref()).await;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if self.actions.is_empty() {
            return;
        }
        // The run body never reached the explicit drain; a panic or
        // cancellation abandoned it mid-flight.
        let actions = std::mem::take(&mut self.actions);
        let client = Arc::clone(&self.client);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                drain(actions, client.as_ref()).await;
            });
        } else {
            warn!(remaining = actions.len(), "cleanup abandoned outside a runtime");
        }
    }
}

async fn drain(mut actions: Vec<Cleanup>, client: &dyn WorkloadClient) {
    while let Some(action) = actions.pop() {
        match action {
            Cleanup::DeleteTask { task } => {
                if let Err(err) = client.delete_task(&task).await {
                    debug!(instance = %task.instance_id, %err, "deferred task delete failed");
                }
            }
            Cleanup::DeleteInstance {
                instance,
                snapshot_cleanup,
            } => {
                let opts = DeleteOpts { snapshot_cleanup };
                if let Err(err) = client.delete_instance(&instance, opts).await {
                    warn!(instance = %instance.id, %err, "deferred instance delete failed");
                }
            }
        }
    }
}
