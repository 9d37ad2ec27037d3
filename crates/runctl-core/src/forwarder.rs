//! Host-to-task event relays for attached runs.
//!
//! A non-terminal attached run forwards SIGINT, SIGTERM, and SIGHUP to the
//! task; a terminal run instead tracks SIGWINCH and pushes the new size.
//! Each relay is a single tokio task that is aborted once the exit event
//! arrives, so a relay can never outlive its run.

use std::sync::Arc;

use runctl_proto::{TaskHandle, WorkloadClient};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running relay task. Dropping the handle does not stop it; call
/// [`Forwarder::stop`].
pub struct Forwarder {
    handle: JoinHandle<()>,
}

impl Forwarder {
    /// Forwards termination-class host signals to the task.
    pub fn spawn_signal_relay(client: Arc<dyn WorkloadClient>, task: TaskHandle) -> Self {
        let handle = tokio::spawn(async move {
            let Ok(mut interrupt) = signal(SignalKind::interrupt()) else {
                warn!("cannot listen for SIGINT, signal forwarding disabled");
                return;
            };
            let Ok(mut terminate) = signal(SignalKind::terminate()) else {
                warn!("cannot listen for SIGTERM, signal forwarding disabled");
                return;
            };
            let Ok(mut hangup) = signal(SignalKind::hangup()) else {
                warn!("cannot listen for SIGHUP, signal forwarding disabled");
                return;
            };

            loop {
                let kind = tokio::select! {
                    r = interrupt.recv() => r.map(|()| SignalKind::interrupt()),
                    r = terminate.recv() => r.map(|()| SignalKind::terminate()),
                    r = hangup.recv() => r.map(|()| SignalKind::hangup()),
                };
                let Some(kind) = kind else { break };
                debug!(signal = kind.as_raw_value(), "forwarding signal");
                if let Err(err) = client.kill_task(&task, kind.as_raw_value()).await {
                    warn!(%err, "signal forward failed");
                }
            }
        });
        Self { handle }
    }

    /// Pushes the initial terminal size, then follows SIGWINCH.
    pub fn spawn_resize_relay(
        client: Arc<dyn WorkloadClient>,
        task: TaskHandle,
        initial: (u16, u16),
    ) -> Self {
        let handle = tokio::spawn(async move {
            let (cols, rows) = initial;
            if let Err(err) = client.resize_task(&task, cols, rows).await {
                warn!(%err, "initial resize failed");
            }

            let Ok(mut winch) = signal(SignalKind::window_change()) else {
                warn!("cannot listen for SIGWINCH, resize forwarding disabled");
                return;
            };
            while winch.recv().await.is_some() {
                match crossterm::terminal::size() {
                    Ok((cols, rows)) => {
                        if let Err(err) = client.resize_task(&task, cols, rows).await {
                            warn!(%err, "resize forward failed");
                        }
                    }
                    Err(err) => warn!(%err, "query terminal size failed"),
                }
            }
        });
        Self { handle }
    }

    /// Stops the relay. The underlying task is aborted, not joined; pending
    /// forwards may be dropped.
    pub fn stop(self) {
        self.handle.abort();
    }
}
