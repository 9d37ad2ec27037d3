//! Caller-terminal control for attached terminal runs.
//!
//! Raw mode is entered before the task is created and must be restored no
//! matter how the run ends. The restore lives in a scope guard so an early
//! return or panic between `set_raw` and `reset` still puts the terminal
//! back.

use std::io::{IsTerminal, stdout};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use runctl_proto::{Error, Result};
use scopeguard::ScopeGuard;
use tracing::debug;

fn restore(_: ()) {
    let _ = disable_raw_mode();
}

/// Handle on the caller's terminal while a task is attached to it.
pub struct Console {
    guard: Option<ScopeGuard<(), fn(())>>,
    cols: u16,
    rows: u16,
}

impl Console {
    /// Acquires the current terminal. Fails with [`Error::Terminal`] when
    /// stdout is not a tty, before any remote resource exists.
    pub fn current() -> Result<Self> {
        if !stdout().is_terminal() {
            return Err(Error::Terminal(
                "stdout is not a terminal, cannot allocate a tty".to_string(),
            ));
        }
        let (cols, rows) =
            size().map_err(|err| Error::Terminal(format!("query terminal size: {err}")))?;
        Ok(Self {
            guard: None,
            cols,
            rows,
        })
    }

    /// Puts the terminal into raw mode and arms the restore guard.
    pub fn set_raw(&mut self) -> Result<()> {
        enable_raw_mode().map_err(|err| Error::Terminal(format!("enable raw mode: {err}")))?;
        self.guard = Some(scopeguard::guard((), restore as fn(())));
        Ok(())
    }

    /// Restores the terminal. Safe to call more than once.
    pub fn reset(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            debug!("terminal restored");
        }
    }

    /// Current size, re-queried; falls back to the size captured at
    /// acquisition when the query fails mid-run.
    pub fn size(&self) -> (u16, u16) {
        size().unwrap_or((self.cols, self.rows))
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.reset();
    }
}
