//! # runctl-core
//!
//! Core run-lifecycle orchestration for runctl.
//!
//! This crate provides:
//! - The [`Runner`] state machine sequencing instance creation, task
//!   creation, optional attachment, start, wait, and teardown
//! - Request validation and the dual positional-argument interpretation
//! - Console acquisition with guaranteed raw-mode restoration
//! - Signal and resize forwarding for attached runs
//! - The deferred cleanup stack
//! - Runner configuration loading

mod cleanup;
mod config;
mod console;
mod forwarder;
mod request;
mod runner;
pub mod testing;

pub use cleanup::{Cleanup, CleanupStack};
pub use config::{ConfigError, RunnerConfig};
pub use console::Console;
pub use forwarder::Forwarder;
pub use request::{RunMode, RunRequest};
pub use runner::{RunOutcome, Runner};
