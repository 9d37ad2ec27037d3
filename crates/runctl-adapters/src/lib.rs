//! # runctl-adapters
//!
//! Backend implementations of the workload client interface. The only
//! backend today is [`ProcClient`], which runs tasks as local OS processes
//! and models the create/start split with job control signals.

mod proc_client;
mod runtime_spec;

pub use proc_client::ProcClient;
pub use runtime_spec::{ProcessSpec, RuntimeSpec};
