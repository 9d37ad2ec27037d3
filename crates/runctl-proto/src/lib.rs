//! # runctl-proto
//!
//! Shared types, error definitions, and the workload client trait for runctl.
//!
//! This crate provides the foundational abstractions used across all runctl
//! crates, including:
//! - The [`WorkloadClient`] trait, the RPC-style seam to the workload service
//! - Mount specification parsing
//! - Instance, task, and exit-status types
//! - Common error types

mod client;
mod error;
mod mount;

pub use client::{
    DeleteOpts, ExitStatus, Instance, InstanceSpec, IoMode, RootSource, TaskHandle, TaskOpts,
    WorkloadClient,
};
pub use error::{ClientError, Error, Result};
pub use mount::{MountSpec, parse_mount};
