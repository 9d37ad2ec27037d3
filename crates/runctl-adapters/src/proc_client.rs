//! Local process backend.
//!
//! Implements the workload client against plain OS processes. The
//! create/start split is modeled with job control: the process is spawned
//! and immediately stopped with SIGSTOP at create time, then released with
//! SIGCONT on start. Terminal I/O goes through a pseudo-terminal via
//! `portable-pty`; the other modes wire the child's stdio directly.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::Mode;
use nix::unistd::{Pid, mkfifo};
use portable_pty::{CommandBuilder, MasterPty, PtyPair, PtySize, native_pty_system};
use runctl_proto::{
    ClientError, DeleteOpts, ExitStatus, Instance, InstanceSpec, IoMode, RootSource, TaskHandle,
    TaskOpts, WorkloadClient,
};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::debug;

use crate::runtime_spec::RuntimeSpec;

/// Resolved process definition for a created instance.
#[derive(Debug, Clone)]
struct InstanceRecord {
    command: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl InstanceRecord {
    fn from_spec(spec: &InstanceSpec) -> Result<Self, ClientError> {
        let record = match &spec.root {
            RootSource::Reference(_) => Self {
                command: spec.args.clone(),
                env: Vec::new(),
                cwd: None,
            },
            RootSource::ConfigFile(path) => {
                let process = RuntimeSpec::from_file(path)?.process.unwrap_or_default();
                let command = if spec.args.is_empty() {
                    process.args
                } else {
                    spec.args.clone()
                };
                let env = process
                    .env
                    .iter()
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                Self {
                    command,
                    env,
                    cwd: process.cwd.map(PathBuf::from),
                }
            }
        };
        if record.command.is_empty() {
            return Err(ClientError::Failed {
                op: "create instance",
                message: "no command specified".to_string(),
            });
        }
        Ok(record)
    }
}

enum Proc {
    Std(tokio::process::Child),
    Pty(Box<dyn portable_pty::Child + Send>),
}

struct TaskState {
    proc: Option<Proc>,
    master: Option<Box<dyn MasterPty + Send>>,
    status: Option<ExitStatus>,
}

/// Workload client that runs tasks as local processes.
#[derive(Default)]
pub struct ProcClient {
    instances: Mutex<HashMap<String, InstanceRecord>>,
    tasks: Mutex<HashMap<String, Arc<Mutex<TaskState>>>>,
}

impl ProcClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn task_state(&self, id: &str) -> Result<Arc<Mutex<TaskState>>, ClientError> {
        lock(&self.tasks)
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "task",
                id: id.to_string(),
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl WorkloadClient for ProcClient {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance, ClientError> {
        let record = InstanceRecord::from_spec(spec)?;
        let mut instances = lock(&self.instances);
        if instances.contains_key(&spec.id) {
            return Err(ClientError::Failed {
                op: "create instance",
                message: format!("instance {:?} already exists", spec.id),
            });
        }
        instances.insert(spec.id.clone(), record);
        Ok(Instance {
            id: spec.id.clone(),
        })
    }

    async fn delete_instance(
        &self,
        instance: &Instance,
        _opts: DeleteOpts,
    ) -> Result<(), ClientError> {
        match lock(&self.instances).remove(&instance.id) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound {
                kind: "instance",
                id: instance.id.clone(),
            }),
        }
    }

    async fn create_task(
        &self,
        instance: &Instance,
        io: &IoMode,
        opts: &TaskOpts,
    ) -> Result<TaskHandle, ClientError> {
        if opts.checkpoint.is_some() {
            return Err(ClientError::Failed {
                op: "create task",
                message: "checkpoint restore is not supported by the process backend".to_string(),
            });
        }
        let record = lock(&self.instances)
            .get(&instance.id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "instance",
                id: instance.id.clone(),
            })?;
        if lock(&self.tasks).contains_key(&instance.id) {
            return Err(ClientError::Failed {
                op: "create task",
                message: format!("task for {:?} already exists", instance.id),
            });
        }

        let (proc, master, pid) = match io {
            IoMode::Terminal { cols, rows } => {
                let (child, master) = spawn_pty(&record, *cols, *rows)?;
                let pid = child.process_id().ok_or(ClientError::Failed {
                    op: "create task",
                    message: "spawned task has no pid".to_string(),
                })?;
                (Proc::Pty(child), Some(master), pid)
            }
            other => {
                let child = spawn_std(&record, other, &instance.id)?;
                let pid = child.id().ok_or(ClientError::Failed {
                    op: "create task",
                    message: "spawned task has no pid".to_string(),
                })?;
                (Proc::Std(child), None, pid)
            }
        };

        // Stopped until start. A command that finishes before the stop
        // lands is not an error.
        signal_pid(pid, Signal::SIGSTOP)?;
        debug!(instance = %instance.id, pid, "task created");

        lock(&self.tasks).insert(
            instance.id.clone(),
            Arc::new(Mutex::new(TaskState {
                proc: Some(proc),
                master,
                status: None,
            })),
        );
        Ok(TaskHandle {
            instance_id: instance.id.clone(),
            pid,
        })
    }

    async fn start_task(&self, task: &TaskHandle) -> Result<(), ClientError> {
        self.task_state(&task.instance_id)?;
        signal_pid(task.pid, Signal::SIGCONT)
    }

    async fn wait_task(
        &self,
        task: &TaskHandle,
    ) -> Result<oneshot::Receiver<ExitStatus>, ClientError> {
        let state = self.task_state(&task.instance_id)?;
        let proc = {
            let mut state = lock(&state);
            if let Some(status) = &state.status {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(status.clone());
                return Ok(rx);
            }
            state.proc.take().ok_or(ClientError::Failed {
                op: "wait task",
                message: "task is already being waited on".to_string(),
            })?
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let status = wait_proc(proc).await;
            lock(&state).status = Some(status.clone());
            let _ = tx.send(status);
        });
        Ok(rx)
    }

    async fn delete_task(&self, task: &TaskHandle) -> Result<ExitStatus, ClientError> {
        let state = lock(&self.tasks).remove(&task.instance_id).ok_or_else(|| {
            ClientError::NotFound {
                kind: "task",
                id: task.instance_id.clone(),
            }
        })?;
        let (status, proc) = {
            let mut state = lock(&state);
            (state.status.clone(), state.proc.take())
        };
        if let Some(status) = status {
            return Ok(status);
        }

        // Still running (or never started): the delete is forceful.
        signal_pid(task.pid, Signal::SIGKILL)?;
        if let Some(proc) = proc {
            reap(proc);
        }
        Ok(ExitStatus::exited(137))
    }

    async fn kill_task(&self, task: &TaskHandle, signal: i32) -> Result<(), ClientError> {
        self.task_state(&task.instance_id)?;
        let signal = Signal::try_from(signal).map_err(|err| ClientError::Failed {
            op: "kill task",
            message: err.to_string(),
        })?;
        signal_pid(task.pid, signal)
    }

    async fn resize_task(
        &self,
        task: &TaskHandle,
        cols: u16,
        rows: u16,
    ) -> Result<(), ClientError> {
        let state = self.task_state(&task.instance_id)?;
        let state = lock(&state);
        match &state.master {
            Some(master) => master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|err| ClientError::Failed {
                    op: "resize task",
                    message: err.to_string(),
                }),
            None => {
                debug!(instance = %task.instance_id, "resize on non-terminal task, ignored");
                Ok(())
            }
        }
    }
}

/// Delivers a signal, treating an already-gone process as success.
fn signal_pid(pid: u32, signal: Signal) -> Result<(), ClientError> {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(ClientError::Failed {
            op: "signal task",
            message: err.to_string(),
        }),
    }
}

async fn wait_proc(proc: Proc) -> ExitStatus {
    match proc {
        Proc::Std(mut child) => match child.wait().await {
            Ok(status) => ExitStatus::exited(decode_exit(status)),
            Err(err) => ExitStatus {
                code: 255,
                error: Some(err.to_string()),
            },
        },
        Proc::Pty(mut child) => match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(status)) => ExitStatus::exited(status.exit_code()),
            Ok(Err(err)) => ExitStatus {
                code: 255,
                error: Some(err.to_string()),
            },
            Err(err) => ExitStatus {
                code: 255,
                error: Some(err.to_string()),
            },
        },
    }
}

fn decode_exit(status: std::process::ExitStatus) -> u32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        u32::try_from(code).unwrap_or(255)
    } else if let Some(sig) = status.signal() {
        128 + u32::try_from(sig).unwrap_or(0)
    } else {
        255
    }
}

/// Reaps a killed child off the calling path.
fn reap(proc: Proc) {
    match proc {
        Proc::Std(mut child) => {
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        Proc::Pty(mut child) => {
            tokio::task::spawn_blocking(move || {
                let _ = child.wait();
            });
        }
    }
}

fn spawn_std(
    record: &InstanceRecord,
    io_mode: &IoMode,
    id: &str,
) -> Result<tokio::process::Child, ClientError> {
    let mut cmd = Command::new(&record.command[0]);
    cmd.args(&record.command[1..]);
    for (key, value) in &record.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &record.cwd {
        cmd.current_dir(cwd);
    }

    match io_mode {
        IoMode::Null => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
        IoMode::Fifo { dir } => {
            let dir = dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join(format!("runctl-{id}")));
            std::fs::create_dir_all(&dir).map_err(|source| ClientError::Io {
                op: "create fifo directory",
                source,
            })?;
            cmd.stdin(open_fifo(&dir.join("stdin"))?)
                .stdout(open_fifo(&dir.join("stdout"))?)
                .stderr(open_fifo(&dir.join("stderr"))?);
        }
        IoMode::LogUri(uri) => {
            let path = uri.strip_prefix("file://").unwrap_or(uri);
            let log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ClientError::Io {
                    op: "open log target",
                    source,
                })?;
            let stderr = log.try_clone().map_err(|source| ClientError::Io {
                op: "open log target",
                source,
            })?;
            cmd.stdin(Stdio::null()).stdout(log).stderr(stderr);
        }
        IoMode::Terminal { .. } => {
            return Err(ClientError::Failed {
                op: "create task",
                message: "terminal io requires a pty".to_string(),
            });
        }
    }

    cmd.spawn().map_err(|source| ClientError::Io {
        op: "spawn task",
        source,
    })
}

/// Creates the named pipe if needed and opens it read+write, so the open
/// never blocks waiting for a peer.
fn open_fifo(path: &Path) -> Result<std::fs::File, ClientError> {
    match mkfifo(path, Mode::from_bits_truncate(0o600)) {
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(err) => {
            return Err(ClientError::Failed {
                op: "create fifo",
                message: err.to_string(),
            });
        }
    }
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| ClientError::Io {
            op: "open fifo",
            source,
        })
}

type PtyChild = Box<dyn portable_pty::Child + Send>;

fn spawn_pty(
    record: &InstanceRecord,
    cols: u16,
    rows: u16,
) -> Result<(PtyChild, Box<dyn MasterPty + Send>), ClientError> {
    let pty_system = native_pty_system();
    let PtyPair { master, slave } = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| ClientError::Failed {
            op: "open pty",
            message: err.to_string(),
        })?;

    let mut builder = CommandBuilder::new(&record.command[0]);
    builder.args(&record.command[1..]);
    for (key, value) in &record.env {
        builder.env(key, value);
    }
    if let Some(cwd) = &record.cwd {
        builder.cwd(cwd);
    }
    builder.env("TERM", "xterm-256color");

    let child = slave
        .spawn_command(builder)
        .map_err(|err| ClientError::Failed {
            op: "spawn task",
            message: err.to_string(),
        })?;

    let reader = master
        .try_clone_reader()
        .map_err(|err| ClientError::Failed {
            op: "open pty",
            message: err.to_string(),
        })?;
    let mut writer = master.take_writer().map_err(|err| ClientError::Failed {
        op: "open pty",
        message: err.to_string(),
    })?;

    // Drop the slave so the reader sees EOF when the child exits.
    drop(slave);

    // Output pump, exits on EOF.
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let mut stdout = io::stdout();
                    if stdout.write_all(&buf[..n]).and_then(|()| stdout.flush()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(%err, "pty reader error");
                    break;
                }
            }
        }
    });

    // Input pump, ends on stdin EOF.
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if writer.write_all(&buf[..n]).and_then(|()| writer.flush()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    });

    Ok((child, master))
}
