//! runctl command-line interface.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use runctl_adapters::ProcClient;
use runctl_core::{RunMode, RunOutcome, RunRequest, Runner, RunnerConfig};
use runctl_proto::parse_mount;
use tracing::debug;

#[derive(Parser)]
#[command(name = "runctl", version, about = "Run a workload instance to completion")]
struct Cli {
    /// Path to the runner configuration file.
    #[arg(long, global = true, default_value = "runctl.yml")]
    runner_config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an instance, run its task to completion, and clean up.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Runtime-spec config file; with this, only the instance id is
    /// positional.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remove the instance (and its snapshot) after the run.
    #[arg(long)]
    rm: bool,

    /// Allocate a terminal for the task.
    #[arg(short = 't', long)]
    tty: bool,

    /// Detach after starting the task.
    #[arg(short = 'd', long)]
    detach: bool,

    /// Discard all task output.
    #[arg(long)]
    null_io: bool,

    /// Send task output to a logging target, e.g. file:///tmp/task.log.
    #[arg(long)]
    log_uri: Option<String>,

    /// Directory for the task's I/O pipes.
    #[arg(long)]
    fifo_dir: Option<PathBuf>,

    /// Mount specification, e.g. type=bind,src=/a,dst=/b,options=rbind:ro.
    /// May repeat.
    #[arg(long = "mount")]
    mounts: Vec<String>,

    /// Cgroup path for the task.
    #[arg(long)]
    cgroup: Option<String>,

    /// Platform to select when resolving the reference.
    #[arg(long)]
    platform: Option<String>,

    /// Snapshotter backing the instance.
    #[arg(long)]
    snapshotter: Option<String>,

    /// File to write the task pid to before start.
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Checkpoint to restore the task from.
    #[arg(long)]
    checkpoint: Option<String>,

    /// Image reference (or just the instance id with --config), instance
    /// id, then the command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => run(args, &cli.runner_config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // Task output owns stdout; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: RunArgs, config_path: &Path) -> anyhow::Result<()> {
    let (mode, id, command) = RunMode::resolve(args.config, &args.args)?;
    let mounts = args
        .mounts
        .iter()
        .map(|raw| parse_mount(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut req = RunRequest {
        id,
        mode,
        args: command,
        mounts,
        tty: args.tty,
        detach: args.detach,
        remove: args.rm,
        null_io: args.null_io,
        log_uri: args.log_uri,
        fifo_dir: args.fifo_dir,
        cgroup: args.cgroup,
        platform: args.platform,
        snapshotter: args.snapshotter,
        pid_file: args.pid_file,
        checkpoint: args.checkpoint,
    };

    if config_path.exists() {
        let config = RunnerConfig::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        config.apply(&mut req);
    }

    let runner = Runner::new(Arc::new(ProcClient::new()));
    match runner.run(&req).await? {
        RunOutcome::Detached { instance_id } => {
            debug!(instance = %instance_id, "left running detached");
            Ok(())
        }
        RunOutcome::Exited { code: 0 } => Ok(()),
        // A non-zero task exit propagates as the process exit code, with
        // no error message of its own.
        outcome => std::process::exit(outcome.exit_code()),
    }
}
