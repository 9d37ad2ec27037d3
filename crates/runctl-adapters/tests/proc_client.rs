//! Process backend tests using real child processes.

use std::path::PathBuf;

use runctl_adapters::ProcClient;
use runctl_proto::{
    ClientError, DeleteOpts, InstanceSpec, IoMode, MountSpec, RootSource, TaskOpts, WorkloadClient,
};

fn spec(id: &str, args: &[&str]) -> InstanceSpec {
    InstanceSpec {
        id: id.to_string(),
        root: RootSource::Reference("local".to_string()),
        args: args.iter().map(|s| (*s).to_string()).collect(),
        mounts: Vec::<MountSpec>::new(),
        snapshotter: None,
        cgroup: None,
        platform: None,
    }
}

async fn run_to_exit(client: &ProcClient, id: &str, args: &[&str], io: IoMode) -> u32 {
    let instance = client.create_instance(&spec(id, args)).await.unwrap();
    let task = client
        .create_task(&instance, &io, &TaskOpts::default())
        .await
        .unwrap();
    let rx = client.wait_task(&task).await.unwrap();
    client.start_task(&task).await.unwrap();
    let status = rx.await.unwrap();
    let delete_status = client.delete_task(&task).await.unwrap();
    assert_eq!(status, delete_status);
    client
        .delete_instance(&instance, DeleteOpts::default())
        .await
        .unwrap();
    status.result().unwrap()
}

#[tokio::test]
async fn clean_exit_reports_zero() {
    let client = ProcClient::new();
    let code = run_to_exit(&client, "t-zero", &["sh", "-c", "exit 0"], IoMode::Null).await;
    assert_eq!(code, 0);
}

#[tokio::test]
async fn nonzero_exit_code_is_preserved() {
    let client = ProcClient::new();
    let code = run_to_exit(&client, "t-seven", &["sh", "-c", "exit 7"], IoMode::Null).await;
    assert_eq!(code, 7);
}

#[tokio::test]
async fn fifo_io_creates_the_pipes() {
    let dir = tempfile::tempdir().unwrap();
    let fifo_dir = dir.path().join("io");
    let client = ProcClient::new();
    let code = run_to_exit(
        &client,
        "t-fifo",
        &["sh", "-c", "echo hi"],
        IoMode::Fifo {
            dir: Some(fifo_dir.clone()),
        },
    )
    .await;
    assert_eq!(code, 0);

    use std::os::unix::fs::FileTypeExt;
    for name in ["stdin", "stdout", "stderr"] {
        let meta = std::fs::metadata(fifo_dir.join(name)).unwrap();
        assert!(meta.file_type().is_fifo(), "{name} is not a fifo");
    }
}

#[tokio::test]
async fn log_uri_captures_output() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("task.log");
    let client = ProcClient::new();
    let uri = format!("file://{}", log.display());
    let code = run_to_exit(
        &client,
        "t-log",
        &["sh", "-c", "echo logged"],
        IoMode::LogUri(uri),
    )
    .await;
    assert_eq!(code, 0);
    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.contains("logged"));
}

#[tokio::test]
async fn config_file_supplies_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(
        &config,
        r#"{"ociVersion":"1.0.2","process":{"args":["sh","-c","exit 3"]}}"#,
    )
    .unwrap();

    let client = ProcClient::new();
    let instance = client
        .create_instance(&InstanceSpec {
            id: "t-config".to_string(),
            root: RootSource::ConfigFile(config),
            args: vec![],
            mounts: vec![],
            snapshotter: None,
            cgroup: None,
            platform: None,
        })
        .await
        .unwrap();
    let task = client
        .create_task(&instance, &IoMode::Null, &TaskOpts::default())
        .await
        .unwrap();
    let rx = client.wait_task(&task).await.unwrap();
    client.start_task(&task).await.unwrap();
    assert_eq!(rx.await.unwrap().result().unwrap(), 3);
}

#[tokio::test]
async fn config_file_env_reaches_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(
        &config,
        r#"{"process":{"args":["sh","-c","test \"$MARKER\" = hello"],"env":["MARKER=hello"]}}"#,
    )
    .unwrap();

    let client = ProcClient::new();
    let instance = client
        .create_instance(&InstanceSpec {
            id: "t-env".to_string(),
            root: RootSource::ConfigFile(config),
            args: vec![],
            mounts: vec![],
            snapshotter: None,
            cgroup: None,
            platform: None,
        })
        .await
        .unwrap();
    let task = client
        .create_task(&instance, &IoMode::Null, &TaskOpts::default())
        .await
        .unwrap();
    let rx = client.wait_task(&task).await.unwrap();
    client.start_task(&task).await.unwrap();
    assert_eq!(rx.await.unwrap().result().unwrap(), 0);
}

#[tokio::test]
async fn terminal_task_sees_a_tty() {
    let client = ProcClient::new();
    let code = run_to_exit(
        &client,
        "t-tty",
        &["sh", "-c", "test -t 0 -a -t 1"],
        IoMode::Terminal { cols: 80, rows: 24 },
    )
    .await;
    assert_eq!(code, 0);
}

#[tokio::test]
async fn terminal_exit_code_round_trips_and_the_master_resizes() {
    let client = ProcClient::new();
    let instance = client
        .create_instance(&spec("t-pty", &["sh", "-c", "exit 5"]))
        .await
        .unwrap();
    let task = client
        .create_task(
            &instance,
            &IoMode::Terminal { cols: 80, rows: 24 },
            &TaskOpts::default(),
        )
        .await
        .unwrap();
    let rx = client.wait_task(&task).await.unwrap();

    // Resizing goes through the retained pty master.
    client.resize_task(&task, 120, 40).await.unwrap();

    client.start_task(&task).await.unwrap();
    assert_eq!(rx.await.unwrap().result().unwrap(), 5);
    let status = client.delete_task(&task).await.unwrap();
    assert_eq!(status.result().unwrap(), 5);
}

#[tokio::test]
async fn checkpoint_restore_is_rejected() {
    let client = ProcClient::new();
    let instance = client
        .create_instance(&spec("t-ckpt", &["sh", "-c", "exit 0"]))
        .await
        .unwrap();
    let err = client
        .create_task(
            &instance,
            &IoMode::Null,
            &TaskOpts {
                checkpoint: Some("chk-1".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Failed { .. }));
}

#[tokio::test]
async fn duplicate_instance_id_is_rejected() {
    let client = ProcClient::new();
    client
        .create_instance(&spec("t-dup", &["true"]))
        .await
        .unwrap();
    let err = client
        .create_instance(&spec("t-dup", &["true"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Failed { .. }));
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let client = ProcClient::new();
    let err = client.create_instance(&spec("t-empty", &[])).await.unwrap_err();
    assert!(matches!(err, ClientError::Failed { .. }));
}

#[tokio::test]
async fn missing_instance_is_not_found() {
    let client = ProcClient::new();
    let ghost = runctl_proto::Instance {
        id: "ghost".to_string(),
    };
    let err = client
        .create_task(&ghost, &IoMode::Null, &TaskOpts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotFound { kind: "instance", .. }));
}

#[tokio::test]
async fn missing_config_file_fails_instance_creation() {
    let client = ProcClient::new();
    let err = client
        .create_instance(&InstanceSpec {
            id: "t-noconf".to_string(),
            root: RootSource::ConfigFile(PathBuf::from("/nonexistent/config.json")),
            args: vec![],
            mounts: vec![],
            snapshotter: None,
            cgroup: None,
            platform: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Io { .. }));
}

#[tokio::test]
async fn forwarded_sigterm_ends_the_task() {
    let client = ProcClient::new();
    let instance = client
        .create_instance(&spec("t-term", &["sleep", "30"]))
        .await
        .unwrap();
    let task = client
        .create_task(&instance, &IoMode::Null, &TaskOpts::default())
        .await
        .unwrap();
    let rx = client.wait_task(&task).await.unwrap();
    client.start_task(&task).await.unwrap();

    client.kill_task(&task, 15).await.unwrap();

    let status = rx.await.unwrap();
    // 128 + SIGTERM
    assert_eq!(status.result().unwrap(), 143);
}

#[tokio::test]
async fn delete_before_start_kills_the_stopped_task() {
    let client = ProcClient::new();
    let instance = client
        .create_instance(&spec("t-early", &["sleep", "30"]))
        .await
        .unwrap();
    let task = client
        .create_task(&instance, &IoMode::Null, &TaskOpts::default())
        .await
        .unwrap();

    let status = client.delete_task(&task).await.unwrap();
    assert_eq!(status.result().unwrap(), 137);

    // The task entry is gone; a second delete is not found.
    let err = client.delete_task(&task).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound { kind: "task", .. }));
}

#[tokio::test]
async fn resize_on_non_terminal_task_is_a_no_op() {
    let client = ProcClient::new();
    let instance = client
        .create_instance(&spec("t-resize", &["sleep", "30"]))
        .await
        .unwrap();
    let task = client
        .create_task(&instance, &IoMode::Null, &TaskOpts::default())
        .await
        .unwrap();
    client.resize_task(&task, 120, 40).await.unwrap();
    client.delete_task(&task).await.unwrap();
}
