//! Integration tests for the rclone engine against a fake `rclone` script.
//!
//! The script prints canned output for each subcommand and records its
//! arguments so the command lines can be checked.

#![cfg(unix)]

use skyvault::core::transfer_engine::{
    RcloneEngine, RemotePath, SyncRequest, TransferEngine, TransferError,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;

/// Helper to install an executable shell script named `rclone` in `dir`.
fn fake_rclone(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("rclone");
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> \"{}\"\n{}\n",
        dir.join("args.log").display(),
        body
    );
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn engine(binary: PathBuf) -> RcloneEngine {
    RcloneEngine {
        binary,
        config_file: None,
        transfers: 8,
        stats_interval_secs: 1,
    }
}

fn recorded_args(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("args.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Helper to run a sync and collect every progress update
async fn run_sync(
    engine: &RcloneEngine,
    source: &Path,
) -> (
    Result<skyvault::core::transfer_engine::TransferResult, TransferError>,
    Vec<u64>,
) {
    let (tx, mut rx) = mpsc::channel(100);
    let req = SyncRequest {
        job_id: "test-job".to_string(),
        source: source.to_path_buf(),
        destination: RemotePath::new("gdrive", "Backups/Current_Mirror"),
    };

    let result = engine.sync(&req, tx).await;

    let mut updates = Vec::new();
    while let Some(bytes) = rx.recv().await {
        updates.push(bytes);
    }
    (result, updates)
}

#[tokio::test]
async fn test_sync_reports_latest_stats_bytes() {
    let dir = tempdir().unwrap();
    let binary = fake_rclone(
        dir.path(),
        r#"echo '{"level":"notice","msg":"stats","stats":{"bytes":1000}}' >&2
echo 'Transferred: garbage line' >&2
echo '{"level":"notice","msg":"stats","stats":{"bytes":5000}}' >&2
exit 0"#,
    );

    let (result, updates) = run_sync(&engine(binary), dir.path()).await;

    assert_eq!(result.unwrap().bytes_transferred, 5000);
    assert_eq!(updates, vec![1000, 5000]);

    let args = recorded_args(&dir);
    assert_eq!(args.len(), 1);
    assert!(args[0].starts_with("sync "));
    assert!(args[0].contains("gdrive:Backups/Current_Mirror"));
    assert!(args[0].contains("--transfers 8"));
    assert!(args[0].contains("--use-json-log"));
    assert!(args[0].contains("--stats 1s"));
}

#[tokio::test]
async fn test_sync_failure_carries_last_error_message() {
    let dir = tempdir().unwrap();
    let binary = fake_rclone(
        dir.path(),
        r#"echo '{"level":"notice","msg":"stats","stats":{"bytes":300}}' >&2
echo '{"level":"error","msg":"Failed to copy: quota exceeded"}' >&2
exit 7"#,
    );

    let (result, updates) = run_sync(&engine(binary), dir.path()).await;

    assert_eq!(updates, vec![300]);
    match result.unwrap_err() {
        TransferError::Failed {
            operation, message, ..
        } => {
            assert_eq!(operation, "sync");
            assert_eq!(message, "Failed to copy: quota exceeded");
        }
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sync_drains_large_output() {
    let dir = tempdir().unwrap();
    // Far more than a pipe buffer holds; the child must not block on stderr.
    let binary = fake_rclone(
        dir.path(),
        r#"i=0
while [ $i -lt 5000 ]; do
  echo "{\"level\":\"info\",\"msg\":\"copied file number $i with some padding text\"}" >&2
  i=$((i + 1))
done
echo '{"level":"notice","msg":"stats","stats":{"bytes":42}}' >&2
exit 0"#,
    );

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        run_sync(&engine(binary), dir.path()),
    )
    .await
    .expect("sync hung on a full pipe");

    assert_eq!(result.0.unwrap().bytes_transferred, 42);
}

#[tokio::test]
async fn test_missing_binary_is_a_spawn_error() {
    let dir = tempdir().unwrap();
    let (result, _) = run_sync(&engine(dir.path().join("no-such-rclone")), dir.path()).await;

    assert!(matches!(result, Err(TransferError::Spawn { .. })));
}

#[tokio::test]
async fn test_list_and_copy_command_lines() {
    let dir = tempdir().unwrap();
    let binary = fake_rclone(
        dir.path(),
        r#"if [ "$1" = "lsf" ]; then
  printf 'Backup_2025-01-01_09-00/\nCurrent_Mirror/\n'
fi
exit 0"#,
    );
    let engine = engine(binary);
    let root = RemotePath::new("gdrive", "Backups");

    let names = engine.list_directories(&root).await.unwrap();
    assert_eq!(
        names,
        vec![
            "Backup_2025-01-01_09-00".to_string(),
            "Current_Mirror".to_string()
        ]
    );

    engine
        .copy_server_side(&root.join("Current_Mirror"), &root.join("Backup_2025-06-04_21-00"))
        .await
        .unwrap();

    let args = recorded_args(&dir);
    assert_eq!(args[0], "lsf --dirs-only gdrive:Backups");
    assert_eq!(
        args[1],
        "copy gdrive:Backups/Current_Mirror gdrive:Backups/Backup_2025-06-04_21-00 --server-side-across-configs"
    );
}

#[tokio::test]
async fn test_purge_failure_uses_last_stderr_line() {
    let dir = tempdir().unwrap();
    let binary = fake_rclone(
        dir.path(),
        r#"echo 'NOTICE: starting' >&2
echo 'ERROR : Backup_2000-01-01: directory not found' >&2
exit 3"#,
    );

    let err = engine(binary)
        .purge(&RemotePath::new("gdrive", "Backups/Backup_2000-01-01"))
        .await
        .unwrap_err();

    match err {
        TransferError::Failed {
            operation, message, ..
        } => {
            assert_eq!(operation, "purge");
            assert_eq!(message, "ERROR : Backup_2000-01-01: directory not found");
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(recorded_args(&dir), vec!["purge gdrive:Backups/Backup_2000-01-01"]);
}
