use crate::config::AppConfig;
use crate::core::telemetry;
use crate::core::transfer_engine::{
    RemotePath, SyncRequest, TransferEngine, TransferError, TransferResult,
};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives the `rclone` binary as a child process.
pub struct RcloneEngine {
    pub binary: PathBuf,
    /// Passed as `--config` when set; rclone's own default otherwise.
    pub config_file: Option<PathBuf>,
    pub transfers: u32,
    pub stats_interval_secs: u64,
}

impl RcloneEngine {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            binary: config.rclone_binary.clone(),
            config_file: config.rclone_config.clone(),
            transfers: config.transfers,
            stats_interval_secs: config.stats_interval_secs,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(config_file) = &self.config_file {
            cmd.arg("--config").arg(config_file);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> TransferError {
        TransferError::Spawn {
            program: self.binary.display().to_string(),
            source,
        }
    }

    /// Run a short-lived rclone command to completion, capturing its output.
    async fn run(&self, operation: &'static str, args: &[String]) -> Result<Output, TransferError> {
        debug!(operation, args = ?args, "Running rclone");

        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TransferError::Failed {
                operation,
                status: output.status.to_string(),
                message: last_line(&stderr).unwrap_or("no error output").to_string(),
            })
        }
    }
}

#[async_trait]
impl TransferEngine for RcloneEngine {
    async fn sync(
        &self,
        req: &SyncRequest,
        progress: mpsc::Sender<u64>,
    ) -> Result<TransferResult, TransferError> {
        info!(
            job_id = %req.job_id,
            source = %req.source.display(),
            destination = %req.destination,
            "(Rclone) Syncing to mirror"
        );

        let mut child = self
            .command()
            .arg("sync")
            .arg(&req.source)
            .arg(req.destination.to_string())
            .arg("--transfers")
            .arg(self.transfers.to_string())
            .arg("--use-json-log")
            .arg("--stats")
            .arg(format!("{}s", self.stats_interval_secs))
            .arg("--stats-log-level")
            .arg("NOTICE")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stderr = child.stderr.take().ok_or_else(|| TransferError::Io {
            operation: "sync",
            source: std::io::Error::other("stderr was not captured"),
        })?;

        // The reader runs on its own task so the pipe keeps draining while we
        // wait on the child.
        let reader = tokio::spawn(telemetry::drain(stderr, Some(progress)));
        let (status, parser) = tokio::join!(child.wait(), reader);

        let parser = parser?;
        let status = status.map_err(|source| TransferError::Io {
            operation: "sync",
            source,
        })?;

        if status.success() {
            Ok(TransferResult {
                bytes_transferred: parser.bytes(),
            })
        } else {
            let message = parser
                .last_error()
                .unwrap_or("rclone reported no error message")
                .to_string();
            warn!(job_id = %req.job_id, %status, error = %message, "(Rclone) Sync failed");
            Err(TransferError::Failed {
                operation: "sync",
                status: status.to_string(),
                message,
            })
        }
    }

    async fn copy_server_side(
        &self,
        from: &RemotePath,
        to: &RemotePath,
    ) -> Result<(), TransferError> {
        info!(from = %from, to = %to, "(Rclone) Creating snapshot");
        self.run(
            "copy",
            &[
                "copy".to_string(),
                from.to_string(),
                to.to_string(),
                "--server-side-across-configs".to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_directories(&self, path: &RemotePath) -> Result<Vec<String>, TransferError> {
        let output = self
            .run(
                "list",
                &["lsf".to_string(), "--dirs-only".to_string(), path.to_string()],
            )
            .await?;
        Ok(parse_dir_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn purge(&self, path: &RemotePath) -> Result<(), TransferError> {
        self.run("purge", &["purge".to_string(), path.to_string()])
            .await?;
        Ok(())
    }
}

/// `rclone lsf --dirs-only` prints one `name/` per line.
fn parse_dir_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|l| l.trim_end_matches('\r').trim_end_matches('/'))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn last_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lsf_listing() {
        let out = "Backup_2025-01-01_09-00/\r\nCurrent_Mirror/\n\nname with spaces/\n";
        assert_eq!(
            parse_dir_listing(out),
            vec![
                "Backup_2025-01-01_09-00".to_string(),
                "Current_Mirror".to_string(),
                "name with spaces".to_string(),
            ]
        );
    }

    #[test]
    fn last_line_skips_trailing_blank_lines() {
        assert_eq!(last_line("first\nERROR : boom\n\n"), Some("ERROR : boom"));
        assert_eq!(last_line("  \n"), None);
    }
}
