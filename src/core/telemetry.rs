//! Decoding of the transfer engine's JSON log stream.
//!
//! rclone run with `--use-json-log` writes one JSON object per line to stderr.
//! Periodic stats records carry a cumulative `stats.bytes` field; the parser
//! keeps the latest value rather than summing, since each record is a snapshot
//! of the whole transfer so far.

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Deserialize)]
struct LogRecord {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    stats: Option<StatsRecord>,
}

#[derive(Deserialize)]
struct StatsRecord {
    #[serde(default)]
    bytes: Option<u64>,
}

/// Running state of one telemetry stream.
#[derive(Debug, Default, Clone)]
pub struct TelemetryParser {
    bytes: u64,
    last_error: Option<String>,
}

impl TelemetryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns the new byte count if the line carried one.
    pub fn feed(&mut self, line: &str) -> Option<u64> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let record: LogRecord = match serde_json::from_str(trimmed) {
            Ok(record) => record,
            Err(_) => {
                trace!(line = %trimmed, "Skipping non-JSON telemetry line");
                return None;
            }
        };

        if record.level.as_deref() == Some("error") {
            if let Some(msg) = record.msg {
                self.last_error = Some(msg.trim().to_string());
            }
        }

        let bytes = record.stats.and_then(|s| s.bytes)?;
        self.bytes = bytes;
        Some(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Most recent error-level message seen on the stream, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Drain `reader` line by line until EOF, forwarding every new byte count to
/// `progress`. Returns the parser so the caller can read the final count and
/// the last error message.
///
/// A closed `progress` receiver does not stop the drain: the stream must be
/// read to the end or the child process can block on a full pipe.
pub async fn drain<R>(reader: R, progress: Option<mpsc::Sender<u64>>) -> TelemetryParser
where
    R: AsyncRead + Unpin,
{
    let mut parser = TelemetryParser::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Lossy so a stray non-UTF-8 byte never stops the drain.
                let line = String::from_utf8_lossy(&buf);
                if let Some(bytes) = parser.feed(&line) {
                    if let Some(tx) = &progress {
                        let _ = tx.send(bytes).await;
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Telemetry stream ended with a read error");
                break;
            }
        }
    }

    parser
}
