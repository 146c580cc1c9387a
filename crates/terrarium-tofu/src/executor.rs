use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use terrarium_domain::RequestId;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExecError;

/// Name of the per-workspace directory that collects run logs.
pub const LOG_DIR_NAME: &str = "runningLogs";

const CHDIR_FLAG: &str = "-chdir=";

/// Runs one provisioning command to completion and returns what it printed.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(
        &self,
        request_id: &RequestId,
        args: &[String],
        cancel: CancellationToken,
    ) -> Result<String, ExecError>;
}

/// `<dir>/runningLogs/<requestId>.log`
pub fn log_file_path(dir: &Path, request_id: &RequestId) -> PathBuf {
    dir.join(LOG_DIR_NAME)
        .join(format!("{}.log", request_id.as_str()))
}

/// The directory named by a leading `-chdir=<dir>` argument, if there is one.
pub fn working_dir_override(args: &[String]) -> Option<PathBuf> {
    args.first()
        .and_then(|a| a.strip_prefix(CHDIR_FLAG))
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
}

/// Executes the `tofu` binary as a subprocess.
///
/// stdout and stderr are read concurrently and merged line by line into one
/// capture buffer. When the first argument is a `-chdir=` override the same
/// lines are appended to `<dir>/runningLogs/<requestId>.log`, and every line
/// is mirrored to the console under the `terrarium::tofu` tracing target.
#[derive(Debug, Clone)]
pub struct TofuExecutor {
    binary: String,
}

impl TofuExecutor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TofuExecutor {
    fn default() -> Self {
        Self::new("tofu")
    }
}

#[async_trait]
impl Executor for TofuExecutor {
    async fn execute(
        &self,
        request_id: &RequestId,
        args: &[String],
        cancel: CancellationToken,
    ) -> Result<String, ExecError> {
        if args.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let command = format!("{} {}", self.binary, args.join(" "));

        let mut log = match working_dir_override(args) {
            Some(dir) => Some(open_log(&dir, request_id).await?),
            None => None,
        };

        info!(binary = %self.binary, ?args, request_id = %request_id, "running tofu command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
            binary: self.binary.clone(),
            source: e,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout", tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr", tx.clone()));
        }
        drop(tx); // rx closes once both readers hit EOF

        let mut output = String::new();
        let cancelled = loop {
            tokio::select! {
                line = rx.recv() => {
                    let Some(line) = line else { break false };
                    debug!(target: "terrarium::tofu", "{}", line);
                    output.push_str(&line);
                    output.push('\n');
                    if let Some(log) = log.as_mut() {
                        if let Err(e) = log.write(&line).await {
                            let _ = child.kill().await;
                            return Err(e);
                        }
                    }
                }
                _ = cancel.cancelled() => break true,
            }
        };

        if cancelled {
            warn!(command = %command, request_id = %request_id, "tofu command cancelled");
            let _ = child.kill().await;
            if let Some(log) = log.as_mut() {
                log.flush().await?;
            }
            return Err(ExecError::Cancelled { command, output });
        }

        if let Some(log) = log.as_mut() {
            log.flush().await?;
        }

        let status = child.wait().await.map_err(|e| ExecError::Wait {
            command: command.clone(),
            source: e,
        })?;

        if !status.success() {
            warn!(command = %command, code = ?status.code(), "tofu command exited non-zero");
            return Err(ExecError::CommandFailed {
                command,
                code: status.code(),
                output,
            });
        }
        Ok(output)
    }
}

/// Send each line of `pipe` to `tx` until EOF. Bytes that are not UTF-8 are
/// replaced rather than ending the stream.
async fn forward_lines<R>(pipe: R, stream: &'static str, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(stream, error = %e, "failed to read tofu output");
                break;
            }
        }
    }
}

struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    async fn write(&mut self, line: &str) -> Result<(), ExecError> {
        self.file
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| self.write_error(e))
    }

    async fn flush(&mut self) -> Result<(), ExecError> {
        self.file.flush().await.map_err(|e| self.write_error(e))
    }

    fn write_error(&self, source: std::io::Error) -> ExecError {
        ExecError::LogWrite {
            path: self.path.display().to_string(),
            source,
        }
    }
}

async fn open_log(dir: &Path, request_id: &RequestId) -> Result<RunLog, ExecError> {
    let log_dir = dir.join(LOG_DIR_NAME);
    tokio::fs::create_dir_all(&log_dir)
        .await
        .map_err(|e| ExecError::LogDir {
            path: log_dir.display().to_string(),
            source: e,
        })?;

    let path = log_file_path(dir, request_id);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| ExecError::LogFile {
            path: path.display().to_string(),
            source: e,
        })?;
    debug!(path = %path.display(), "appending run log");
    Ok(RunLog { path, file })
}
