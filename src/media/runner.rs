use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::commands::ToolCommand;
use crate::error::{ResonateError, Result};

/// Outcome of a successful external process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Runs external tools
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Spawn the command, feed its stdin, collect stdout/stderr and wait for exit.
    ///
    /// Fails with [`ResonateError::Spawn`] if the program cannot be started and
    /// with [`ResonateError::ExternalTool`] on a non-zero exit or timeout.
    async fn run(&self, command: ToolCommand) -> Result<ProcessResult>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
///
/// Stdout and stderr are drained concurrently while stdin is written from a
/// separate task, so a child that fills one pipe cannot stall the others.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ToolCommand) -> Result<ProcessResult> {
        let tool = command.tool_name();
        debug!("Executing {}: {}", command.description, command.display_line());

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ResonateError::Spawn {
                tool: tool.clone(),
                source,
            })?;

        let feeder = match (child.stdin.take(), command.stdin) {
            (Some(mut stdin), Some(bytes)) => Some(tokio::spawn(async move {
                let written = stdin.write_all(&bytes).await;
                // Dropping the handle closes the pipe so the child sees EOF
                drop(stdin);
                written
            })),
            _ => None,
        };

        let output = match command.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    // The child was dropped with the future and is killed by kill_on_drop
                    if let Some(feeder) = feeder {
                        feeder.abort();
                    }
                    warn!("{} timed out after {:?}", tool, limit);
                    return Err(ResonateError::ExternalTool {
                        tool,
                        code: None,
                        stderr: String::new(),
                        timed_out: true,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(ResonateError::ExternalTool {
                tool,
                code: output.status.code(),
                stderr,
                timed_out: false,
            });
        }

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                // Tools may stop reading once they have what they need
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin before all input was written", tool);
                }
                Ok(Err(e)) => return Err(ResonateError::Io(e)),
                Err(e) => return Err(ResonateError::Io(std::io::Error::other(e))),
            }
        }

        debug!(
            "{} finished: {} bytes stdout, {} bytes stderr",
            tool,
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(ProcessResult {
            exit_code: output.status.code().unwrap_or(0),
            stdout: output.stdout,
            stderr,
        })
    }
}
