//! Shell command execution
//!
//! Every failure mode (spawn error, non-zero exit, signal, timeout) is reported
//! through [`CommandOutput::error`]; nothing here returns `Err` or panics.
//! Output printed before a timeout is kept.

use futures_util::future::BoxFuture;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("Command failed: {command} (exit code {code})\n{stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("Command failed: {command} (terminated by signal)\n{stderr}")]
    Signal { command: String, stderr: String },
    #[error("Command timed out after {timeout_ms}ms: {command}")]
    Timeout { command: String, timeout_ms: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<RunnerError>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Runs one shell command out of process
pub trait CommandRunner: Send + Sync + 'static {
    /// `timeout` of `None` waits for the command however long it takes
    fn run(&self, command: String, timeout: Option<Duration>) -> BoxFuture<'static, CommandOutput>;
}

/// Runs commands through `sh -c` (or `cmd /C` on Windows)
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    async fn execute(command: String, timeout: Option<Duration>) -> CommandOutput {
        let child = Self::shell(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                log::warn!("[Runner] Failed to spawn '{}': {}", command, e);
                return CommandOutput {
                    error: Some(RunnerError::Spawn {
                        command,
                        message: e.to_string(),
                    }),
                    ..Default::default()
                };
            }
        };

        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    log::warn!(
                        "[Runner] '{}' timed out after {}ms",
                        command,
                        limit.as_millis()
                    );
                    if let Err(e) = child.kill().await {
                        log::warn!("[Runner] Failed to kill '{}': {}", command, e);
                    }
                    // Grandchildren may still hold the pipes open
                    return CommandOutput {
                        stdout: stdout.abort(),
                        stderr: stderr.abort(),
                        error: Some(RunnerError::Timeout {
                            command,
                            timeout_ms: limit.as_millis() as u64,
                        }),
                    };
                }
            },
            None => child.wait().await,
        };

        let stdout = stdout.finish().await;
        let stderr = stderr.finish().await;

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return CommandOutput {
                    stdout,
                    stderr,
                    error: Some(RunnerError::Spawn {
                        command,
                        message: e.to_string(),
                    }),
                };
            }
        };

        let error = if status.success() {
            None
        } else {
            match status.code() {
                Some(code) => Some(RunnerError::Exit {
                    command,
                    code,
                    stderr: stderr.clone(),
                }),
                None => Some(RunnerError::Signal {
                    command,
                    stderr: stderr.clone(),
                }),
            }
        };

        CommandOutput {
            stdout,
            stderr,
            error,
        }
    }
}

/// Drains one child pipe into a buffer that stays readable if the child is killed
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buffer) = sink.lock() {
                            buffer.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });

        Self { buffer, task }
    }

    /// Wait for EOF, then return everything read
    async fn finish(mut self) -> String {
        let _ = (&mut self.task).await;
        self.text()
    }

    /// Stop reading and return what has arrived so far
    fn abort(self) -> String {
        self.task.abort();
        self.text()
    }

    fn text(&self) -> String {
        match self.buffer.lock() {
            Ok(buffer) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(_) => String::new(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: String, timeout: Option<Duration>) -> BoxFuture<'static, CommandOutput> {
        Box::pin(Self::execute(command, timeout))
    }
}

/// Neighbor table listing used for camera discovery
pub fn arp_command() -> &'static str {
    if cfg!(windows) {
        "arp -a"
    } else {
        "arp -n"
    }
}
