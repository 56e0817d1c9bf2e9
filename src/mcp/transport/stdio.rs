//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and communicates with it over its stdin/stdout pipes using
//! newline-delimited JSON framing. This is the transport for locally
//! launched MCP servers.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line (newline stripped before delivery).
//! - The child's stderr is diagnostic only. Each line is appended to the
//!   per-server log file (when one is configured) and traced at `DEBUG`.
//!
//! # Lifecycle
//!
//! The transport is created via [`StdioTransport::spawn`]. Background Tokio
//! tasks are started immediately: one feeds stdin, one drains stdout, one
//! drains stderr. When the [`StdioTransport`] is dropped, SIGTERM (Unix) or
//! `start_kill` (non-Unix) is sent to the child process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{ChatError, Result};
use crate::mcp::transport::{receiver_stream, Transport};

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::path::PathBuf;
/// use mcp_chat::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "npx",
///     &["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     &HashMap::new(),
///     None,
///     Some(PathBuf::from("./mcp-server-filesystem.log")),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Sender side of the stdin channel; `send()` writes here.
    stdin_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver for stdout lines (one JSON message per line).
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Handle to the spawned child process; used by `Drop`.
    child: Arc<Mutex<Child>>,
}

impl StdioTransport {
    /// Spawn a child process and wire up stdio pipes.
    ///
    /// The environment of the child is built by clearing all inherited
    /// variables and applying `env`. `PATH` is copied from the parent
    /// process when `env` does not set it, so bare command names such as
    /// `npx` or `uvx` still resolve.
    ///
    /// # Arguments
    ///
    /// * `command` - Executable name or path.
    /// * `args` - Command-line arguments passed to the executable.
    /// * `env` - Environment variables for the child process.
    /// * `working_dir` - Optional working directory for the child process.
    /// * `stderr_log` - File that receives the child's stderr. It is
    ///   truncated and its parent directory created if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpTransport`] if the log file cannot be
    /// created, the process cannot be spawned, or the stdio pipes are
    /// unavailable.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
        stderr_log: Option<PathBuf>,
    ) -> Result<Self> {
        let log_file = match stderr_log {
            Some(path) => Some(open_log_file(&path)?),
            None => None,
        };

        let mut cmd = Command::new(command);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env_clear().envs(child_env(env));
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ChatError::McpTransport(format!("failed to spawn `{}`: {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChatError::McpTransport("child stdin unavailable after spawn".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ChatError::McpTransport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ChatError::McpTransport("child stderr unavailable after spawn".into())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut log_file = log_file;
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("mcp server stderr: {}", line);
                if let Some(file) = log_file.as_mut() {
                    let written = file.write_all(format!("{}\n", line).as_bytes()).await;
                    if written.is_err() || file.flush().await.is_err() {
                        log_file = None;
                    }
                }
            }
        });

        Ok(Self {
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            child: Arc::new(Mutex::new(child)),
        })
    }
}

/// Environment handed to the child: `env` plus the parent's `PATH` when
/// `env` leaves it unset.
fn child_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged = env.clone();
    if !merged.contains_key("PATH") {
        if let Ok(path) = std::env::var("PATH") {
            merged.insert("PATH".to_string(), path);
        }
    }
    merged
}

fn open_log_file(path: &Path) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChatError::McpTransport(format!(
                    "failed to create log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    let file = std::fs::File::create(path).map_err(|e| {
        ChatError::McpTransport(format!(
            "failed to open log file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(tokio::fs::File::from_std(file))
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Send a JSON-RPC message to the child process via its stdin.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::McpTransport`] if the background writer task
    /// has exited.
    async fn send(&self, message: String) -> Result<()> {
        self.stdin_tx
            .send(message)
            .map_err(|e| ChatError::McpTransport(format!("stdin channel closed: {}", e)).into())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        receiver_stream(Arc::clone(&self.stdout_rx))
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child process on drop.
    fn drop(&mut self) {
        // If the lock is held elsewhere the child is reaped at process exit.
        if let Ok(child) = self.child.try_lock() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let mut child = child;
                let _ = child.start_kill();
            }
        }
    }
}
