//! Helper process transport.
//!
//! The helper is spawned as a child process and spoken to over
//! stdin/stdout using newline-delimited JSON. The two directions are split
//! so that one task can keep reading while requests are written.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Writing half: one JSON document per line.
pub struct LineWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl LineWriter {
    pub fn new(inner: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Send a message followed by a newline.
    pub async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        debug!(len = message.len(), "Sending message to bridge helper");

        self.inner
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        self.inner
            .write_all(b"\n")
            .await
            .map_err(TransportError::WriteError)?;
        self.inner.flush().await.map_err(TransportError::WriteError)?;

        Ok(())
    }
}

/// Reading half.
pub struct LineReader {
    inner: Box<dyn AsyncBufRead + Send + Unpin>,
}

impl LineReader {
    pub fn new(inner: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    /// Receive the next non-empty line.
    pub async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            let mut line = String::new();
            let bytes_read = self
                .inner
                .read_line(&mut line)
                .await
                .map_err(TransportError::ReadError)?;

            if bytes_read == 0 {
                return Err(TransportError::ConnectionClosed);
            }

            let message = line.trim_end();
            if message.is_empty() {
                continue;
            }
            return Ok(message.to_string());
        }
    }
}

/// A spawned helper process, split into its parts.
pub struct StdioTransport {
    pub child: Child,
    pub writer: LineWriter,
    pub reader: LineReader,
}

impl StdioTransport {
    /// Spawn the helper process.
    ///
    /// # Arguments
    ///
    /// * `command` - The command to execute (e.g., "node")
    /// * `args` - Command arguments
    /// * `env` - Environment variables to set for the child process
    /// * `working_dir` - Optional working directory for the child process
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&PathBuf>,
    ) -> Result<Self, TransportError> {
        debug!(command = command, args = ?args, "Spawning bridge helper process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, value);
        }

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdin"))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdout"))
        })?;

        debug!(pid = ?child.id(), "Bridge helper spawned");

        Ok(Self {
            child,
            writer: LineWriter::new(stdin),
            reader: LineReader::new(BufReader::new(stdout)),
        })
    }
}

/// Stop the helper: SIGTERM first, kill if it lingers.
pub async fn terminate(child: &mut Child) -> Result<(), TransportError> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!(pid = pid, "Sending SIGTERM to bridge helper");
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

        tokio::select! {
            _ = child.wait() => {
                debug!("Bridge helper exited gracefully");
                return Ok(());
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_secs(2)) => {
                warn!(pid = pid, "Bridge helper did not exit gracefully, killing");
            }
        }
    }

    #[cfg(not(unix))]
    let _ = pid;

    child.kill().await.map_err(TransportError::TerminateFailed)
}
