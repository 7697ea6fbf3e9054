//! Blocking client for the mediation daemon.
//!
//! One connection per request keeps shell-hook integration a few lines
//! of code; the daemon also accepts long-lived connections carrying many
//! request/response pairs.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::daemon::protocol::{decode, encode, socket_path, HookEvent, HookResponse};

pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self {
            socket: socket.unwrap_or_else(socket_path),
        }
    }

    /// Send one event and read one response line.
    pub fn send(&self, event: &HookEvent) -> Result<HookResponse> {
        let mut stream = UnixStream::connect(&self.socket)
            .with_context(|| format!("Failed to connect to daemon at {}", self.socket.display()))?;
        stream.write_all(&encode(event)?)?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .context("Failed to read daemon response")?;
        if line.trim().is_empty() {
            anyhow::bail!("Daemon closed the connection without a response");
        }
        decode(line.trim_end().as_bytes()).context("Daemon response was not valid JSON")
    }
}
