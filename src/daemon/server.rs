//! Mediation daemon.
//!
//! Serves safety verdicts and translations to out-of-process callers
//! (e.g. a per-keystroke shell hook) over a persistent Unix socket, so
//! the caller pays no process-startup cost per command. Connections are
//! served concurrently; the only shared state is the stateless classifier
//! and the translation client.

use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use crate::daemon::protocol::{encode, socket_path, state_dir, HookAction, HookEvent, HookResponse};
use crate::safety;
use crate::translate::{TranslateKind, Translator};

/// Fixed listen queue depth.
const LISTEN_BACKLOG: i32 = 64;

/// Lines opening with this prefix are natural-language requests.
const REQUEST_PREFIX: &str = "/e ";

/// Removes the socket file when the daemon winds down.
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// The daemon with its injected translation client.
pub struct Daemon {
    translator: Arc<Translator>,
    socket: PathBuf,
}

impl Daemon {
    pub fn new(translator: Arc<Translator>, socket: Option<PathBuf>) -> Self {
        Self {
            translator,
            socket: socket.unwrap_or_else(socket_path),
        }
    }

    /// Bind the socket and serve forever. Fails fast when the socket
    /// cannot be bound; everything after that degrades per connection.
    pub async fn serve(self) -> Result<()> {
        ensure_state_dir()?;
        remove_stale_socket(&self.socket).await?;

        let listener = bind_with_backlog(&self.socket)?;
        std::fs::set_permissions(&self.socket, std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict socket permissions")?;
        let _guard = SocketGuard(self.socket.clone());

        tracing::info!("daemon listening on {}", self.socket.display());

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let translator = self.translator.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, translator).await {
                            tracing::debug!("connection ended: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("accept error: {}", e);
                }
            }
        }
    }
}

/// Serve one connection: many request/response pairs, sequentially.
async fn handle_connection(
    stream: tokio::net::UnixStream,
    translator: Arc<Translator>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        // Translation blocks on its worker; keep it off the async threads.
        let translator = translator.clone();
        let response = tokio::task::spawn_blocking(move || handle_line(&line, &translator))
            .await
            .unwrap_or_else(|e| HookResponse::error(format!("internal error: {}", e)));

        let bytes = encode(&response)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Dispatch one request line to its handler. Malformed payloads and
/// unknown events become error responses, never connection drops.
pub fn handle_line(line: &str, translator: &Translator) -> HookResponse {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return HookResponse::error(format!("Invalid JSON: {}", e)),
    };

    match serde_json::from_value::<HookEvent>(value.clone()) {
        Ok(HookEvent::Preexec { cmd, cwd }) => handle_preexec(&cmd, cwd, translator),
        Ok(HookEvent::Postexec {
            cmd,
            exit_code,
            stderr_tail,
        }) => handle_postexec(&cmd, exit_code, &stderr_tail, translator),
        Err(e) => match value.get("event").and_then(|v| v.as_str()) {
            Some(name @ ("preexec" | "postexec")) => {
                HookResponse::error(format!("Invalid {} payload: {}", name, e))
            }
            Some(other) => HookResponse::error(format!("Unknown event: {}", other)),
            None => HookResponse::error("Missing event field"),
        },
    }
}

/// `preexec`: translate prefixed natural-language lines, classify
/// everything else. Execution stays with the caller.
fn handle_preexec(cmd: &str, cwd: Option<String>, translator: &Translator) -> HookResponse {
    let cmd = cmd.trim();

    if let Some(request) = cmd.strip_prefix(REQUEST_PREFIX) {
        let request = request.trim();
        let candidate = translator.translate(TranslateKind::Request { request });
        let command = candidate.command.trim().to_string();

        if command.is_empty() {
            let message = if candidate.explanation.is_empty() {
                "No runnable command produced.".to_string()
            } else {
                candidate.explanation
            };
            return HookResponse::Action(HookAction::Message { message });
        }

        let verdict = safety::classify(&command);
        return HookResponse::Action(HookAction::Replace {
            command,
            explanation: candidate.explanation,
            require_confirmation: verdict.dangerous,
            danger_reasons: verdict.reasons,
            cwd,
        });
    }

    let verdict = safety::classify(cmd);
    HookResponse::Action(HookAction::Proceed {
        command: cmd.to_string(),
        require_confirmation: verdict.dangerous,
        danger_reasons: verdict.reasons,
        cwd,
    })
}

/// `postexec`: zero exit is no-op; a failure asks the fixer for a
/// corrected command carrying its own verdict.
fn handle_postexec(
    cmd: &str,
    exit_code: i32,
    stderr_tail: &str,
    translator: &Translator,
) -> HookResponse {
    if exit_code == 0 {
        return HookResponse::Action(HookAction::Ok);
    }

    let candidate = translator.translate(TranslateKind::Error {
        command: cmd,
        error: stderr_tail,
        intent: "",
    });
    let suggestion = candidate.command.trim().to_string();

    if suggestion.is_empty() {
        return HookResponse::Action(HookAction::NoFix {
            explanation: candidate.explanation,
        });
    }

    let verdict = safety::classify(&suggestion);
    HookResponse::Action(HookAction::SuggestFix {
        suggested_command: suggestion,
        explanation: candidate.explanation,
        danger: verdict.dangerous,
        danger_reasons: verdict.reasons,
    })
}

/// Ensure the per-user state directory exists with 0o700 permissions,
/// refusing symlinked paths.
fn ensure_state_dir() -> Result<()> {
    let dir = state_dir();
    if dir.exists() {
        let meta = std::fs::symlink_metadata(&dir)
            .with_context(|| format!("Failed to read metadata for: {}", dir.display()))?;
        if meta.is_symlink() {
            anyhow::bail!(
                "Refusing symlinked state directory: {}",
                dir.display()
            );
        }
    }
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

    let metadata = std::fs::metadata(&dir)
        .with_context(|| format!("Failed to read metadata for: {}", dir.display()))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o700 {
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on: {}", dir.display()))?;
    }
    Ok(())
}

/// Probe an existing socket before removing it: a live daemon answers
/// the connect, a stale file does not.
async fn remove_stale_socket(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    match tokio::net::UnixStream::connect(path).await {
        Ok(_) => anyhow::bail!(
            "Another daemon is already running (socket {} is active)",
            path.display()
        ),
        Err(_) => std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket: {}", path.display())),
    }
}

/// Bind a Unix stream socket with the fixed listen backlog. A second
/// `listen` on an already-listening socket just updates the queue depth.
fn bind_with_backlog(path: &Path) -> Result<UnixListener> {
    let std_listener = std::os::unix::net::UnixListener::bind(path)
        .with_context(|| format!("Failed to bind socket: {}", path.display()))?;

    let rc = unsafe { libc::listen(std_listener.as_raw_fd(), LISTEN_BACKLOG) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to set listen backlog on {}", path.display()));
    }

    std_listener
        .set_nonblocking(true)
        .context("Failed to set socket non-blocking")?;
    UnixListener::from_std(std_listener).context("Failed to register socket with the runtime")
}
