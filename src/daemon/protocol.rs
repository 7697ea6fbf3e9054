//! Wire protocol for the mediation daemon.
//!
//! Newline-delimited JSON in both directions over a Unix domain socket:
//! one request object per line, one response object per line. Malformed
//! requests yield `{"error": ...}` and the connection stays open.

use std::path::PathBuf;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Base runtime directory, preferring XDG_RUNTIME_DIR for security.
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg).join("shellward")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/shellward-{}", uid))
    }
}

/// Default daemon socket path.
pub fn socket_path() -> PathBuf {
    state_dir().join("guard.sock")
}

/// Events a shell hook reports to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HookEvent {
    /// The user is about to execute `cmd` in `cwd`.
    Preexec {
        #[serde(default)]
        cmd: String,
        #[serde(default)]
        cwd: Option<String>,
    },
    /// `cmd` finished; `stderr_tail` holds the last chunk of stderr.
    Postexec {
        #[serde(default)]
        cmd: String,
        #[serde(default)]
        exit_code: i32,
        #[serde(default)]
        stderr_tail: String,
    },
}

/// One response object. Either an action or a bare error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookResponse {
    Action(HookAction),
    Error { error: String },
}

impl HookResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Advice returned for a hook event. The daemon never executes anything
/// itself; acting on the advice is the caller's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HookAction {
    /// Replace the typed line with a translated command.
    Replace {
        command: String,
        explanation: String,
        require_confirmation: bool,
        danger_reasons: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        cwd: Option<String>,
    },
    /// Nothing runnable was produced; show the message.
    Message { message: String },
    /// Let the original command proceed, verdict attached.
    Proceed {
        command: String,
        require_confirmation: bool,
        danger_reasons: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        cwd: Option<String>,
    },
    /// Command succeeded; nothing to do.
    Ok,
    /// No fix could be produced for the failure.
    NoFix { explanation: String },
    /// A corrected command is available.
    SuggestFix {
        suggested_command: String,
        explanation: String,
        danger: bool,
        danger_reasons: Vec<String>,
    },
}

/// Encode a message as one JSON line.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let mut json = serde_json::to_vec(msg)?;
    json.push(b'\n');
    Ok(json)
}

/// Decode a message from a JSON line.
pub fn decode<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(line)?)
}
