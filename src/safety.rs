//! Destructive-command classifier.
//!
//! Scores a shell command with an ordered table of regex signatures, an
//! elevation allowlist check, and a system-path redirection check. The
//! classifier is deliberately conservative: over-flagging costs one extra
//! confirmation prompt, under-flagging costs a filesystem.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classifier output: whether a command is flagged destructive and why.
///
/// A verdict with no reasons and `dangerous == false` is the only safe
/// state; reasons accumulate from independent checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerVerdict {
    pub dangerous: bool,
    pub reasons: Vec<String>,
}

impl DangerVerdict {
    /// A verdict flagging the command with a single reason.
    pub fn flagged(reason: impl Into<String>) -> Self {
        Self {
            dangerous: true,
            reasons: vec![reason.into()],
        }
    }
}

/// Regex signatures paired with the reason reported on match.
static DANGEROUS_SIGNATURES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"\brm\b[^\n]*(\s-\w*r\w*f\w*\b|\s--no-preserve-root\b)[^\n]*\s/\s*$",
            "Recursive delete from root",
        ),
        (
            r"\brm\b[^\n]*\s(\*/\*|\*\s*$)",
            "Wildcard recursive delete",
        ),
        (
            r"\bdd\b[^\n]*(of=)?/dev/sd[a-z]\b",
            "Raw disk write with dd",
        ),
        (r"\bmkfs\.[a-z0-9]+\b", "Filesystem creation (mkfs)"),
        (r":\(\)\s*\{\s*:\|:&?\s*;?\s*\}\s*;\s*:", "Fork bomb"),
        (
            r"\b(chown|chmod)\b[^\n]*\s-R\b[^\n]*\s/\s*$",
            "Recursive perm change at root",
        ),
        (
            r"\bshred\b[^\n]*(/dev/sd[a-z]|\s/\s*$)",
            "Shred on device or root",
        ),
        (
            r"\bshutdown\b|\breboot\b|\bhalt\b",
            "System power action",
        ),
        (
            r"\bmount\b[^\n]*\s--bind\b[^\n]*/proc\b",
            "Risky bind mount proc",
        ),
        (
            r"\buserdel\b[^\n]*\s--remove\b\s+\w+",
            "User delete with remove",
        ),
        (r"\bkill\b\s+-9\s+1\b", "SIGKILL PID 1"),
        (
            r"\b(echo|printf)\b[^\n]*\s*>\s*/etc/\w+",
            "Write into /etc",
        ),
        (
            r"\b(curl|wget)\b[^\n]*\|\s*(sh|bash)\b",
            "Pipe remote script to shell",
        ),
    ]
    .into_iter()
    .map(|(pattern, label)| {
        (
            Regex::new(pattern).expect("valid danger signature"),
            label,
        )
    })
    .collect()
});

/// Redirection targeting a protected system directory.
static SYSTEM_PATH_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">\s*/(etc|boot|bin|sbin|usr)/").expect("valid redirect pattern"));

/// Read-only or inspection utilities that may appear under `sudo`
/// without tripping the elevation check.
const ELEVATION_ALLOWLIST: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "egrep", "fgrep", "find", "pwd", "whoami", "id", "date",
    "uptime", "df", "du", "free", "uname", "stat", "wc", "cut", "sort", "uniq", "echo", "printf",
    "sed", "awk", "ps", "top", "htop", "ss",
];

/// Destructive-intent phrases scanned in the originating request text.
const DESTRUCTIVE_INTENT_PHRASES: &[&str] = &[
    "delete the root",
    "rm -rf /",
    "wipe disk",
    "format /",
    "destroy all",
    "erase all",
    "drop database",
    "remove all files",
    "shred",
    "mkfs",
    "reboot",
    "shutdown",
];

/// Danger-admitting words scanned in a candidate's explanation text.
const EXPLANATION_RED_FLAGS: &[&str] = &["dangerous", "warning", "destructive"];

/// Classify a command's destructiveness.
///
/// The verdict is dangerous iff at least one reason accumulated.
/// Classification is pure: the same text always yields the same verdict.
pub fn classify(command: &str) -> DangerVerdict {
    let mut reasons: Vec<String> = Vec::new();
    let stripped = command.trim();

    for (pattern, label) in DANGEROUS_SIGNATURES.iter() {
        if pattern.is_match(stripped) {
            reasons.push((*label).to_string());
        }
    }

    if stripped.contains("sudo") && !first_token_allowlisted(stripped) {
        reasons.push("Uses sudo on non-allowlisted command".to_string());
    }

    if SYSTEM_PATH_REDIRECT.is_match(stripped) {
        reasons.push("Redirection into system path".to_string());
    }

    DangerVerdict {
        dangerous: !reasons.is_empty(),
        reasons,
    }
}

/// Second-stage augmentation applied by the mediation workflow.
///
/// Scans the original request and the candidate's explanation for
/// destructive intent, forcing the verdict dangerous even when the command
/// text itself looked innocuous. This defends against a translation that
/// explains a risk but still proposes running it.
pub fn augment(mut verdict: DangerVerdict, user_request: &str, explanation: &str) -> DangerVerdict {
    let request = user_request.to_lowercase();
    if DESTRUCTIVE_INTENT_PHRASES
        .iter()
        .any(|phrase| request.contains(phrase))
    {
        verdict.dangerous = true;
        verdict
            .reasons
            .push("User intent appears destructive".to_string());
    }

    let explanation = explanation.to_lowercase();
    if EXPLANATION_RED_FLAGS
        .iter()
        .any(|word| explanation.contains(word))
    {
        verdict.dangerous = true;
        verdict
            .reasons
            .push("Explanation indicates danger".to_string());
    }

    verdict
}

/// Whether the command's first token is on the read-only allowlist.
///
/// Falls back to whitespace splitting when the line does not tokenize
/// (unbalanced quotes and the like).
fn first_token_allowlisted(command: &str) -> bool {
    let first = shell_words::split(command)
        .ok()
        .and_then(|tokens| tokens.into_iter().next())
        .or_else(|| command.split_whitespace().next().map(str::to_string));

    match first {
        Some(token) => ELEVATION_ALLOWLIST.contains(&token.as_str()),
        None => false,
    }
}
