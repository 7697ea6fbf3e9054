//! Request translation: natural language, failed commands, and replans
//! into runnable shell candidates.
//!
//! Every fault degrades to an explain-only candidate at this boundary;
//! `translate` never returns an error to the caller.

pub mod transport;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use transport::{HttpTransport, TextCompletion};

use once_cell::sync::Lazy;
use regex::Regex;

/// Default bound on a single transport call.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Explanation attached when the model answered in prose instead of JSON.
/// Also serves as the retry signature in strict mode.
const PLAIN_TEXT_FALLBACK: &str = "Model returned plain text; review carefully.";

/// Schema reminder appended for the strict retry attempt.
const STRICT_SUFFIX: &str = "\nRespond STRICTLY in JSON. No extra text. \
Schema: {\"command\": string, \"explanation\": string, \"mode\": \"run\"|\"explain\"}.";

/// Whether a candidate should be executed or only shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateMode {
    #[default]
    Run,
    Explain,
}

/// A proposed shell command plus explanation, produced by translation.
/// An empty command with `Explain` mode means "no safe command; show
/// guidance only".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub command: String,
    pub explanation: String,
    pub mode: CandidateMode,
}

impl Candidate {
    pub fn explain_only(explanation: impl Into<String>) -> Self {
        Self {
            command: String::new(),
            explanation: explanation.into(),
            mode: CandidateMode::Explain,
        }
    }

    pub fn is_runnable(&self) -> bool {
        !self.command.trim().is_empty() && self.mode == CandidateMode::Run
    }
}

/// Translation faults. All of them are absorbed into explain-only
/// candidates before leaving the `Translator`.
#[derive(Debug, Error)]
pub enum TranslateFault {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Transport(#[source] anyhow::Error),
}

/// What to translate.
#[derive(Debug, Clone, Copy)]
pub enum TranslateKind<'a> {
    /// Natural-language request.
    Request { request: &'a str },
    /// Failed command plus its captured error output; `intent` is an
    /// optional free-text hint.
    Error {
        command: &'a str,
        error: &'a str,
        intent: &'a str,
    },
    /// Prior candidate plus user feedback, asking for a lower-risk rewrite.
    Replan {
        command: &'a str,
        feedback: &'a str,
    },
}

/// Translation client. Owns the timeout/retry/parse logic around the
/// injected transport.
pub struct Translator {
    transport: Arc<dyn TextCompletion>,
    timeout: Duration,
    strict: bool,
}

impl Translator {
    pub fn new(transport: Arc<dyn TextCompletion>, timeout: Duration, strict: bool) -> Self {
        Self {
            transport,
            timeout,
            strict,
        }
    }

    /// Translate a payload into a candidate. Never fails: faults come back
    /// as explain-only candidates carrying the error text.
    pub fn translate(&self, kind: TranslateKind<'_>) -> Candidate {
        let base_prompt = match kind {
            TranslateKind::Request { request } => request_prompt(request),
            TranslateKind::Error {
                command,
                error,
                intent,
            } => error_prompt(command, error, intent),
            TranslateKind::Replan { command, feedback } => replan_prompt(command, feedback),
        };

        let mut prompts = vec![base_prompt.clone()];
        if self.strict {
            prompts.push(format!("{}{}", base_prompt, STRICT_SUFFIX));
        }

        let attempts = prompts.len();
        let mut last_fault: Option<TranslateFault> = None;
        for (i, prompt) in prompts.into_iter().enumerate() {
            tracing::debug!("contacting language model (timeout {:?})", self.timeout);
            let text = match self.invoke_with_timeout(prompt) {
                Ok(text) => text,
                Err(fault) => {
                    tracing::warn!("translation attempt failed: {}", fault);
                    last_fault = Some(fault);
                    continue;
                }
            };

            let candidate = parse_candidate(&text);
            // Strict mode: one more, more forceful attempt when the model
            // leaked prose into the command field.
            if self.strict && candidate.explanation == PLAIN_TEXT_FALLBACK && i + 1 < attempts {
                continue;
            }
            return candidate;
        }

        match last_fault {
            Some(fault) => Candidate::explain_only(format!("LLM error: {}", fault)),
            None => Candidate::explain_only(String::new()),
        }
    }

    /// Run the transport call on a dedicated worker, bounded by the
    /// configured timeout. On expiry the worker's eventual result is
    /// discarded; the caller never hangs.
    fn invoke_with_timeout(&self, prompt: String) -> Result<String, TranslateFault> {
        let (tx, rx) = mpsc::channel();
        let transport = Arc::clone(&self.transport);
        thread::spawn(move || {
            let _ = tx.send(transport.complete(&prompt));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(TranslateFault::Transport(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(TranslateFault::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TranslateFault::Transport(
                anyhow::anyhow!("transport worker exited without a response"),
            )),
        }
    }
}

fn request_prompt(request: &str) -> String {
    format!(
        "You are a Linux shell expert. Convert the user's natural-language request into a \
         single, safe (if possible), POSIX-compatible command when possible.\n\
         If the command is dangerous, return the command and explanation; a separate danger \
         check will assess it before running.\n\
         Return ONLY JSON with keys: command, explanation, mode. NO prose, NO code fences.\n\
         If no safe/runnable command is appropriate, set mode to 'explain' and put your \
         guidance in 'explanation' and leave 'command' empty.\n\
         Request: {}",
        request
    )
}

fn error_prompt(command: &str, error: &str, intent: &str) -> String {
    format!(
        "You are a Linux CLI fixer. Given a command that failed and its error output, \
         propose a corrected command.\n\
         Assume a typical Debian/Ubuntu environment unless specified.\n\
         If the intent is ambiguous, choose the most likely command.\n\
         Return ONLY JSON: {{command, explanation, mode}}. NO prose, NO code fences.\n\
         If the best action is to explain instead of running anything (e.g., user typed a \
         non-existent command or must supply operands), set mode to 'explain' and leave \
         'command' empty.\n\n\
         Intent (optional): {}\n\
         Command: {}\n\
         Error: {}\n",
        intent, command, error
    )
}

fn replan_prompt(command: &str, feedback: &str) -> String {
    format!(
        "Rewrite the following shell command to satisfy the user's feedback while \
         minimizing risk.\n\
         Prefer read-only or non-destructive forms. If write action is required, add the \
         smallest scope and backup/--dry-run flags where available.\n\
         Return JSON: {{command, explanation}}.\n\n\
         Original: {}\n\
         Feedback: {}\n",
        command, feedback
    )
}

/// Raw wire shape of a candidate; every field is optional so partial
/// responses still parse.
#[derive(Deserialize)]
struct RawCandidate {
    #[serde(default)]
    command: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    mode: Option<String>,
}

impl From<RawCandidate> for Candidate {
    fn from(raw: RawCandidate) -> Self {
        let mode = match raw.mode.as_deref().map(|m| m.trim().to_lowercase()) {
            Some(ref m) if m == "explain" => CandidateMode::Explain,
            _ => CandidateMode::Run,
        };
        Self {
            command: raw.command,
            explanation: raw.explanation,
            mode,
        }
    }
}

/// Parse a model response into a candidate.
///
/// Strips optional fenced-code wrapping, attempts a strict JSON parse,
/// falls back to the outermost brace-delimited substring, and finally
/// treats the raw text as a literal command with a cautionary note.
pub fn parse_candidate(raw: &str) -> Candidate {
    let text = strip_code_fences(raw.trim());

    if let Ok(parsed) = serde_json::from_str::<RawCandidate>(&text) {
        return parsed.into();
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<RawCandidate>(&text[start..=end]) {
                return parsed.into();
            }
        }
    }

    Candidate {
        command: text,
        explanation: PLAIN_TEXT_FALLBACK.to_string(),
        mode: CandidateMode::Run,
    }
}

/// Drop a surrounding markdown code fence, if present.
fn strip_code_fences(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_string();
    }
    let mut lines = text.lines();
    lines.next(); // opening fence, possibly with a language tag
    let mut body: String = lines.collect::<Vec<_>>().join("\n");
    let trimmed = body.trim_end();
    if trimmed.ends_with("```") {
        body = trimmed[..trimmed.len() - 3].to_string();
    }
    body.trim().to_string()
}

static COMMAND_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"command"\s*:\s*"(.*?)""#).expect("valid command-field regex"));

/// Best-effort extraction of a runnable single-line command from model
/// output, used by the interactive terminal before injecting anything
/// into the shell. Refuses JSON-ish blobs it cannot pick a command out
/// of, and multi-line payloads.
pub fn extract_shell_command(text: &str) -> Option<String> {
    let candidate = text.trim();

    if candidate.contains("\"command\"") || candidate.starts_with('{') {
        let extracted = COMMAND_FIELD.captures(candidate)?;
        let command = extracted[1].replace(['\r', '\n'], " ").trim().to_string();
        return if command.is_empty() { None } else { Some(command) };
    }

    if candidate.contains('\n') || candidate.contains('\r') {
        return None;
    }

    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}
