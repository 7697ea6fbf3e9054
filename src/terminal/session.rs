//! Event-driven core of the interactive terminal.
//!
//! Consumes `TerminalEvent`s from the adapter, mirrors the user's typing
//! in a shadow line buffer, and on Enter decides whether the line passes
//! through untouched, is consumed as a local command, or is translated
//! and gated before the shell sees it. Translation calls run inline on
//! this loop; a slow model stalls echo for that window by design.

use std::io::Write;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use anyhow::Result;

use crate::safety;
use crate::terminal::context::{CommandFailure, OutputContext, STATUS_PREFIX, STATUS_SUFFIX};
use crate::terminal::pty::{ForegroundSignal, ShellPort, TerminalEvent};
use crate::translate::{extract_shell_command, TranslateKind, Translator};

const CTRL_C: u8 = 0x03;
const CTRL_U: u8 = 0x15;
const CTRL_Z: u8 = 0x1a;
const CTRL_BACKSLASH: u8 = 0x1c;
const BACKSPACE: u8 = 0x7f;
const BACKSPACE_ALT: u8 = 0x08;

const HELP_TEXT: &str = "\r\n=== shellward terminal commands ===\r\n\
/e <request>  - natural language to command\r\n\
/repair on    - enable auto-repair (interactive approval)\r\n\
/repair auto  - enable auto-repair and auto-run fixes\r\n\
/repair off   - disable auto-repair (default)\r\n\
/dry on       - enable dry-run mode\r\n\
/dry off      - disable dry-run mode\r\n\
/help         - show this help\r\n\
/quit         - exit terminal\r\n\r\n";

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub dry_run: bool,
    pub quiet: bool,
    pub auto_repair: bool,
    pub interactive_repair: bool,
    pub context_lines: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            quiet: false,
            auto_repair: false,
            interactive_repair: true,
            context_lines: crate::terminal::context::DEFAULT_CONTEXT_LINES,
        }
    }
}

/// What a slash line resolved to.
enum SlashOutcome {
    /// Handled locally; the shell never sees it.
    Consumed,
    /// Not a known command (may be a path); forward the whole line.
    Forward,
    /// `/e` produced a runnable command to substitute for the line.
    Transformed(String),
}

/// Choice offered when a repair suggestion exists.
enum FixChoice {
    Run,
    Cancel,
    Edit,
    Replan,
}

/// The single-threaded mediation core. Generic over the shell port and
/// the user-facing writer so it runs against fakes in tests.
pub struct TerminalSession<P: ShellPort, W: Write> {
    port: P,
    events: Receiver<TerminalEvent>,
    user_out: W,
    translator: Arc<Translator>,
    context: OutputContext,
    /// Shadow of what the user has typed since the last Enter.
    line_buffer: Vec<u8>,
    /// Typing a slash command: echo locally, withhold from the shell.
    local_echo: bool,
    dry_run: bool,
    quiet: bool,
    auto_repair: bool,
    interactive_repair: bool,
    repair_busy: bool,
    hook_installed: bool,
    /// Failures detected while a blocking prompt was consuming events.
    deferred_failures: Vec<CommandFailure>,
    closed: bool,
}

impl<P: ShellPort, W: Write> TerminalSession<P, W> {
    pub fn new(
        port: P,
        events: Receiver<TerminalEvent>,
        user_out: W,
        translator: Arc<Translator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            port,
            events,
            user_out,
            translator,
            context: OutputContext::new(config.context_lines),
            line_buffer: Vec::new(),
            local_echo: false,
            dry_run: config.dry_run,
            quiet: config.quiet,
            auto_repair: config.auto_repair,
            interactive_repair: config.interactive_repair,
            repair_busy: false,
            hook_installed: false,
            deferred_failures: Vec::new(),
            closed: false,
        }
    }

    /// Run until the shell exits or the user's input stream closes.
    /// Returns the port so the caller can tear the shell down.
    pub fn run(mut self) -> Result<P> {
        self.install_status_hook()?;

        while !self.closed {
            let deferred: Vec<CommandFailure> = self.deferred_failures.drain(..).collect();
            for failure in deferred {
                self.on_failure(failure)?;
            }
            if self.closed {
                break;
            }

            let event = match self.events.recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            self.handle_event(event)?;
        }

        Ok(self.port)
    }

    fn handle_event(&mut self, event: TerminalEvent) -> Result<()> {
        match event {
            TerminalEvent::Output(bytes) => self.on_output(&bytes, false)?,
            TerminalEvent::Input(bytes) => {
                for byte in bytes {
                    self.on_input_byte(byte)?;
                    if self.closed {
                        break;
                    }
                }
            }
            TerminalEvent::Resize { rows, cols } => self.port.resize(rows, cols),
            TerminalEvent::ShellExited | TerminalEvent::InputClosed => self.closed = true,
        }
        Ok(())
    }

    /// Copy shell output to the user verbatim (colors and cursor moves
    /// intact) and feed the context tracker. Failures are handled inline,
    /// or deferred while a prompt owns the event stream.
    fn on_output(&mut self, bytes: &[u8], defer_failures: bool) -> Result<()> {
        self.user_out.write_all(bytes)?;
        self.user_out.flush()?;

        let failures = self.context.append(bytes);
        if defer_failures {
            self.deferred_failures.extend(failures);
        } else {
            for failure in failures {
                self.on_failure(failure)?;
            }
        }
        Ok(())
    }

    fn on_input_byte(&mut self, byte: u8) -> Result<()> {
        match byte {
            CTRL_C => {
                self.port.signal_foreground(ForegroundSignal::Interrupt);
                self.line_buffer.clear();
                self.local_echo = false;
            }
            CTRL_Z => self.port.signal_foreground(ForegroundSignal::Suspend),
            CTRL_BACKSLASH => self.port.signal_foreground(ForegroundSignal::Quit),
            BACKSPACE | BACKSPACE_ALT => {
                if !self.line_buffer.is_empty() {
                    self.line_buffer.pop();
                    if self.line_buffer.is_empty() {
                        self.local_echo = false;
                    }
                }
                if self.local_echo {
                    self.write_user("\u{8} \u{8}")?;
                } else {
                    self.port.write_input(&[byte])?;
                }
            }
            b'\r' | b'\n' => {
                let line = String::from_utf8_lossy(&self.line_buffer).into_owned();
                self.line_buffer.clear();
                self.local_echo = false;
                self.gate_and_send(&line)?;
            }
            _ => {
                let was_empty = self.line_buffer.is_empty();
                self.line_buffer.push(byte);
                // Sticky detection: a line opening with '/' stays local
                // until Enter or until it is deleted.
                if was_empty && byte == b'/' {
                    self.local_echo = true;
                }
                if self.local_echo {
                    self.user_out.write_all(&[byte])?;
                    self.user_out.flush()?;
                } else {
                    self.port.write_input(&[byte])?;
                }
            }
        }
        Ok(())
    }

    /// The interception point: the user pressed Enter.
    fn gate_and_send(&mut self, line: &str) -> Result<()> {
        let original = line.trim_end_matches(['\r', '\n']);
        if original.trim().is_empty() {
            return self.port.write_input(b"\n");
        }

        let mut outgoing = original.to_string();
        let stripped = original.trim_start();
        if stripped.starts_with('/') {
            match self.handle_slash(stripped)? {
                SlashOutcome::Consumed => return Ok(()),
                SlashOutcome::Forward => {
                    // The keystrokes were withheld from the shell, so the
                    // whole line (it may be a path) goes over now.
                    return self
                        .port
                        .write_input(format!("{}\n", original).as_bytes());
                }
                SlashOutcome::Transformed(command) => outgoing = command,
            }
        }

        let transformed = outgoing != original;
        if transformed && !self.gate_transformed(&outgoing)? {
            self.write_user("\r\n[command rejected]\r\n")?;
            return self.port.write_input(b"\n");
        }

        if self.dry_run {
            self.write_user(&format!("\r\n[dry-run] would execute: $ {}\r\n", outgoing))?;
            if !transformed {
                // The typed bytes sit in the shell's readline buffer;
                // clear them so the newline cannot execute the line.
                self.port.write_input(&[CTRL_U])?;
            }
            return self.port.write_input(b"\n");
        }

        self.context.begin_command(outgoing.clone());
        if transformed {
            self.port.send_line(&outgoing)
        } else {
            // The typed bytes are already in the shell's readline buffer.
            self.port.write_input(b"\n")
        }
    }

    fn handle_slash(&mut self, stripped: &str) -> Result<SlashOutcome> {
        let mut tokens = stripped.split_whitespace();
        let command = tokens.next().unwrap_or("");
        let args: Vec<&str> = tokens.collect();

        match command {
            "/q" | "/quit" | "/exit" => {
                self.port.send_line("exit")?;
                Ok(SlashOutcome::Consumed)
            }
            "/help" => {
                self.write_user(HELP_TEXT)?;
                self.port.write_input(b"\n")?;
                Ok(SlashOutcome::Consumed)
            }
            "/repair" => {
                match args.first().copied().unwrap_or("on") {
                    "on" | "interactive" => {
                        self.auto_repair = true;
                        self.interactive_repair = true;
                        self.write_user("\r\n[auto-repair enabled with interactive approval]\r\n")?;
                    }
                    "auto" => {
                        self.auto_repair = true;
                        self.interactive_repair = false;
                        self.write_user("\r\n[auto-repair enabled: fixes run after the safety gate]\r\n")?;
                    }
                    "off" => {
                        self.auto_repair = false;
                        self.write_user("\r\n[auto-repair disabled]\r\n")?;
                    }
                    _ => self.write_user("\r\nUsage: /repair [on|interactive|auto|off]\r\n")?,
                }
                self.port.write_input(b"\n")?;
                Ok(SlashOutcome::Consumed)
            }
            "/dry" => {
                match args.first().copied().unwrap_or("on") {
                    "on" => {
                        self.dry_run = true;
                        self.write_user("\r\n[dry-run enabled]\r\n")?;
                    }
                    "off" => {
                        self.dry_run = false;
                        self.write_user("\r\n[dry-run disabled]\r\n")?;
                    }
                    _ => self.write_user("\r\nUsage: /dry [on|off]\r\n")?,
                }
                self.port.write_input(b"\n")?;
                Ok(SlashOutcome::Consumed)
            }
            "/e" => {
                let request = args.join(" ");
                if request.is_empty() {
                    self.write_user("\r\nUsage: /e <natural language request>\r\n")?;
                    self.port.write_input(b"\n")?;
                    return Ok(SlashOutcome::Consumed);
                }
                self.translate_request(&request)
            }
            _ => Ok(SlashOutcome::Forward),
        }
    }

    /// `/e <request>`: natural language to a runnable line.
    fn translate_request(&mut self, request: &str) -> Result<SlashOutcome> {
        self.write_user("\r\n[ai] contacting language model...\r\n")?;
        let candidate = self
            .translator
            .translate(TranslateKind::Request { request });

        if candidate.is_runnable() {
            let Some(command) = extract_shell_command(&candidate.command) else {
                self.write_user(
                    "\r\n[ai] command extraction failed; model returned non-shell content\r\n",
                )?;
                self.port.write_input(b"\n")?;
                return Ok(SlashOutcome::Consumed);
            };
            if !self.quiet && !candidate.explanation.is_empty() {
                self.write_user(&format!("\r\n[ai] {}\r\n", candidate.explanation))?;
            }
            self.write_user(&format!("$ {}\r\n", command))?;
            return Ok(SlashOutcome::Transformed(command));
        }

        // Nothing runnable came back; offer a follow-up instead of
        // silently doing nothing.
        if !candidate.explanation.is_empty() {
            self.write_user(&format!("\r\n[ai] {}\r\n", candidate.explanation))?;
        }
        self.write_user("\r\n[ai] no command generated\r\n")?;
        self.offer_followup("")?;
        Ok(SlashOutcome::Consumed)
    }

    /// Safety gate for any line that differs from what the user typed:
    /// classify, and block on a y/N confirmation when dangerous.
    fn gate_transformed(&mut self, command: &str) -> Result<bool> {
        let verdict = safety::classify(command);
        if !verdict.dangerous {
            return Ok(true);
        }

        self.write_user(&format!(
            "\r\n=== DANGEROUS COMMAND ===\r\n$ {}\r\n",
            command
        ))?;
        if !verdict.reasons.is_empty() {
            self.write_user("Reasons:\r\n")?;
            for reason in &verdict.reasons {
                self.write_user(&format!(" - {}\r\n", reason))?;
            }
        }

        let answer = self
            .read_line_raw("Run this command? [y/N]: ")?
            .unwrap_or_default()
            .to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    /// A tracked command's output window closed with a failure.
    fn on_failure(&mut self, failure: CommandFailure) -> Result<()> {
        tracing::debug!(
            "command failed (exit {:?}): {}",
            failure.exit_code,
            failure.command
        );

        if !self.auto_repair {
            if failure.error_text.to_lowercase().contains("command not found") {
                self.write_user("\r\n[hint: '/repair on' enables automatic fix suggestions]\r\n")?;
            }
            return Ok(());
        }
        if self.repair_busy {
            return Ok(());
        }

        self.repair_busy = true;
        let outcome = self.try_repair(&failure);
        self.repair_busy = false;
        outcome
    }

    fn try_repair(&mut self, failure: &CommandFailure) -> Result<()> {
        let attempt = self.context.note_repair_attempt(&failure.command);
        tracing::debug!("repair attempt {} for '{}'", attempt, failure.command);

        self.write_user("\r\n[ai] contacting language model...\r\n")?;
        let candidate = self.translator.translate(TranslateKind::Error {
            command: &failure.command,
            error: &failure.error_text,
            intent: "",
        });

        let suggestion = if candidate.is_runnable() {
            extract_shell_command(&candidate.command)
        } else {
            None
        };

        let Some(suggestion) = suggestion else {
            if !candidate.explanation.is_empty() {
                self.write_user(&format!("\r\n[ai] {}\r\n", candidate.explanation))?;
            }
            self.write_user("\r\nNo automatic fix was generated.\r\n")?;
            return self.offer_followup(&failure.command);
        };

        if !self.quiet && !candidate.explanation.is_empty() {
            self.write_user(&format!("\r\n[ai] {}\r\n", candidate.explanation))?;
        }

        if self.interactive_repair {
            match self.prompt_fix_choice(&failure.command, &failure.error_text, &suggestion)? {
                FixChoice::Cancel => return Ok(()),
                FixChoice::Edit => {
                    self.port.prefill_line(&suggestion)?;
                    return self.write_user(&format!("$ {}\r\n", suggestion));
                }
                FixChoice::Replan => {
                    let feedback = self.prompt_replan_feedback()?;
                    return self.replan_flow(&failure.command, &feedback);
                }
                FixChoice::Run => {}
            }
        }

        if !self.gate_transformed(&suggestion)? {
            return self.write_user("\r\n[repaired command rejected]\r\n");
        }
        self.context.begin_command(suggestion.clone());
        self.port.send_line(&suggestion)
    }

    fn prompt_fix_choice(
        &mut self,
        failed: &str,
        error: &str,
        suggestion: &str,
    ) -> Result<FixChoice> {
        self.write_user("\r\n=== Command Failed ===\r\n")?;
        self.write_user(&format!("Failed: $ {}\r\n", failed))?;

        let trimmed = error.trim();
        let mut preview: String = trimmed.chars().take(200).collect();
        if trimmed.chars().count() > 200 {
            preview.push_str("...");
        }
        self.write_user(&format!("Error: {}\r\n", preview))?;
        self.write_user(&format!("\r\nSuggested fix: $ {}\r\n", suggestion))?;

        let answer = self
            .read_line_raw("Choose: [r]un, [c]ancel, [e]dit, [p]lan (replan): ")?
            .unwrap_or_default()
            .to_lowercase();
        Ok(if answer.starts_with('r') {
            FixChoice::Run
        } else if answer.starts_with('e') {
            FixChoice::Edit
        } else if answer.starts_with('p') {
            FixChoice::Replan
        } else {
            FixChoice::Cancel
        })
    }

    /// No suggestion was produced: let the user replan with feedback,
    /// edit the failing command, or drop it.
    fn offer_followup(&mut self, base_command: &str) -> Result<()> {
        let choice = self
            .read_line_raw("Choose: [p]lan (replan), [e]dit, [c]ancel: ")?
            .unwrap_or_default()
            .to_lowercase();

        if choice.starts_with('p') {
            let feedback = self.prompt_replan_feedback()?;
            self.replan_flow(base_command, &feedback)
        } else if choice.starts_with('e') {
            if base_command.is_empty() {
                self.write_user("\r\n")?;
                self.port.write_input(b"\n")
            } else {
                self.port.prefill_line(base_command)?;
                self.write_user(&format!("$ {}\r\n", base_command))
            }
        } else {
            self.port.write_input(b"\n")
        }
    }

    fn prompt_replan_feedback(&mut self) -> Result<String> {
        Ok(self
            .read_line_raw("Describe adjustments for a safer/better alternative (blank to skip): ")?
            .unwrap_or_default())
    }

    fn replan_flow(&mut self, base_command: &str, feedback: &str) -> Result<()> {
        let candidate = self.translator.translate(TranslateKind::Replan {
            command: base_command,
            feedback,
        });

        if !candidate.explanation.is_empty() {
            self.write_user(&format!("\r\n[ai replan] {}\r\n", candidate.explanation))?;
        }
        let command = candidate.command.trim().to_string();
        if command.is_empty() {
            return Ok(());
        }
        if !self.gate_transformed(&command)? {
            return self.write_user("\r\n[replanned command rejected]\r\n");
        }
        self.context.begin_command(command.clone());
        self.port.send_line(&command)
    }

    /// Read one line from the user while in raw mode, consuming events
    /// from the same channel the main loop uses. Shell output arriving
    /// mid-prompt is still displayed; its failure handling is deferred.
    /// Ctrl-C or a closed stream returns `None` (treated as cancel).
    fn read_line_raw(&mut self, prompt: &str) -> Result<Option<String>> {
        self.write_user(prompt)?;
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let event = match self.events.recv() {
                Ok(event) => event,
                Err(_) => {
                    self.closed = true;
                    return Ok(None);
                }
            };

            match event {
                TerminalEvent::Input(bytes) => {
                    for byte in bytes {
                        match byte {
                            b'\r' | b'\n' => {
                                self.write_user("\r\n")?;
                                return Ok(Some(
                                    String::from_utf8_lossy(&buf).trim().to_string(),
                                ));
                            }
                            CTRL_C => {
                                self.write_user("\r\n")?;
                                return Ok(None);
                            }
                            BACKSPACE | BACKSPACE_ALT => {
                                if buf.pop().is_some() {
                                    self.write_user("\u{8} \u{8}")?;
                                }
                            }
                            _ => {
                                buf.push(byte);
                                self.user_out.write_all(&[byte])?;
                                self.user_out.flush()?;
                            }
                        }
                    }
                }
                TerminalEvent::Output(bytes) => self.on_output(&bytes, true)?,
                TerminalEvent::Resize { rows, cols } => self.port.resize(rows, cols),
                TerminalEvent::ShellExited | TerminalEvent::InputClosed => {
                    self.closed = true;
                    return Ok(None);
                }
            }
        }
    }

    /// Configure the shell to print a status sentinel before each prompt
    /// carrying the previous command's exit code. Installed once.
    fn install_status_hook(&mut self) -> Result<()> {
        if self.hook_installed {
            return Ok(());
        }
        let hook = format!(
            "export PROMPT_COMMAND='printf \"\\n{}%d{}\\n\" $?;'\n",
            STATUS_PREFIX, STATUS_SUFFIX
        );
        self.port.write_input(hook.as_bytes())?;
        self.hook_installed = true;
        Ok(())
    }

    fn write_user(&mut self, text: &str) -> Result<()> {
        self.user_out.write_all(text.as_bytes())?;
        self.user_out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::TextCompletion;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakePort {
        writes: Vec<Vec<u8>>,
        sent_lines: Vec<String>,
        prefills: Vec<String>,
        signals: Vec<ForegroundSignal>,
        resizes: Vec<(u16, u16)>,
    }

    impl FakePort {
        fn written_bytes(&self) -> Vec<u8> {
            self.writes.iter().flatten().copied().collect()
        }
    }

    impl ShellPort for FakePort {
        fn write_input(&mut self, bytes: &[u8]) -> Result<()> {
            self.writes.push(bytes.to_vec());
            Ok(())
        }

        fn send_line(&mut self, command: &str) -> Result<()> {
            self.sent_lines.push(command.to_string());
            Ok(())
        }

        fn prefill_line(&mut self, text: &str) -> Result<()> {
            self.prefills.push(text.to_string());
            Ok(())
        }

        fn signal_foreground(&mut self, signal: ForegroundSignal) {
            self.signals.push(signal);
        }

        fn resize(&mut self, rows: u16, cols: u16) {
            self.resizes.push((rows, cols));
        }
    }

    struct FakeTransport {
        responses: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    impl TextCompletion for FakeTransport {
        fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("unexpected translation call");
            }
            Ok(responses.remove(0))
        }
    }

    /// Writer handle that lets the test read what the user saw after the
    /// session consumed it.
    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Build a session whose event queue is pre-loaded; the sender is
    /// dropped so `run` exits once the queue drains. Returns the port
    /// and everything written to the user.
    fn run_session(
        events: Vec<TerminalEvent>,
        responses: &[&str],
        config: SessionConfig,
    ) -> (FakePort, String) {
        let (tx, rx) = mpsc::channel();
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);

        let translator =
            Translator::new(FakeTransport::new(responses), Duration::from_secs(5), false);
        let user_out = SharedBuf::default();
        let session = TerminalSession::new(
            FakePort::default(),
            rx,
            user_out.clone(),
            Arc::new(translator),
            config,
        );

        let port = session.run().expect("session run failed");
        (port, user_out.text())
    }

    fn typed(text: &str) -> TerminalEvent {
        TerminalEvent::Input(text.as_bytes().to_vec())
    }

    fn shell_output(text: &str) -> TerminalEvent {
        TerminalEvent::Output(text.as_bytes().to_vec())
    }

    #[test]
    fn test_untransformed_line_passes_through() {
        let (port, _) = run_session(vec![typed("ls\r")], &[], SessionConfig::default());

        // Bytes were forwarded as typed, Enter became a bare newline, and
        // no line was injected.
        let bytes = port.written_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("ls"));
        assert!(text.ends_with('\n'));
        assert!(port.sent_lines.is_empty());
    }

    #[test]
    fn test_empty_line_forwards_newline() {
        let (port, _) = run_session(vec![typed("\r")], &[], SessionConfig::default());
        assert_eq!(port.writes.last().unwrap(), b"\n");
        assert!(port.sent_lines.is_empty());
    }

    #[test]
    fn test_slash_command_is_withheld_from_shell() {
        let (port, _) = run_session(vec![typed("/help\r")], &[], SessionConfig::default());

        let bytes = port.written_bytes();
        let text = String::from_utf8_lossy(&bytes);
        // The typed "/help" never reached the shell; only the status hook
        // and a fresh-prompt newline did.
        assert!(!text.contains("/help"));
        assert!(text.contains(STATUS_PREFIX));
    }

    #[test]
    fn test_quit_sends_exit_line() {
        let (port, _) = run_session(vec![typed("/q\r")], &[], SessionConfig::default());
        assert_eq!(port.sent_lines, vec!["exit".to_string()]);
    }

    #[test]
    fn test_translate_request_substitutes_line() {
        let (port, _) = run_session(
            vec![typed("/e list files\r")],
            &[r#"{"command":"ls","explanation":"List files","mode":"run"}"#],
            SessionConfig::default(),
        );
        assert_eq!(port.sent_lines, vec!["ls".to_string()]);
    }

    #[test]
    fn test_dangerous_translation_blocked_on_rejection() {
        let (port, _) = run_session(
            vec![typed("/e remove everything\r"), typed("n\r")],
            &[r#"{"command":"rm -rf /","explanation":"Removes all","mode":"run"}"#],
            SessionConfig::default(),
        );
        assert!(port.sent_lines.is_empty());
    }

    #[test]
    fn test_dangerous_translation_runs_when_approved() {
        let (port, _) = run_session(
            vec![typed("/e remove everything\r"), typed("y\r")],
            &[r#"{"command":"rm -rf /","explanation":"Removes all","mode":"run"}"#],
            SessionConfig::default(),
        );
        assert_eq!(port.sent_lines, vec!["rm -rf /".to_string()]);
    }

    #[test]
    fn test_explain_only_translation_offers_followup() {
        // No runnable command; user cancels the follow-up.
        let (port, _) = run_session(
            vec![typed("/e do the impossible\r"), typed("c\r")],
            &[r#"{"command":"","explanation":"Cannot do that","mode":"explain"}"#],
            SessionConfig::default(),
        );
        assert!(port.sent_lines.is_empty());
    }

    #[test]
    fn test_ctrl_c_signals_foreground_and_clears_buffer() {
        let (port, _) = run_session(
            vec![TerminalEvent::Input(vec![b'l', b's', CTRL_C])],
            &[],
            SessionConfig::default(),
        );
        assert_eq!(port.signals, vec![ForegroundSignal::Interrupt]);
    }

    #[test]
    fn test_suspend_and_quit_signals() {
        let (port, _) = run_session(
            vec![TerminalEvent::Input(vec![CTRL_Z, CTRL_BACKSLASH])],
            &[],
            SessionConfig::default(),
        );
        assert_eq!(
            port.signals,
            vec![ForegroundSignal::Suspend, ForegroundSignal::Quit]
        );
    }

    #[test]
    fn test_resize_is_propagated() {
        let (port, _) = run_session(
            vec![TerminalEvent::Resize { rows: 50, cols: 132 }],
            &[],
            SessionConfig::default(),
        );
        assert_eq!(port.resizes, vec![(50, 132)]);
    }

    #[test]
    fn test_command_not_found_hint_when_repair_off() {
        // With auto-repair off, a failure only surfaces a hint; no
        // translation happens (the transport would error if called).
        let (port, seen) = run_session(
            vec![typed("lsf\r"), shell_output("bash: lsf: command not found\n")],
            &[],
            SessionConfig::default(),
        );
        assert!(port.sent_lines.is_empty());
        assert!(seen.contains("[hint: '/repair on'"));
    }

    #[test]
    fn test_auto_repair_injects_gated_fix() {
        let config = SessionConfig {
            auto_repair: true,
            interactive_repair: false,
            ..Default::default()
        };
        let (port, _) = run_session(
            vec![typed("lsf\r"), shell_output("bash: lsf: command not found\n")],
            &[r#"{"command":"ls","explanation":"You meant ls","mode":"run"}"#],
            config,
        );
        assert_eq!(port.sent_lines, vec!["ls".to_string()]);
    }

    #[test]
    fn test_interactive_repair_run_choice() {
        let config = SessionConfig {
            auto_repair: true,
            interactive_repair: true,
            ..Default::default()
        };
        let (port, _) = run_session(
            vec![
                typed("lsf\r"),
                shell_output("bash: lsf: command not found\n"),
                typed("r\r"),
            ],
            &[r#"{"command":"ls","explanation":"You meant ls","mode":"run"}"#],
            config,
        );
        assert_eq!(port.sent_lines, vec!["ls".to_string()]);
    }

    #[test]
    fn test_interactive_repair_edit_prefills() {
        let config = SessionConfig {
            auto_repair: true,
            interactive_repair: true,
            ..Default::default()
        };
        let (port, _) = run_session(
            vec![
                typed("lsf\r"),
                shell_output("bash: lsf: command not found\n"),
                typed("e\r"),
            ],
            &[r#"{"command":"ls","explanation":"You meant ls","mode":"run"}"#],
            config,
        );
        assert!(port.sent_lines.is_empty());
        assert_eq!(port.prefills, vec!["ls".to_string()]);
    }

    #[test]
    fn test_interactive_repair_cancel_choice() {
        let config = SessionConfig {
            auto_repair: true,
            interactive_repair: true,
            ..Default::default()
        };
        let (port, _) = run_session(
            vec![
                typed("lsf\r"),
                shell_output("bash: lsf: command not found\n"),
                typed("c\r"),
            ],
            &[r#"{"command":"ls","explanation":"You meant ls","mode":"run"}"#],
            config,
        );
        assert!(port.sent_lines.is_empty());
        assert!(port.prefills.is_empty());
    }

    #[test]
    fn test_dry_run_blocks_dispatch() {
        let config = SessionConfig {
            dry_run: true,
            ..Default::default()
        };
        let (port, _) = run_session(
            vec![typed("/e list files\r")],
            &[r#"{"command":"ls","explanation":"List","mode":"run"}"#],
            config,
        );
        assert!(port.sent_lines.is_empty());
    }

    #[test]
    fn test_dry_toggle_via_slash_command() {
        let (port, _) = run_session(
            vec![typed("/dry on\r"), typed("ls\r")],
            &[],
            SessionConfig::default(),
        );
        // The typed command was swallowed by dry-run: no bare "\n"-only
        // dispatch recorded as a tracked command.
        assert!(port.sent_lines.is_empty());
    }

    #[test]
    fn test_unknown_slash_line_is_forwarded_whole() {
        let (port, _) = run_session(
            vec![typed("/usr/bin/ls\r")],
            &[],
            SessionConfig::default(),
        );
        let bytes = port.written_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/usr/bin/ls\n"));
    }

    #[test]
    fn test_multiline_model_output_is_refused() {
        let (port, _) = run_session(
            vec![typed("/e list\r")],
            &[r#"{"command":"ls\nrm -rf /","explanation":"sneaky","mode":"run"}"#],
            SessionConfig::default(),
        );
        // The decoded command spans two lines; extraction refuses it and
        // nothing reaches the shell.
        assert!(port.sent_lines.is_empty());
    }
}
