//! Terminal output tracking.
//!
//! Keeps a bounded ring of recent output lines, marks the start of each
//! dispatched command's output window, and detects failures two ways: a
//! status sentinel emitted by the shell prompt hook (authoritative), and
//! a "command not found" substring match (best-effort fast path). A
//! single pending-command token guarantees the same failure is never
//! processed twice.

use std::collections::{HashMap, VecDeque};

/// Marker emitted by the shell prompt hook, carrying the previous
/// command's exit code: `[[shellward:status:<code>]]`.
pub const STATUS_PREFIX: &str = "[[shellward:status:";
pub const STATUS_SUFFIX: &str = "]]";

/// Default bound on retained output lines.
pub const DEFAULT_CONTEXT_LINES: usize = 100;

/// Locale-sensitive fast-path marker for the most common failure class.
const COMMAND_NOT_FOUND: &str = "command not found";

/// A failure detected in the output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    pub error_text: String,
    /// `None` when the command-not-found fast path fired before the
    /// sentinel arrived.
    pub exit_code: Option<i32>,
}

/// The command currently awaiting its output window to close.
#[derive(Debug, Clone)]
struct PendingCommand {
    command: String,
    /// Absolute index of the first line that belongs to this command.
    output_start: u64,
}

/// Bounded ring of recent terminal output with command-window tracking.
///
/// Line indices are absolute (monotonic since session start), so recorded
/// window offsets stay valid across eviction.
pub struct OutputContext {
    lines: VecDeque<String>,
    capacity: usize,
    /// Absolute index of `lines[0]`.
    base: u64,
    /// Carry-over for a line split across read chunks.
    partial: String,
    pending: Option<PendingCommand>,
    /// Repair attempts per distinct failing command text. Metrics only;
    /// nothing consults these to stop retrying.
    repair_attempts: HashMap<String, u32>,
}

impl OutputContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            base: 0,
            partial: String::new(),
            pending: None,
            repair_attempts: HashMap::new(),
        }
    }

    /// Absolute index the next appended line will get.
    pub fn next_index(&self) -> u64 {
        self.base + self.lines.len() as u64
    }

    /// Record the dispatch of `command`: its output window starts at the
    /// current end of the buffer.
    pub fn begin_command(&mut self, command: impl Into<String>) {
        self.pending = Some(PendingCommand {
            command: command.into(),
            output_start: self.next_index(),
        });
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bump and return the repair-attempt count for a failing command.
    pub fn note_repair_attempt(&mut self, command: &str) -> u32 {
        let count = self.repair_attempts.entry(command.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Feed a chunk of raw shell output. Returns any failures whose
    /// windows closed inside this chunk.
    pub fn append(&mut self, data: &[u8]) -> Vec<CommandFailure> {
        let mut failures = Vec::new();
        let text = String::from_utf8_lossy(data);

        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.partial);
                let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
                if let Some(failure) = self.push_line(line) {
                    failures.push(failure);
                }
            } else {
                self.partial.push(ch);
            }
        }

        failures
    }

    /// Append one completed line and run both failure detectors on it.
    fn push_line(&mut self, line: String) -> Option<CommandFailure> {
        let lower = line.to_lowercase();
        let is_sentinel = line.starts_with(STATUS_PREFIX) && line.ends_with(STATUS_SUFFIX);

        self.lines.push_back(line.clone());
        if self.lines.len() > self.capacity {
            self.lines.pop_front();
            self.base += 1;
        }

        if is_sentinel {
            return self.on_sentinel(&line);
        }

        // Fast path: close the window immediately on "command not found"
        // rather than waiting for the sentinel. Taking the pending token
        // here keeps the sentinel from re-processing the same failure.
        if lower.contains(COMMAND_NOT_FOUND) {
            if let Some(pending) = self.pending.take() {
                let error_text = self.slice(pending.output_start, self.next_index());
                return Some(CommandFailure {
                    command: pending.command,
                    error_text,
                    exit_code: None,
                });
            }
        }

        None
    }

    /// Authoritative detector: the prompt hook's status line closed the
    /// window. Non-zero exit captures the window (sentinel excluded);
    /// zero clears the command's repair counter.
    fn on_sentinel(&mut self, line: &str) -> Option<CommandFailure> {
        let code = line
            .strip_prefix(STATUS_PREFIX)
            .and_then(|rest| rest.strip_suffix(STATUS_SUFFIX))
            .and_then(|code| code.trim().parse::<i32>().ok())
            .unwrap_or(0);

        let pending = self.pending.take()?;
        if code != 0 {
            // The sentinel itself was just appended; exclude it.
            let error_text = self.slice(pending.output_start, self.next_index() - 1);
            return Some(CommandFailure {
                command: pending.command,
                error_text,
                exit_code: Some(code),
            });
        }

        self.repair_attempts.remove(&pending.command);
        None
    }

    /// Join the lines in the absolute range [start, end), clamped to what
    /// the ring still holds.
    fn slice(&self, start: u64, end: u64) -> String {
        let start = start.max(self.base);
        let end = end.max(start);
        let from = (start - self.base) as usize;
        let to = ((end - self.base) as usize).min(self.lines.len());

        self.lines
            .iter()
            .skip(from)
            .take(to.saturating_sub(from))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of lines currently retained.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for OutputContext {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sentinel(code: i32) -> String {
        format!("{}{}{}\n", STATUS_PREFIX, code, STATUS_SUFFIX)
    }

    #[test]
    fn test_ring_never_exceeds_capacity() {
        let mut ctx = OutputContext::new(5);
        for i in 0..50 {
            ctx.append(format!("line {}\n", i).as_bytes());
        }
        assert_eq!(ctx.len(), 5);
        // Oldest lines were evicted first; absolute indexing advanced.
        assert_eq!(ctx.next_index(), 50);
    }

    #[test]
    fn test_window_slicing_excludes_sentinel() {
        let mut ctx = OutputContext::new(100);
        ctx.append(b"$ prompt\n");
        ctx.begin_command("cat missing.txt");
        ctx.append(b"cat: missing.txt: No such file or directory\n");
        let failures = ctx.append(sentinel(1).as_bytes());

        assert_eq!(failures.len(), 1);
        let failure = &failures[0];
        assert_eq!(failure.command, "cat missing.txt");
        assert_eq!(failure.exit_code, Some(1));
        assert_eq!(failure.error_text, "cat: missing.txt: No such file or directory");
    }

    #[test]
    fn test_window_captures_multiple_lines() {
        let mut ctx = OutputContext::new(100);
        ctx.begin_command("make");
        ctx.append(b"error: first\nerror: second\n");
        let failures = ctx.append(sentinel(2).as_bytes());

        assert_eq!(failures[0].error_text, "error: first\nerror: second");
    }

    #[test]
    fn test_zero_exit_clears_pending_and_counter() {
        let mut ctx = OutputContext::new(100);
        ctx.note_repair_attempt("ls");
        ctx.begin_command("ls");
        ctx.append(b"file.txt\n");
        let failures = ctx.append(sentinel(0).as_bytes());

        assert!(failures.is_empty());
        assert!(!ctx.has_pending());
        // Counter restarts after a success.
        assert_eq!(ctx.note_repair_attempt("ls"), 1);
    }

    #[test]
    fn test_command_not_found_fast_path() {
        let mut ctx = OutputContext::new(100);
        ctx.begin_command("lsf");
        let failures = ctx.append(b"bash: lsf: command not found\n");

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].command, "lsf");
        assert_eq!(failures[0].exit_code, None);
        assert!(failures[0].error_text.contains("command not found"));
    }

    #[test]
    fn test_fast_path_claims_pending_exactly_once() {
        // The late sentinel for the same failure must not produce a
        // second event: the fast path already took the pending token.
        let mut ctx = OutputContext::new(100);
        ctx.begin_command("lsf");
        let first = ctx.append(b"bash: lsf: command not found\n");
        assert_eq!(first.len(), 1);

        let second = ctx.append(sentinel(127).as_bytes());
        assert!(second.is_empty());
    }

    #[test]
    fn test_sentinel_without_pending_is_ignored() {
        let mut ctx = OutputContext::new(100);
        let failures = ctx.append(sentinel(1).as_bytes());
        assert!(failures.is_empty());
    }

    #[test]
    fn test_line_split_across_chunks_reassembles() {
        let mut ctx = OutputContext::new(100);
        ctx.begin_command("lsf");
        let first = ctx.append(b"bash: lsf: comman");
        assert!(first.is_empty());
        let second = ctx.append(b"d not found\n");
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_slice_survives_eviction() {
        let mut ctx = OutputContext::new(4);
        ctx.begin_command("chatty");
        for i in 0..10 {
            ctx.append(format!("out {}\n", i).as_bytes());
        }
        let failures = ctx.append(sentinel(1).as_bytes());

        // Window start predates the ring; capture clamps to what remains.
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_text, "out 7\nout 8\nout 9");
    }

    #[test]
    fn test_repair_attempts_are_counted_but_unbounded() {
        let mut ctx = OutputContext::new(100);
        for expected in 1..=12 {
            assert_eq!(ctx.note_repair_attempt("badcmd"), expected);
        }
    }

    #[test]
    fn test_crlf_lines_are_normalized() {
        let mut ctx = OutputContext::new(100);
        ctx.begin_command("x");
        ctx.append(b"bash: x: command not found\r\n");
        // The \r was stripped before matching and storage.
        assert_eq!(ctx.len(), 1);
    }
}
