//! OS-facing terminal adapter.
//!
//! Allocates a PTY, forks the real shell onto its slave side, and feeds a
//! single event channel from three small threads: PTY output, user
//! stdin, and a window-size poller (polling avoids a SIGWINCH handler,
//! matching how the terminal size is watched elsewhere in this family of
//! tools). The session core consumes the channel; this module never
//! makes mediation decisions.

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Events delivered to the session core. The channel `recv` is the
/// session's only blocking point.
#[derive(Debug)]
pub enum TerminalEvent {
    /// Bytes produced by the shell (PTY master side).
    Output(Vec<u8>),
    /// Bytes typed by the user.
    Input(Vec<u8>),
    /// The controlling terminal was resized.
    Resize { rows: u16, cols: u16 },
    /// The shell exited (PTY EOF).
    ShellExited,
    /// The user's input stream closed.
    InputClosed,
}

/// Signals the session may deliver to the shell's foreground job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundSignal {
    Interrupt,
    Suspend,
    Quit,
}

impl ForegroundSignal {
    fn to_signal(self) -> Signal {
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Suspend => Signal::SIGTSTP,
            Self::Quit => Signal::SIGQUIT,
        }
    }

    /// Raw control byte written into the PTY as a last resort.
    fn control_byte(self) -> u8 {
        match self {
            Self::Interrupt => 0x03,
            Self::Suspend => 0x1a,
            Self::Quit => 0x1c,
        }
    }
}

/// Clears the shell's readline buffer before an injected line.
const CTRL_U: u8 = 0x15;

/// How often the size poller compares the terminal dimensions.
const RESIZE_POLL_MS: u64 = 100;

/// Operations the session core needs from the shell side. Implemented by
/// `PtyShell`; tests substitute a recording fake.
pub trait ShellPort {
    /// Forward raw bytes to the shell's input.
    fn write_input(&mut self, bytes: &[u8]) -> Result<()>;
    /// Clear the readline buffer and dispatch a full command line.
    fn send_line(&mut self, command: &str) -> Result<()>;
    /// Clear the readline buffer and pre-fill it without dispatching.
    fn prefill_line(&mut self, text: &str) -> Result<()>;
    /// Deliver a signal to the shell's foreground process group.
    /// Failures degrade to a control byte, never an error.
    fn signal_foreground(&mut self, signal: ForegroundSignal);
    /// Propagate a window-size change to the PTY.
    fn resize(&mut self, rows: u16, cols: u16);
}

/// A live shell behind a PTY.
pub struct PtyShell {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    child_pid: u32,
}

impl PtyShell {
    /// Allocate a PTY sized like the controlling terminal, spawn the
    /// shell on its slave side, and start the event-producing threads.
    pub fn spawn(shell: &[String]) -> Result<(Self, Receiver<TerminalEvent>)> {
        anyhow::ensure!(!shell.is_empty(), "No shell command configured");

        let (rows, cols) = current_terminal_size();
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to allocate PTY")?;

        let mut cmd = CommandBuilder::new(&shell[0]);
        cmd.args(&shell[1..]);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn shell")?;
        let child_pid = child.process_id().unwrap_or(0);
        tracing::debug!("spawned shell {} with pid {}", shell[0], child_pid);

        let (tx, rx) = mpsc::channel::<TerminalEvent>();

        let mut reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        let tx_output = tx.clone();
        thread::spawn(move || pump_output(&mut *reader, &tx_output));
        spawn_stdin_thread(tx.clone());
        spawn_resize_thread(tx);

        Ok((
            Self {
                master: pair.master,
                writer,
                child,
                child_pid,
            },
            rx,
        ))
    }

    /// Signal the shell to hang up and reap it.
    pub fn shutdown(mut self) {
        if self.child_pid > 0 {
            if let Err(e) = signal::kill(Pid::from_raw(self.child_pid as i32), Signal::SIGHUP) {
                tracing::debug!("SIGHUP to shell failed: {}", e);
            }
        }
        if let Err(e) = self.child.wait() {
            tracing::debug!("reaping shell failed: {}", e);
        }
    }
}

impl ShellPort for PtyShell {
    fn write_input(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .context("Failed to write to PTY")?;
        self.writer.flush().context("Failed to flush PTY")
    }

    fn send_line(&mut self, command: &str) -> Result<()> {
        self.write_input(&[CTRL_U])?;
        self.write_input(command.as_bytes())?;
        self.write_input(b"\n")
    }

    fn prefill_line(&mut self, text: &str) -> Result<()> {
        self.write_input(&[CTRL_U])?;
        self.write_input(text.as_bytes())
    }

    fn signal_foreground(&mut self, fg: ForegroundSignal) {
        let sig = fg.to_signal();

        // Preferred: the PTY's current foreground process group.
        if let Some(pgid) = self.master.process_group_leader() {
            if pgid > 0 && signal::killpg(Pid::from_raw(pgid), sig).is_ok() {
                return;
            }
        }

        // Fallback: the shell's own process group, then the shell itself.
        if self.child_pid > 0 {
            let pid = Pid::from_raw(self.child_pid as i32);
            if signal::killpg(pid, sig).is_ok() || signal::kill(pid, sig).is_ok() {
                return;
            }
        }

        // Last resort: write the control byte straight into the PTY.
        if let Err(e) = self.write_input(&[fg.control_byte()]) {
            tracing::debug!("control-byte fallback failed: {}", e);
        }
    }

    fn resize(&mut self, rows: u16, cols: u16) {
        if let Err(e) = self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            tracing::debug!("PTY resize failed: {}", e);
        }
    }
}

/// Puts the controlling terminal into raw mode, restoring the original
/// attributes on drop.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("Failed to enter raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!("failed to restore terminal attributes: {}", e);
        }
    }
}

/// Current (rows, cols) of the controlling terminal.
fn current_terminal_size() -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if rows > 0 && cols > 0 => (rows, cols),
        _ => (24, 80),
    }
}

/// Copy PTY output into the event channel until EOF.
fn pump_output(reader: &mut (dyn Read + Send), tx: &Sender<TerminalEvent>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(TerminalEvent::ShellExited);
                break;
            }
            Ok(n) => {
                if tx.send(TerminalEvent::Output(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::WouldBlock {
                    tracing::debug!("PTY read error: {}", e);
                    let _ = tx.send(TerminalEvent::ShellExited);
                    break;
                }
            }
        }
    }
}

/// Copy user keystrokes into the event channel until stdin closes.
///
/// The thread may outlive the session while blocked in `read`; it exits
/// on the first send to a dropped receiver.
fn spawn_stdin_thread(tx: Sender<TerminalEvent>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdin = stdin.lock();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(TerminalEvent::InputClosed);
                    break;
                }
                Ok(n) => {
                    if tx.send(TerminalEvent::Input(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::WouldBlock {
                        tracing::debug!("stdin read error: {}", e);
                        let _ = tx.send(TerminalEvent::InputClosed);
                        break;
                    }
                }
            }
        }
    });
}

/// Watch the controlling terminal's size and emit resize events.
fn spawn_resize_thread(tx: Sender<TerminalEvent>) {
    thread::spawn(move || {
        let mut last = current_terminal_size();
        loop {
            thread::sleep(Duration::from_millis(RESIZE_POLL_MS));
            let current = current_terminal_size();
            if current != last {
                let (rows, cols) = current;
                if tx.send(TerminalEvent::Resize { rows, cols }).is_err() {
                    break;
                }
                last = current;
            }
        }
    });
}
