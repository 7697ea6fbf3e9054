//! Interactive pseudo-terminal multiplexer.
//!
//! Proxies a real shell session byte-for-byte while intercepting
//! completed input lines for translation, safety gating, and repair.
//! `pty` owns the OS primitives, `context` tracks output windows, and
//! `session` is the pure event-driven core.

pub mod context;
pub mod pty;
pub mod session;

pub use pty::{ForegroundSignal, PtyShell, RawModeGuard, ShellPort, TerminalEvent};
pub use session::{SessionConfig, TerminalSession};
