//! Local IPC daemon exposing mediation decisions over a Unix socket.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use server::Daemon;
