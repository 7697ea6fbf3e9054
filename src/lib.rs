//! shellward mediates a user's interaction with an operating-system shell.
//!
//! Typed input is intercepted; natural language and failed commands are
//! translated into runnable candidates by a language model; every
//! candidate is screened for destructive effects and gated behind human
//! approval when risk is detected; approved commands execute, and
//! failures feed an optional repair loop. The same decisions are
//! available to out-of-process callers through a local socket daemon.
//!
//! This is cooperative interception, not a sandbox: a user or shell can
//! bypass it, and the screening is pattern-based, not semantic.

pub mod config;
pub mod daemon;
pub mod exec;
pub mod interact;
pub mod safety;
pub mod terminal;
pub mod translate;
pub mod workflow;
