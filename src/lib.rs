//! Mirage
//!
//! Interactive shell honeypot engine. Attackers get a believable Linux
//! device: a persona-specific filesystem, a fake shell answering common
//! reconnaissance and download commands, and raw terminal line editing.
//! Every session is recorded as a stream of structured events.

pub mod config;
pub mod engine;
pub mod events;
pub mod intel;
pub mod persona;
pub mod server;
pub mod session;
pub mod shell;
pub mod terminal;
pub mod vfs;

#[cfg(test)]
mod session_tests;
#[cfg(test)]
mod shell_tests;
