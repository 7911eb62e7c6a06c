//! Minibash - a small job-control command interpreter.
//!
//! The core runs single commands and pipelines as child processes, tracks
//! background and stopped jobs in a bounded table, and moves jobs between
//! the foreground and the background.

#[macro_use]
mod util;

pub mod core;
pub mod errors;
pub mod history;
pub mod shell;

pub use crate::shell::{Shell, ShellConfig};
pub use crate::util::MinibashExitStatusExt;
