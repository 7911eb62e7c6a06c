//! The execution core: launching commands and pipelines, and controlling
//! the jobs they become.

pub use self::shell::Shell;

use crate::history::DEFAULT_HISTORY_CAPACITY;

pub mod builtins;
pub mod execute_command;
pub mod job_control;
pub mod pipeline;
pub mod redirect;
#[allow(clippy::module_inception)]
pub mod shell;

/// Policy object to control a Shell's behavior
#[derive(Debug, Copy, Clone)]
pub struct ShellConfig {
    /// Determines if new command entries will be added to the shell's command history.
    ///
    /// Note: This is checked before the other command history config fields.
    enable_command_history: bool,

    /// Number of entries to store in the shell's command history
    command_history_capacity: usize,

    /// Determines if job control (fg and bg) is supported.
    enable_job_control: bool,

    /// Determines if some messages (e.g. "exit", finished jobs) should be displayed.
    display_messages: bool,
}

impl ShellConfig {
    /// Creates an interactive shell, e.g. command history, job control
    ///
    /// # Complete List
    /// - Command History is enabled
    /// - Job Control is enabled when standard input is a terminal
    /// - Some additional messages are displayed
    pub fn interactive(command_history_capacity: usize) -> Self {
        Self {
            enable_command_history: true,
            command_history_capacity,
            enable_job_control: true,
            display_messages: true,
        }
    }

    /// Creates a noninteractive shell, e.g. no command history, no job control
    ///
    /// # Complete List
    /// - Command History is disabled. Commands are not saved. The history builtin command is not
    ///   affected by this option.
    /// - Job Control is disabled. Background jobs still run and can be waited for with `fg`.
    /// - Fewer messages are displayed
    pub fn noninteractive() -> Self {
        Default::default()
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enable_command_history: false,
            command_history_capacity: DEFAULT_HISTORY_CAPACITY,
            enable_job_control: false,
            display_messages: false,
        }
    }
}
