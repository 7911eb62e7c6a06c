//! Minibash builtins
//!
//! This module includes the implementations of common shell builtin commands.
//! Where possible the commands conform to their standard Bash counterparts.

use std::iter;

use docopt::Docopt;
use failure::Fail;
use serde::de::DeserializeOwned;

use self::prelude::*;
use crate::core::job::JobId;

use self::dirs::{Cd, Pwd};
use self::echo::Echo;
use self::exit::Exit;
use self::help::Help;
use self::history::History;
use self::jobs::{Bg, Fg, Jobs};
use self::kill::Kill;

pub mod prelude {
    pub use std::io::Write;
    pub use std::process::ExitStatus;

    pub use failure::ResultExt;
    pub use log::debug;
    pub use serde_derive::Deserialize;

    pub use super::{parse_args, parse_job_spec, BuiltinCommand};
    pub use crate::errors::{Error, ErrorKind, Result};
    pub use crate::shell::shell::Shell;
    pub use crate::util::MinibashExitStatusExt;
}

mod dirs;
mod echo;
mod exit;
mod help;
mod history;
mod jobs;
mod kill;

const BG_NAME: &str = "bg";
const CD_NAME: &str = "cd";
const ECHO_NAME: &str = "echo";
const EXIT_NAME: &str = "exit";
const FG_NAME: &str = "fg";
const HELP_NAME: &str = "help";
const HISTORY_NAME: &str = "history";
const JOBS_NAME: &str = "jobs";
const KILL_NAME: &str = "kill";
const PWD_NAME: &str = "pwd";

/// Represents a Minibash builtin command such as cd or help.
pub trait BuiltinCommand {
    /// The NAME of the command.
    const NAME: &'static str;
    /// The help string to display to the user.
    const HELP: &'static str;
    /// The usage string to display to the user.
    fn usage() -> String {
        Self::HELP.lines().next().unwrap_or(Self::NAME).to_owned()
    }
    /// Runs the command with the given arguments in the `shell` environment.
    fn run<T: AsRef<str>>(shell: &mut Shell, args: &[T], stdout: &mut dyn Write)
        -> Result<ExitStatus>;
}

pub fn is_builtin<T: AsRef<str>>(program: T) -> bool {
    [
        BG_NAME,
        CD_NAME,
        ECHO_NAME,
        EXIT_NAME,
        FG_NAME,
        HELP_NAME,
        HISTORY_NAME,
        JOBS_NAME,
        KILL_NAME,
        PWD_NAME,
    ]
    .contains(&program.as_ref())
}

/// precondition: command is a builtin.
pub fn run<S1, S2>(
    shell: &mut Shell,
    program: S1,
    args: &[S2],
    stdout: &mut dyn Write,
) -> Result<ExitStatus>
where
    S1: AsRef<str>,
    S2: AsRef<str>,
{
    debug_assert!(is_builtin(&program));
    debug!("running builtin {}", program.as_ref());

    match program.as_ref() {
        BG_NAME => Bg::run(shell, args, stdout),
        CD_NAME => Cd::run(shell, args, stdout),
        ECHO_NAME => Echo::run(shell, args, stdout),
        EXIT_NAME => Exit::run(shell, args, stdout),
        FG_NAME => Fg::run(shell, args, stdout),
        HELP_NAME => Help::run(shell, args, stdout),
        HISTORY_NAME => History::run(shell, args, stdout),
        JOBS_NAME => Jobs::run(shell, args, stdout),
        KILL_NAME => Kill::run(shell, args, stdout),
        PWD_NAME => Pwd::run(shell, args, stdout),
        other => Err(ErrorKind::CommandNotFound(other.to_string()).into()),
    }
}

pub fn parse_args<D, S, I>(usage: &str, program: S, args: I) -> Result<D>
where
    D: DeserializeOwned,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Docopt::new(usage)
        .and_then(|d| d.argv(iter::once(program).chain(args)).deserialize())
        .map_err(|e| e.context(ErrorKind::Docopt).into())
}

/// Parses `%n` or `n` into a job id.
pub fn parse_job_spec(program: &str, spec: &str) -> Result<JobId> {
    let digits = if spec.starts_with('%') {
        &spec[1..]
    } else {
        spec
    };
    digits
        .parse::<u32>()
        .map(JobId)
        .map_err(|_| Error::builtin_command(format!("{}: {}: no such job", program, spec), 1))
}
