//! Stream redirections.
//!
//! External commands get their redirections applied inside the child,
//! after the fork and before exec, so nothing here ever touches the
//! shell's own descriptors. Built-ins running in the shell only borrow
//! the opened files as writers.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use failure::ResultExt;
use nix::unistd;

use crate::core::parser::Command;
use crate::errors::{ErrorKind, Result};

const CREATE_MODE: u32 = 0o644;

pub fn open_input(path: &Path) -> Result<File> {
    Ok(File::open(path).with_context(|_| ErrorKind::Redirection(path.display().to_string()))?)
}

pub fn open_output(path: &Path, append: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(CREATE_MODE);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    Ok(options
        .open(path)
        .with_context(|_| ErrorKind::Redirection(path.display().to_string()))?)
}

pub fn open_error(path: &Path) -> Result<File> {
    open_output(path, false)
}

/// Where a built-in's standard output goes.
pub fn builtin_stdout(command: &Command) -> Result<Box<dyn Write>> {
    match command.stdout {
        Some(ref path) => Ok(Box::new(open_output(path, command.append)?)),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Replaces the child's standard streams with the command's redirect
/// targets. Only ever called in a forked child.
pub fn apply_redirections(command: &Command) -> Result<()> {
    if let Some(ref path) = command.stdin {
        replace_stream(open_input(path)?, libc::STDIN_FILENO)?;
    }
    if let Some(ref path) = command.stdout {
        replace_stream(open_output(path, command.append)?, libc::STDOUT_FILENO)?;
    }
    if let Some(ref path) = command.stderr {
        replace_stream(open_error(path)?, libc::STDERR_FILENO)?;
    }
    Ok(())
}

/// `dup2`s `file` onto `target`; dropping `file` closes the original.
fn replace_stream(file: File, target: libc::c_int) -> Result<()> {
    unistd::dup2(file.as_raw_fd(), target).context(ErrorKind::Nix)?;
    Ok(())
}
