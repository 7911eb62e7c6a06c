use std::env;
use std::path::PathBuf;

use crate::shell::builtins::{self, prelude::*};

pub struct Cd;

impl builtins::BuiltinCommand for Cd {
    const NAME: &'static str = builtins::CD_NAME;

    const HELP: &'static str = "\
cd: cd [dir]
    Change the shell working directory.

    Change the current directory to DIR. The default DIR is the value of the
    HOME variable. A leading `~' is replaced by HOME. If DIR is `-', the
    previous working directory (OLDPWD) is used and printed.

    Exit Status:
    Returns 0 if the directory is changed; non-zero otherwise.";

    fn run<T: AsRef<str>>(
        _shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let dir = match args.first().map(|arg| arg.as_ref()) {
            None | Some("~") => home_dir()?,
            Some("-") => {
                let dir = env::var_os("OLDPWD")
                    .map(PathBuf::from)
                    .ok_or_else(|| Error::builtin_command("cd: OLDPWD not set", 1))?;
                writeln!(stdout, "{}", dir.display()).context(ErrorKind::Io)?;
                dir
            }
            Some(arg) if arg.starts_with("~/") => home_dir()?.join(&arg[2..]),
            Some(arg) => PathBuf::from(arg),
        };

        let previous = env::current_dir().ok();
        env::set_current_dir(&dir).map_err(|e| {
            Error::builtin_command(format!("cd: {}: {}", dir.display(), e), 1)
        })?;
        if let Some(previous) = previous {
            env::set_var("OLDPWD", previous);
        }
        if let Ok(current) = env::current_dir() {
            env::set_var("PWD", current);
        }
        debug!("changed directory to {}", dir.display());
        Ok(ExitStatus::from_success())
    }
}

fn home_dir() -> Result<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(::dirs::home_dir)
        .ok_or_else(|| Error::builtin_command("cd: HOME not set", 1))
}

pub struct Pwd;

impl builtins::BuiltinCommand for Pwd {
    const NAME: &'static str = builtins::PWD_NAME;

    const HELP: &'static str = "\
pwd: pwd
    Print the name of the current working directory.

    Exit Status:
    Returns 0 unless the current directory cannot be read.";

    fn run<T: AsRef<str>>(
        _shell: &mut Shell,
        _args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let cwd = env::current_dir()
            .map_err(|e| Error::builtin_command(format!("pwd: {}", e), 1))?;
        writeln!(stdout, "{}", cwd.display()).context(ErrorKind::Io)?;
        Ok(ExitStatus::from_success())
    }
}
