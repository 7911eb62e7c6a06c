use crate::shell::builtins::{
    self, prelude::*, Bg, Cd, Echo, Exit, Fg, History, Jobs, Kill, Pwd,
};

pub struct Help;

impl builtins::BuiltinCommand for Help {
    const NAME: &'static str = builtins::HELP_NAME;

    const HELP: &'static str = "\
help: help [command ...]
    Display helpful information about builtin commands. If COMMAND is specified,
    gives detailed help on all commands matching COMMAND, otherwise a list of the
    builtins is printed.";

    fn run<T: AsRef<str>>(
        _shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        if args.is_empty() {
            for usage in &usage_lines() {
                writeln!(stdout, "{}", usage).context(ErrorKind::Io)?;
            }
            return Ok(ExitStatus::from_success());
        }

        let mut all_invalid = true;
        for arg in args {
            if let Some(help) = help_text(arg.as_ref()) {
                writeln!(stdout, "{}", help).context(ErrorKind::Io)?;
                all_invalid = false;
            }
        }
        if all_invalid {
            let topic = args.last().map(|arg| arg.as_ref()).unwrap_or_default();
            return Err(Error::builtin_command(
                format!("help: no help topics match `{}'", topic),
                1,
            ));
        }
        Ok(ExitStatus::from_success())
    }
}

fn help_text(name: &str) -> Option<&'static str> {
    let help = match name {
        builtins::BG_NAME => Bg::HELP,
        builtins::CD_NAME => Cd::HELP,
        builtins::ECHO_NAME => Echo::HELP,
        builtins::EXIT_NAME => Exit::HELP,
        builtins::FG_NAME => Fg::HELP,
        builtins::HELP_NAME => Help::HELP,
        builtins::HISTORY_NAME => History::HELP,
        builtins::JOBS_NAME => Jobs::HELP,
        builtins::KILL_NAME => Kill::HELP,
        builtins::PWD_NAME => Pwd::HELP,
        _ => return None,
    };
    Some(help)
}

fn usage_lines() -> Vec<String> {
    vec![
        Bg::usage(),
        Cd::usage(),
        Echo::usage(),
        Exit::usage(),
        Fg::usage(),
        Help::usage(),
        History::usage(),
        Jobs::usage(),
        Kill::usage(),
        Pwd::usage(),
    ]
}
