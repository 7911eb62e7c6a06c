use crate::shell::builtins::{self, prelude::*};

pub struct History;

const USAGE: &str = "
Usage:
    history [<n>]
    history -c
";

#[derive(Debug, Deserialize)]
struct HistoryArgs {
    arg_n: Option<String>,
    flag_c: bool,
}

impl builtins::BuiltinCommand for History {
    const NAME: &'static str = builtins::HISTORY_NAME;

    const HELP: &'static str = "\
history: history [-c] [n]
    Display the history list with line numbers. An argument of N lists
    only the last N entries. The `-c' option clears the history list.

    Exit Status:
    Returns success unless an invalid option is given.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let args: HistoryArgs =
            parse_args(USAGE, Self::NAME, args.iter().map(|arg| arg.as_ref()))?;
        debug!("{:?}", args);

        if args.flag_c {
            shell.history.clear();
            return Ok(ExitStatus::from_success());
        }

        let count = match args.arg_n {
            None => shell.history.len(),
            Some(ref n) => match n.parse::<usize>() {
                Ok(count) if count > 0 => count,
                _ => {
                    return Err(Error::builtin_command(
                        format!("history: {}: positive numeric argument required", n),
                        1,
                    ))
                }
            },
        };

        for (number, line) in shell.history.last(count) {
            writeln!(stdout, "{}\t{}", number, line).context(ErrorKind::Io)?;
        }
        Ok(ExitStatus::from_success())
    }
}
