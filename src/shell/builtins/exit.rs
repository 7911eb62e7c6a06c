use crate::shell::builtins::{self, prelude::*};

pub struct Exit;

impl builtins::BuiltinCommand for Exit {
    const NAME: &'static str = builtins::EXIT_NAME;

    const HELP: &'static str = "\
exit: exit [n]
    Exit the shell with a status of N. If N is omitted, the exit status
    is that of the last command executed.

    If there are stopped jobs, the first attempt only warns about them.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        if !shell.confirm_exit() {
            return Err(Error::builtin_command("There are stopped jobs.", 1));
        }

        let status = args.first().map(|arg| {
            let arg = arg.as_ref();
            let code = arg.parse::<i32>().unwrap_or_else(|_| {
                eprintln!("minibash: exit: {}: numeric argument required", arg);
                2
            });
            ExitStatus::from_status(code)
        });
        shell.exit(status);
    }
}
