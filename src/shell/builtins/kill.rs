use std::convert::TryFrom;
use std::process::Command;
use std::str::FromStr;

use nix::sys::signal::Signal;

use crate::core::job::JobStatus;
use crate::shell::builtins::{self, prelude::*};
use crate::shell::job_control;

pub struct Kill;

impl builtins::BuiltinCommand for Kill {
    const NAME: &'static str = builtins::KILL_NAME;

    const HELP: &'static str = "\
kill: kill %job_spec [signal] | pid ...
    Send a signal to a job.

    Send SIGNAL (SIGTERM by default) to the processes of the job identified
    by JOB_SPEC. SIGNAL may be a name (TERM, SIGTERM) or a number, with or
    without a leading `-'. Any other arguments are handed to the external
    kill program.

    Exit Status:
    Returns success unless an invalid option is given or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let spec = match args.first() {
            Some(spec) => spec.as_ref(),
            None => return Err(Error::builtin_command(Self::usage(), 2)),
        };

        if !spec.starts_with('%') {
            return run_external_kill(args, stdout);
        }

        let job_id = parse_job_spec(Self::NAME, spec)?;
        let signal = match args.get(1) {
            Some(name) => parse_signal(name.as_ref())?,
            None => Signal::SIGTERM,
        };
        let job = shell
            .jobs
            .find_by_id(job_id)
            .cloned()
            .ok_or_else(|| Error::builtin_command(format!("kill: {}: no such job", spec), 1))?;

        job_control::signal_job(&job, signal)?;
        // A stopped job only acts on most signals once it runs again.
        if job.status() == JobStatus::Stopped && !is_stop_signal(signal) {
            job_control::signal_job(&job, Signal::SIGCONT)?;
            shell.jobs.set_status(job.process_id(), JobStatus::Running);
        }
        Ok(ExitStatus::from_success())
    }
}

fn run_external_kill<T: AsRef<str>>(args: &[T], stdout: &mut dyn Write) -> Result<ExitStatus> {
    let output = Command::new("kill")
        .args(args.iter().map(|arg| arg.as_ref()))
        .output()
        .context(ErrorKind::Io)?;
    stdout.write_all(&output.stdout).context(ErrorKind::Io)?;
    if !output.stderr.is_empty() {
        eprint!("{}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(output.status)
}

fn parse_signal(name: &str) -> Result<Signal> {
    let name = name.trim_start_matches('-');
    let parsed = match name.parse::<i32>() {
        Ok(number) => Signal::try_from(number).ok(),
        Err(_) if name.starts_with("SIG") => Signal::from_str(name).ok(),
        Err(_) => Signal::from_str(&format!("SIG{}", name)).ok(),
    };
    parsed.ok_or_else(|| {
        Error::builtin_command(format!("kill: {}: invalid signal specification", name), 1)
    })
}

fn is_stop_signal(signal: Signal) -> bool {
    match signal {
        Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU => true,
        _ => false,
    }
}
