use crate::core::job::JobId;
use crate::shell::builtins::{self, prelude::*};

pub struct Jobs;

const JOBS_USAGE: &str = "
Usage:
    jobs [-l | -p]

Options:
    -l  Also list the seconds since each job started.
    -p  List process IDs only.
";

#[derive(Debug, Deserialize)]
struct JobsArgs {
    flag_l: bool,
    flag_p: bool,
}

impl builtins::BuiltinCommand for Jobs {
    const NAME: &'static str = builtins::JOBS_NAME;

    const HELP: &'static str = "\
jobs: jobs [-l | -p]
    Display status of jobs.

    Lists the active jobs as `[id]  pid  status  command'.

    Options:
        -l      also lists the seconds elapsed since each job started
        -p      lists process IDs only

    Exit Status:
    Returns success unless an invalid option is given or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let args: JobsArgs =
            parse_args(JOBS_USAGE, Self::NAME, args.iter().map(|arg| arg.as_ref()))?;
        debug!("{:?}", args);

        for job in shell.list_jobs() {
            if args.flag_p {
                writeln!(stdout, "{}", job.process_id()).context(ErrorKind::Io)?;
            } else if args.flag_l {
                writeln!(
                    stdout,
                    "[{}]\t{}\t{}\t{}s\t{}",
                    job.id(),
                    job.process_id(),
                    job.status(),
                    job.elapsed().as_secs(),
                    job.label()
                )
                .context(ErrorKind::Io)?;
            } else {
                writeln!(
                    stdout,
                    "[{}]\t{}\t{}\t{}",
                    job.id(),
                    job.process_id(),
                    job.status(),
                    job.label()
                )
                .context(ErrorKind::Io)?;
            }
        }

        Ok(ExitStatus::from_success())
    }
}

pub struct Fg;

impl builtins::BuiltinCommand for Fg {
    const NAME: &'static str = builtins::FG_NAME;

    const HELP: &'static str = "\
fg: fg [job_spec]
    Move job to the foreground.

    Place the job identified by JOB_SPEC in the foreground, making it
    the current job. If JOB_SPEC is not present, the most recently
    started job is used.

    Exit Status:
    Status of command placed in foreground or failure if an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let job_id = match args.first() {
            Some(spec) => parse_job_spec(Self::NAME, spec.as_ref())?,
            None => current_job(shell, Self::NAME)?,
        };
        shell.resume(Some(job_id), true)
    }
}

pub struct Bg;

impl builtins::BuiltinCommand for Bg {
    const NAME: &'static str = builtins::BG_NAME;

    const HELP: &'static str = "\
bg: bg [job_spec ...]
    Move jobs to the background.

    Place the jobs identified by each JOB_SPEC in the background, as if they
    had been started with `&'. If JOB_SPEC is not present, the most recently
    started job is used.

    Exit Status:
    Returns success unless a job cannot be found or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        if args.is_empty() {
            let job_id = current_job(shell, Self::NAME)?;
            return shell.resume(Some(job_id), false);
        }

        // Every job is attempted; earlier failures are reported here and
        // the last one becomes the result.
        let mut failure: Option<Error> = None;
        for spec in args {
            let result = parse_job_spec(Self::NAME, spec.as_ref())
                .and_then(|job_id| shell.resume(Some(job_id), false));
            if let Err(e) = result {
                if let Some(previous) = failure.replace(e) {
                    eprintln!("minibash: {}", previous);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(ExitStatus::from_success()),
        }
    }
}

/// The most recently started job.
fn current_job(shell: &Shell, program: &str) -> Result<JobId> {
    shell
        .list_jobs()
        .last()
        .map(|job| job.id())
        .ok_or_else(|| Error::builtin_command(format!("{}: current: no such job", program), 1))
}
