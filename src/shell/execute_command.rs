//! Spawning and waiting for external commands.

use std::ffi::CString;
use std::io::{self, Write};
use std::process::ExitStatus;

use failure::{Fail, ResultExt};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use crate::core::job::JobStatus;
use crate::core::job::JobTable;
use crate::core::parser::{self, Command};
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::{job_control, redirect, shell::Shell};
use crate::util::{self, MinibashExitStatusExt};

/// Exit status of a child that could not run its command at all.
pub const CHILD_FAILURE_EXIT_STATUS: i32 = 1;

/// What a blocking wait observed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WaitOutcome {
    /// Exited or was killed; signals map to `128 + signal`.
    Exited(ExitStatus),
    Stopped(Signal),
}

/// How a freshly forked child prepares itself before running its command.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChildSetup {
    pub job_control: bool,
    /// Group to join; `None` makes the child lead a new one.
    pub process_group: Option<Pid>,
    pub foreground: bool,
}

impl ChildSetup {
    /// Best effort: the parent repeats `setpgid`, and a child that cannot
    /// take the terminal still runs. Failures are dropped rather than
    /// logged since the child shares the shell's log file.
    fn apply(&self) {
        if self.job_control {
            let pid = unistd::getpid();
            let pgid = self.process_group.unwrap_or(pid);
            let _ = unistd::setpgid(pid, pgid);

            // Done in both parent and child to avoid racing the exec. This
            // must happen before stdin is replaced by a pipe or a file.
            if self.foreground {
                let _ = unistd::tcsetpgrp(util::get_terminal(), pgid);
            }
        }

        let _ = job_control::reset_signals();
    }
}

/// Forks. The child applies `setup`, runs `run` and exits with its
/// result; it never returns. The parent gets the child's pid.
pub(crate) fn spawn_child<F>(setup: ChildSetup, run: F) -> Result<Pid>
where
    F: FnOnce() -> i32,
{
    match unsafe { unistd::fork() }.context(ErrorKind::Fork)? {
        ForkResult::Parent { child } => {
            debug!("spawned process {}", child);
            if setup.job_control {
                let pgid = setup.process_group.unwrap_or(child);
                let temp_result = unistd::setpgid(child, pgid);
                log_if_err!(
                    temp_result,
                    "failed to set pgid ({}) for pid ({})",
                    pgid,
                    child
                );
            }
            Ok(child)
        }
        ForkResult::Child => {
            setup.apply();
            let code = run();
            util::exit_child(code)
        }
    }
}

/// Replaces the child's image with `command`. Only called in a child.
pub(crate) fn exec_command(command: &Command) -> ! {
    if let Err(e) = redirect::apply_redirections(command) {
        report_in_child(&e.to_string());
        util::exit_child(CHILD_FAILURE_EXIT_STATUS);
    }

    let argv: std::result::Result<Vec<CString>, _> = command
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect();
    let argv = match argv {
        Ok(argv) => argv,
        Err(_) => {
            report_in_child(&format!("{}: invalid argument", command.program()));
            util::exit_child(CHILD_FAILURE_EXIT_STATUS);
        }
    };

    let error = match unistd::execvp(&argv[0], &argv) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    let message = if error == Errno::ENOENT {
        ErrorKind::CommandNotFound(command.program().to_string()).to_string()
    } else {
        format!("{}: {}", command.program(), error.desc())
    };
    report_in_child(&message);
    util::exit_child(CHILD_FAILURE_EXIT_STATUS)
}

/// Children write straight to descriptor 2; they share no state with the
/// shell's buffered streams. A failed write has nowhere else to go.
pub(crate) fn report_in_child(message: &str) {
    let _ = writeln!(io::stderr(), "minibash: {}", message);
}

/// Runs one external command, waiting for it unless it is a background
/// command, in which case it is registered as a job.
pub fn run_external(shell: &mut Shell, command: &Command) -> Result<ExitStatus> {
    let (label, _) = parser::split_background(&command.input);
    if command.background && shell.jobs.is_full() {
        // Checked up front so no process ever runs untracked.
        return Err(Error::job_table_full(shell.jobs.capacity()));
    }

    let setup = ChildSetup {
        job_control: shell.job_control,
        process_group: None,
        foreground: !command.background,
    };
    let pid = spawn_child(setup, || exec_command(command))?;
    let process_group = if shell.job_control { Some(pid) } else { None };

    if command.background {
        let job_id = shell
            .jobs
            .register_group(pid, Vec::new(), process_group, label)?;
        println!("[{}] {}", job_id, pid);
        return Ok(ExitStatus::from_success());
    }

    let terminal_state = job_control::TerminalState::new(&*shell.terminal);
    if let Some(pgid) = process_group {
        let temp_result = terminal_state.give_to(pgid);
        log_if_err!(temp_result, "failed to give terminal to {}", pgid);
    }
    wait_in_foreground(&mut shell.jobs, pid, &[], process_group, label)
}

/// Waits for a foreground job made of `process_id` (whose status is
/// reported) and `companions`. If any of them stops, whatever has not
/// finished is registered as a stopped job.
pub(crate) fn wait_in_foreground(
    jobs: &mut JobTable,
    process_id: Pid,
    companions: &[Pid],
    process_group: Option<Pid>,
    label: &str,
) -> Result<ExitStatus> {
    let mut stopped = Vec::new();
    let mut stop_signal = None;
    for &pid in companions {
        match wait_for_process(pid) {
            Ok(WaitOutcome::Exited(status)) => debug!("process {} exited with {}", pid, status),
            Ok(WaitOutcome::Stopped(signal)) => {
                stopped.push(pid);
                stop_signal = Some(signal);
            }
            Err(e) => warn!("failed to wait for process {}: {}", pid, e),
        }
    }

    let (status, last_stopped) = match wait_for_process(process_id)? {
        WaitOutcome::Exited(status) => (status, false),
        WaitOutcome::Stopped(signal) => {
            stop_signal = Some(signal);
            (ExitStatus::from_signal(signal), true)
        }
    };
    let stop_signal = match stop_signal {
        Some(signal) => signal,
        None => return Ok(status),
    };

    match jobs.register_group(process_id, stopped.clone(), process_group, label) {
        Ok(job_id) => {
            if !last_stopped {
                jobs.mark_exited(process_id, status);
            }
            jobs.set_status(process_id, JobStatus::Stopped);
            jobs.mark_stop_notified(process_id);
            println!("\n[{}] Stopped\t{}", job_id, label);
            Ok(ExitStatus::from_signal(stop_signal))
        }
        Err(e) => {
            // Nowhere to park it, so let it finish in the foreground.
            eprintln!("minibash: {}", e);
            let mut status = status;
            if last_stopped {
                stopped.push(process_id);
            }
            for &pid in &stopped {
                let temp_result = signal::kill(pid, Signal::SIGCONT);
                log_if_err!(temp_result, "failed to continue process {}", pid);
            }
            for &pid in &stopped {
                let reaped = reap_process(pid);
                if pid == process_id {
                    status = reaped?;
                } else {
                    log_if_err!(reaped, "failed to reap process {}", pid);
                }
            }
            Ok(status)
        }
    }
}

/// Blocks until `pid` exits, is killed, or stops.
pub fn wait_for_process(pid: Pid) -> Result<WaitOutcome> {
    loop {
        match wait::waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(_, code)) => {
                debug!("{} exited with {}.", pid, code);
                return Ok(WaitOutcome::Exited(ExitStatus::from_status(code)));
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                debug!("{} terminated by signal {:?}.", pid, signal);
                return Ok(WaitOutcome::Exited(ExitStatus::from_signal(signal)));
            }
            Ok(WaitStatus::Stopped(_, signal)) => {
                debug!("{} was signaled to stop {:?}.", pid, signal);
                return Ok(WaitOutcome::Stopped(signal));
            }
            Ok(status) => debug!("ignoring {:?} while waiting for {}", status, pid),
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e.context(ErrorKind::Wait).into()),
        }
    }
}

/// Blocks until `pid` is gone; stops are not reported.
pub fn reap_process(pid: Pid) -> Result<ExitStatus> {
    loop {
        match wait::waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::from_status(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(ExitStatus::from_signal(signal)),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(e.context(ErrorKind::Wait).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellConfig;
    use std::fs;
    use tempdir::TempDir;

    fn run(shell: &mut Shell, line: &str) -> ExitStatus {
        let command = Command::parse(line).unwrap().unwrap();
        run_external(shell, &command).unwrap()
    }

    #[test]
    fn test_foreground_status_is_returned() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        assert!(run(&mut shell, "true").success());
        assert_eq!(run(&mut shell, "sh -c 'exit 42'").code(), Some(42));
        assert!(shell.jobs.is_empty());
    }

    #[test]
    fn test_killed_child_reports_128_plus_signal() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        assert_eq!(run(&mut shell, "sh -c 'kill -TERM $$'").code(), Some(143));
    }

    #[test]
    fn test_missing_program_fails_only_the_child() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        let status = run(&mut shell, "no-such-program-minibash-test 2> /dev/null");
        assert_eq!(status.code(), Some(CHILD_FAILURE_EXIT_STATUS));
    }

    #[test]
    fn test_redirections_round_trip() {
        let dir = TempDir::new("launcher").unwrap();
        let file = dir.path().join("f");
        let copy = dir.path().join("copy");
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();

        assert!(run(&mut shell, &format!("printf 'hi\\n' > {}", file.display())).success());
        assert!(run(&mut shell, &format!("printf 'again\\n' >> {}", file.display())).success());
        assert!(run(
            &mut shell,
            &format!("cat < {} > {}", file.display(), copy.display())
        )
        .success());
        assert_eq!(fs::read_to_string(&copy).unwrap(), "hi\nagain\n");
    }

    #[test]
    fn test_missing_input_file_fails_child() {
        let dir = TempDir::new("launcher").unwrap();
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        let status = run(
            &mut shell,
            &format!(
                "cat < {} 2> {}",
                dir.path().join("missing").display(),
                dir.path().join("err").display()
            ),
        );
        assert_eq!(status.code(), Some(1));
        // The error redirect is never reached: the input failed first.
        assert!(!dir.path().join("err").exists());
    }

    #[test]
    fn test_background_command_is_registered() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        let status = run(&mut shell, "sleep 0 &");
        assert!(status.success());

        let job = shell.jobs.list_all()[0].clone();
        assert_eq!(job.label(), "sleep 0");
        assert_eq!(job.status(), JobStatus::Running);
        let status = job_control::wait_for_job(&mut shell.jobs, job.process_id()).unwrap();
        assert!(status.success());
        assert!(shell.jobs.is_empty());
    }

    #[test]
    fn test_stopped_foreground_command_becomes_job() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        let status = run(&mut shell, "sh -c 'kill -STOP $$; exit 5'");
        assert_eq!(status, ExitStatus::from_signal(Signal::SIGSTOP));

        let job = shell.jobs.list_all()[0].clone();
        assert_eq!(job.status(), JobStatus::Stopped);
        let status =
            job_control::resume(&mut shell.jobs, &*shell.terminal, job.id(), true).unwrap();
        assert_eq!(status.code(), Some(5));
        assert!(shell.jobs.is_empty());
    }
}
