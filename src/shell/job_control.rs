//! Job control: moving jobs between foreground and background, and the
//! signal and terminal setup an interactive shell needs for that.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};

use failure::ResultExt;
use log::{debug, info, warn};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{self, Pid};

use crate::core::job::{Job, JobId, JobStatus, JobTable};
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::execute_command::{wait_for_process, WaitOutcome};
use crate::util::{self, MinibashExitStatusExt};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Returns whether SIGINT arrived since the last call, clearing the flag.
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// Signals a job-control shell ignores while children get the defaults back.
const JOB_CONTROL_SIGNALS: [Signal; 4] = [
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

/// Child terminations are only ever discovered by explicit `waitpid`
/// calls. SIGCHLD keeps its default disposition: ignoring it outright
/// would make the kernel auto-reap children and break every wait.
pub fn initialize_signals() -> Result<()> {
    unsafe {
        signal::signal(Signal::SIGCHLD, SigHandler::SigDfl).context(ErrorKind::Nix)?;
    }
    Ok(())
}

pub fn initialize_job_control() -> Result<()> {
    let shell_terminal = util::get_terminal();

    // Loop until the shell is in the foreground
    loop {
        let shell_pgid = unistd::getpgrp();
        if unistd::tcgetpgrp(&shell_terminal).context(ErrorKind::Nix)? == shell_pgid {
            break;
        }
        signal::killpg(shell_pgid, Signal::SIGTTIN).context(ErrorKind::Nix)?;
    }

    // Ignore interactive and job-control signals; SIGINT only raises a flag
    // that the main loop polls.
    let interrupt = SigAction::new(
        SigHandler::Handler(handle_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &interrupt).context(ErrorKind::Nix)?;
        for &sig in &JOB_CONTROL_SIGNALS {
            signal::signal(sig, SigHandler::SigIgn).context(ErrorKind::Nix)?;
        }
    }

    // Put ourselves in our own process group
    let shell_pgid = Pid::this();
    if unistd::getpgrp() != shell_pgid {
        unistd::setpgid(shell_pgid, shell_pgid).context(ErrorKind::Nix)?;
    }

    // Grab control of the terminal
    let temp_result = unistd::tcsetpgrp(&shell_terminal, shell_pgid);
    log_if_err!(temp_result, "failed to grab control of terminal");

    info!("job control initialized for process group {}", shell_pgid);
    Ok(())
}

/// Restores default signal dispositions in a freshly forked child.
///
/// Runs between fork and exec, so it only reports through its return
/// value.
pub fn reset_signals() -> nix::Result<()> {
    unsafe {
        signal::signal(Signal::SIGINT, SigHandler::SigDfl)?;
        signal::signal(Signal::SIGCHLD, SigHandler::SigDfl)?;
        for &sig in &JOB_CONTROL_SIGNALS {
            signal::signal(sig, SigHandler::SigDfl)?;
        }
    }
    Ok(())
}

/// The terminal whose foreground process group the shell hands around.
pub trait Terminal {
    /// Process group currently owning the terminal.
    fn foreground_group(&self) -> Result<Pid>;
    fn set_foreground_group(&self, pgid: Pid) -> Result<()>;
    /// The shell's own process group; the terminal always comes back to it.
    fn shell_group(&self) -> Pid;
}

/// The terminal on standard input.
#[derive(Debug, Default)]
pub struct Tty;

impl Terminal for Tty {
    fn foreground_group(&self) -> Result<Pid> {
        Ok(unistd::tcgetpgrp(util::get_terminal()).context(ErrorKind::Terminal)?)
    }

    fn set_foreground_group(&self, pgid: Pid) -> Result<()> {
        unistd::tcsetpgrp(util::get_terminal(), pgid).context(ErrorKind::Terminal)?;
        Ok(())
    }

    fn shell_group(&self) -> Pid {
        unistd::getpgrp()
    }
}

/// Used when job control is off: nobody owns the terminal.
#[derive(Debug, Default)]
pub struct Detached;

impl Terminal for Detached {
    fn foreground_group(&self) -> Result<Pid> {
        Ok(unistd::getpgrp())
    }

    fn set_foreground_group(&self, _pgid: Pid) -> Result<()> {
        Ok(())
    }

    fn shell_group(&self) -> Pid {
        unistd::getpgrp()
    }
}

/// RAII struct to encapsulate manipulating terminal state. Dropping it
/// gives the terminal back to the shell, whatever happened in between.
pub struct TerminalState<'a> {
    terminal: &'a dyn Terminal,
    shell_pgid: Pid,
}

impl<'a> TerminalState<'a> {
    pub fn new(terminal: &'a dyn Terminal) -> TerminalState<'a> {
        TerminalState {
            terminal,
            shell_pgid: terminal.shell_group(),
        }
    }

    pub fn give_to(&self, pgid: Pid) -> Result<()> {
        debug!("setting terminal process group to {}", pgid);
        self.terminal.set_foreground_group(pgid)
    }
}

impl<'a> Drop for TerminalState<'a> {
    fn drop(&mut self) {
        debug!("putting shell back into foreground");
        let temp_result = self.terminal.set_foreground_group(self.shell_pgid);
        log_if_err!(temp_result, "failed to restore terminal to the shell");
    }
}

/// Sends `signal` to every process of `job`, through its process group
/// when it has one.
pub fn signal_job(job: &Job, signal: Signal) -> Result<()> {
    debug!("sending {:?} to job [{}]", signal, job.id());
    match job.process_group() {
        Some(pgid) => signal::killpg(pgid, signal).context(ErrorKind::Signal)?,
        None => {
            for pid in job.unreaped_processes() {
                signal::kill(pid, signal).context(ErrorKind::Signal)?;
            }
        }
    }
    Ok(())
}

/// Continues job `job_id`, in the foreground (waiting for it to stop or
/// finish) or in the background (returning right away).
pub fn resume(
    jobs: &mut JobTable,
    terminal: &dyn Terminal,
    job_id: JobId,
    foreground: bool,
) -> Result<ExitStatus> {
    let job = jobs
        .find_by_id(job_id)
        .cloned()
        .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;

    if !foreground {
        debug!("putting job [{}] in background", job_id);
        if job.status() == JobStatus::Stopped {
            signal_job(&job, Signal::SIGCONT)?;
            jobs.set_status(job.process_id(), JobStatus::Running);
        }
        println!("[{}] {} &", job.id(), job.label());
        return Ok(ExitStatus::from_success());
    }

    debug!("putting job [{}] in foreground", job_id);
    let _terminal_state = {
        let terminal_state = TerminalState::new(terminal);
        if let Some(pgid) = foreground_group_of(&job)? {
            terminal_state.give_to(pgid)?;
        }
        terminal_state
    };

    if job.status() == JobStatus::Stopped {
        signal_job(&job, Signal::SIGCONT)?;
        jobs.set_status(job.process_id(), JobStatus::Running);
    }
    println!("{}", job.label());

    wait_for_job(jobs, job.process_id())
}

/// The group to hand the terminal to while `job` runs in the foreground.
/// Without a recorded group it is looked up on a process not yet reaped,
/// since the tracked one may already be gone.
fn foreground_group_of(job: &Job) -> Result<Option<Pid>> {
    if let Some(pgid) = job.process_group() {
        return Ok(Some(pgid));
    }
    match job.unreaped_processes().first() {
        Some(&pid) => Ok(Some(
            unistd::getpgid(Some(pid)).context(ErrorKind::Terminal)?,
        )),
        None => Ok(None),
    }
}

/// Waits for the job tracking `process_id` to stop or complete. A stopped
/// job stays in the table; a completed one is removed.
pub fn wait_for_job(jobs: &mut JobTable, process_id: Pid) -> Result<ExitStatus> {
    let job = jobs
        .find_by_process_id(process_id)
        .cloned()
        .ok_or_else(|| Error::no_such_job(format!("pid {}", process_id)))?;

    for &companion in job.companions() {
        match wait_for_process(companion) {
            Ok(WaitOutcome::Stopped(signal)) => return Ok(job_stopped(jobs, &job, signal)),
            Ok(WaitOutcome::Exited(status)) => {
                debug!("process {} of job [{}] exited with {}", companion, job.id(), status)
            }
            Err(e) => warn!(
                "failed to wait for process {} of job [{}]: {}",
                companion,
                job.id(),
                e
            ),
        }
        jobs.forget_companion(process_id, companion);
    }

    let status = match job.exit_status() {
        Some(status) => status,
        None => match wait_for_process(process_id)? {
            WaitOutcome::Stopped(signal) => return Ok(job_stopped(jobs, &job, signal)),
            WaitOutcome::Exited(status) => {
                jobs.mark_exited(process_id, status);
                status
            }
        },
    };

    jobs.remove(process_id)?;
    debug!("job [{}] completed with {}", job.id(), status);
    Ok(status)
}

/// Parks `job` as stopped after one of its processes stopped on `signal`.
fn job_stopped(jobs: &mut JobTable, job: &Job, signal: Signal) -> ExitStatus {
    jobs.set_status(job.process_id(), JobStatus::Stopped);
    jobs.mark_stop_notified(job.process_id());
    println!("\n[{}] Stopped\t{}", job.id(), job.label());
    ExitStatus::from_signal(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::process::Command;

    /// Records every hand-over instead of touching a real terminal.
    #[derive(Debug)]
    struct RecordingTerminal {
        shell: Pid,
        handovers: RefCell<Vec<Pid>>,
    }

    impl RecordingTerminal {
        fn new(shell: Pid) -> Self {
            Self {
                shell,
                handovers: RefCell::new(Vec::new()),
            }
        }

        fn handovers(&self) -> Vec<Pid> {
            self.handovers.borrow().clone()
        }
    }

    impl Terminal for RecordingTerminal {
        fn foreground_group(&self) -> Result<Pid> {
            Ok(self.handovers.borrow().last().cloned().unwrap_or(self.shell))
        }

        fn set_foreground_group(&self, pgid: Pid) -> Result<()> {
            self.handovers.borrow_mut().push(pgid);
            Ok(())
        }

        fn shell_group(&self) -> Pid {
            self.shell
        }
    }

    fn fake_shell_group() -> Pid {
        Pid::from_raw(4_100_000)
    }

    fn spawn(script: &str) -> Pid {
        let child = Command::new("sh").arg("-c").arg(script).spawn().unwrap();
        Pid::from_raw(child.id() as i32)
    }

    #[test]
    fn test_resume_unknown_job_fails() {
        let mut jobs = JobTable::default();
        let terminal = RecordingTerminal::new(fake_shell_group());
        let error = resume(&mut jobs, &terminal, JobId(9), true).unwrap_err();
        assert_eq!(*error.kind(), ErrorKind::NoSuchJob("%9".to_string()));
        assert!(terminal.handovers().is_empty());
    }

    #[test]
    fn test_foreground_resume_restores_terminal_on_exit() {
        let pid = spawn("exit 3");
        let mut jobs = JobTable::default();
        let job_id = jobs.register(pid, "exit 3").unwrap();
        let terminal = RecordingTerminal::new(fake_shell_group());

        let status = resume(&mut jobs, &terminal, job_id, true).unwrap();

        assert_eq!(status.code(), Some(3));
        assert!(jobs.is_empty());
        let handovers = terminal.handovers();
        assert_eq!(handovers.len(), 2);
        assert_eq!(handovers.last(), Some(&fake_shell_group()));
    }

    #[test]
    fn test_foreground_resume_restores_terminal_on_stop() {
        let pid = spawn("kill -STOP $$; exit 4");
        let mut jobs = JobTable::default();
        let job_id = jobs.register(pid, "stopper").unwrap();
        let terminal = RecordingTerminal::new(fake_shell_group());

        let status = resume(&mut jobs, &terminal, job_id, true).unwrap();
        assert_eq!(status, ExitStatus::from_signal(Signal::SIGSTOP));
        assert_eq!(terminal.handovers().last(), Some(&fake_shell_group()));
        assert_eq!(
            jobs.find_by_id(job_id).unwrap().status(),
            JobStatus::Stopped
        );

        // bg continues it without waiting; the job then runs to completion.
        let status = resume(&mut jobs, &terminal, job_id, false).unwrap();
        assert!(status.success());
        assert_eq!(
            jobs.find_by_id(job_id).unwrap().status(),
            JobStatus::Running
        );
        let status = wait_for_job(&mut jobs, pid).unwrap();
        assert_eq!(status.code(), Some(4));
        assert!(jobs.find_by_id(job_id).is_none());
    }

    #[test]
    fn test_foreground_resume_returns_when_earlier_stage_stops_again() {
        let first = spawn("sleep 0.2; kill -STOP $$; exit 5");
        let last = spawn("exit 0");
        let mut jobs = JobTable::default();
        let job_id = jobs
            .register_group(last, vec![first], None, "stopper | true")
            .unwrap();
        let terminal = RecordingTerminal::new(fake_shell_group());

        let status = resume(&mut jobs, &terminal, job_id, true).unwrap();
        assert_eq!(status, ExitStatus::from_signal(Signal::SIGSTOP));
        assert_eq!(terminal.handovers().last(), Some(&fake_shell_group()));
        let job = jobs.find_by_id(job_id).unwrap();
        assert_eq!(job.status(), JobStatus::Stopped);
        assert_eq!(job.companions(), &[first][..]);

        let status = resume(&mut jobs, &terminal, job_id, true).unwrap();
        assert!(status.success());
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_foreground_resume_after_last_stage_was_reaped() {
        use crate::shell::execute_command::wait_in_foreground;

        let first = spawn("kill -STOP $$; exit 5");
        let last = spawn("exit 0");
        let mut jobs = JobTable::default();
        let status = wait_in_foreground(&mut jobs, last, &[first], None, "stopper | true").unwrap();
        assert_eq!(status, ExitStatus::from_signal(Signal::SIGSTOP));

        let job = jobs.latest().unwrap().clone();
        assert_eq!(job.exit_status().map(|status| status.success()), Some(true));
        assert_eq!(job.unreaped_processes(), vec![first]);

        let terminal = RecordingTerminal::new(fake_shell_group());
        let status = resume(&mut jobs, &terminal, job.id(), true).unwrap();
        assert!(status.success());
        assert_eq!(terminal.handovers().len(), 2);
        assert_eq!(terminal.handovers().last(), Some(&fake_shell_group()));
        assert!(jobs.is_empty());
    }

    struct RefusingTerminal(RecordingTerminal);

    impl Terminal for RefusingTerminal {
        fn foreground_group(&self) -> Result<Pid> {
            self.0.foreground_group()
        }

        fn set_foreground_group(&self, pgid: Pid) -> Result<()> {
            self.0.set_foreground_group(pgid)?;
            if pgid == self.0.shell_group() {
                Ok(())
            } else {
                Err(Error::from(ErrorKind::Terminal))
            }
        }

        fn shell_group(&self) -> Pid {
            self.0.shell_group()
        }
    }

    #[test]
    fn test_failed_handover_still_restores_terminal() {
        let pid = spawn("exit 0");
        let mut jobs = JobTable::default();
        let job_id = jobs.register(pid, "exit 0").unwrap();
        let terminal = RefusingTerminal(RecordingTerminal::new(fake_shell_group()));

        let error = resume(&mut jobs, &terminal, job_id, true).unwrap_err();
        assert_eq!(*error.kind(), ErrorKind::Terminal);
        assert_eq!(terminal.0.handovers().last(), Some(&fake_shell_group()));

        // Still tracked, so the reaper collects it later.
        assert!(jobs.find_by_id(job_id).is_some());
        assert!(wait_for_job(&mut jobs, pid).unwrap().success());
    }
}
