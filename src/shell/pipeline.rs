//! Running `a | b | c`: one child per stage, wired through pipes.

use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::process::ExitStatus;

use failure::ResultExt;
use log::debug;
use nix::unistd::{self, Pid};

use crate::core::parser::Command;
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::builtins;
use crate::shell::execute_command::{
    exec_command, reap_process, report_in_child, spawn_child, wait_in_foreground, ChildSetup,
    CHILD_FAILURE_EXIT_STATUS,
};
use crate::shell::job_control::TerminalState;
use crate::shell::shell::Shell;
use crate::shell::redirect;
use crate::util::{self, MinibashExitStatusExt};

type Pipe = (OwnedFd, OwnedFd);

/// Runs `stages` (at least two) connected by pipes. In the foreground the
/// last stage's status is returned once every stage has finished; in the
/// background the whole pipeline becomes a single job.
pub fn run_pipeline(
    shell: &mut Shell,
    input: &str,
    stages: &[String],
    background: bool,
) -> Result<ExitStatus> {
    if stages.len() < 2 {
        return Err(Error::syntax(input));
    }
    if background && shell.jobs.is_full() {
        return Err(Error::job_table_full(shell.jobs.capacity()));
    }

    let pipes = create_pipes(stages.len() - 1)?;
    let (pids, process_group) = spawn_stages(
        pipes,
        stages.len(),
        shell.job_control,
        !background,
        |index, setup, pipes| {
            let stage = &stages[index];
            let pid = spawn_child(setup, || run_stage(shell, stage, index, pipes))?;
            debug!("pipeline stage {} ({}) is process {}", index, stage, pid);
            Ok(pid)
        },
    )?;

    let (&last, companions) = match pids.split_last() {
        Some(split) => split,
        None => return Err(Error::syntax(input)),
    };

    if background {
        let job_id =
            shell
                .jobs
                .register_group(last, companions.to_vec(), process_group, input)?;
        println!("[{}] {}", job_id, last);
        return Ok(ExitStatus::from_success());
    }

    let terminal_state = TerminalState::new(&*shell.terminal);
    if let Some(pgid) = process_group {
        let temp_result = terminal_state.give_to(pgid);
        log_if_err!(temp_result, "failed to give terminal to {}", pgid);
    }
    wait_in_foreground(&mut shell.jobs, last, companions, process_group, input)
}

/// Every pipe exists before the first fork; read end first. On failure
/// the pipes created so far are closed as they drop.
fn create_pipes(count: usize) -> Result<Vec<Pipe>> {
    let mut pipes = Vec::with_capacity(count);
    for _ in 0..count {
        pipes.push(unistd::pipe().context(ErrorKind::Pipe)?);
    }
    Ok(pipes)
}

/// Spawns `count` stages through `spawn`, all in the first stage's group
/// under job control. The parent's pipe ends are closed before this
/// returns. If a spawn fails, the stages already running are reaped.
fn spawn_stages<F>(
    mut pipes: Vec<Pipe>,
    count: usize,
    job_control: bool,
    foreground: bool,
    mut spawn: F,
) -> Result<(Vec<Pid>, Option<Pid>)>
where
    F: FnMut(usize, ChildSetup, &mut Vec<Pipe>) -> Result<Pid>,
{
    let mut pids: Vec<Pid> = Vec::with_capacity(count);
    let mut process_group = None;
    for index in 0..count {
        let setup = ChildSetup {
            job_control,
            process_group,
            foreground,
        };
        match spawn(index, setup, &mut pipes) {
            Ok(pid) => {
                if job_control && process_group.is_none() {
                    process_group = Some(pid);
                }
                pids.push(pid);
            }
            Err(e) => {
                // Closing the pipes lets the stages already running see EOF.
                drop(pipes);
                for pid in pids {
                    let temp_result = reap_process(pid);
                    log_if_err!(temp_result, "failed to reap pipeline stage {}", pid);
                }
                return Err(e);
            }
        }
    }
    Ok((pids, process_group))
}

/// Body of the child running stage `index`. Returns its exit status
/// unless it execs.
fn run_stage(shell: &mut Shell, stage: &str, index: usize, pipes: &mut Vec<Pipe>) -> i32 {
    let wired = connect_stage(index, pipes);
    // Only descriptors 0 and 1 stay; every inherited pipe end closes here.
    pipes.clear();
    if let Err(e) = wired {
        report_in_child(&format!("pipe: {}", e.desc()));
        return CHILD_FAILURE_EXIT_STATUS;
    }

    let command = match Command::parse(stage) {
        Ok(Some(ref command)) if command.background => {
            report_in_child(&Error::syntax("&").to_string());
            return CHILD_FAILURE_EXIT_STATUS;
        }
        Ok(Some(command)) => command,
        Ok(None) => return 0,
        Err(e) => {
            report_in_child(&e.to_string());
            return CHILD_FAILURE_EXIT_STATUS;
        }
    };

    if !builtins::is_builtin(command.program()) {
        exec_command(&command);
    }

    if let Err(e) = redirect::apply_redirections(&command) {
        report_in_child(&e.to_string());
        return CHILD_FAILURE_EXIT_STATUS;
    }
    shell.enter_pipeline_child();
    let status = match builtins::run(shell, command.program(), command.args(), &mut io::stdout())
    {
        Ok(status) => status,
        Err(e) => {
            report_in_child(&e.to_string());
            Shell::status_for_error(&e)
        }
    };
    util::status_code(status)
}

fn connect_stage(index: usize, pipes: &[Pipe]) -> nix::Result<()> {
    if index > 0 {
        unistd::dup2(pipes[index - 1].0.as_raw_fd(), libc::STDIN_FILENO)?;
    }
    if index < pipes.len() {
        unistd::dup2(pipes[index].1.as_raw_fd(), libc::STDOUT_FILENO)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::JobStatus;
    use crate::shell::job_control;
    use crate::shell::ShellConfig;
    use nix::errno::Errno;
    use nix::sys::resource::{self, Resource};
    use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
    use nix::unistd::ForkResult;
    use std::fs;
    use tempdir::TempDir;

    fn stages(line: &str) -> Vec<String> {
        crate::core::parser::split_pipeline_stages(line)
    }

    fn run(shell: &mut Shell, line: &str) -> ExitStatus {
        run_pipeline(shell, line, &stages(line), false).unwrap()
    }

    #[test]
    fn test_three_stages_pass_data_through() {
        let dir = TempDir::new("pipeline").unwrap();
        let out = dir.path().join("out");
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();

        let status = run(&mut shell, &format!("echo A | cat | cat > {}", out.display()));
        assert!(status.success());
        assert_eq!(fs::read_to_string(&out).unwrap(), "A\n");
    }

    #[test]
    fn test_status_is_last_stage() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        assert!(run(&mut shell, "false | true").success());
        assert_eq!(run(&mut shell, "true | false").code(), Some(1));
        assert!(shell.jobs.is_empty());
    }

    #[test]
    fn test_builtin_stage_writes_into_pipe() {
        let dir = TempDir::new("pipeline").unwrap();
        let out = dir.path().join("out");
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();

        let line = format!("echo one two | tr a-z A-Z > {}", out.display());
        assert!(run(&mut shell, &line).success());
        assert_eq!(fs::read_to_string(&out).unwrap(), "ONE TWO\n");
    }

    #[test]
    fn test_bad_stage_fails_only_its_child() {
        let dir = TempDir::new("pipeline").unwrap();
        let out = dir.path().join("out");
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();

        let line = format!(
            "no-such-program-minibash-test 2> /dev/null | echo still > {}",
            out.display()
        );
        assert!(run(&mut shell, &line).success());
        assert_eq!(fs::read_to_string(&out).unwrap(), "still\n");
    }

    #[test]
    fn test_unparsable_stage_exits_with_failure() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        assert_eq!(run(&mut shell, "true | echo 'x").code(), Some(1));
        assert_eq!(run(&mut shell, "true | sleep 0 &").code(), Some(1));
    }

    #[test]
    fn test_failed_spawn_reaps_earlier_stages() {
        let pipes = create_pipes(2).unwrap();
        let mut spawned = Vec::new();
        let result = spawn_stages(pipes, 3, false, true, |index, setup, _| {
            if index == 2 {
                return Err(Error::from(ErrorKind::Fork));
            }
            let pid = spawn_child(setup, || 0)?;
            spawned.push(pid);
            Ok(pid)
        });

        assert_eq!(*result.unwrap_err().kind(), ErrorKind::Fork);
        assert_eq!(spawned.len(), 2);
        for pid in spawned {
            assert_eq!(
                wait::waitpid(pid, Some(WaitPidFlag::WNOHANG)),
                Err(Errno::ECHILD)
            );
        }
    }

    fn open_descriptors() -> Vec<u64> {
        fs::read_dir("/proc/self/fd")
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Runs in its own process since the descriptor limit is process wide.
    fn pipe_failure_leaves_nothing_behind() -> bool {
        let mut shell = match Shell::new(ShellConfig::noninteractive()) {
            Ok(shell) => shell,
            Err(_) => return false,
        };
        let highest = match open_descriptors().into_iter().max() {
            Some(highest) => highest,
            None => return false,
        };
        // Room for a couple of pipes, far fewer than forty stages need.
        let limit = highest + 5;
        if resource::setrlimit(Resource::RLIMIT_NOFILE, limit, limit).is_err() {
            return false;
        }

        let before = open_descriptors().len();
        let stages = vec!["true".to_string(); 40];
        let failed_on_pipe = match run_pipeline(&mut shell, "true | ...", &stages, false) {
            Err(e) => *e.kind() == ErrorKind::Pipe,
            Ok(_) => false,
        };
        let nothing_spawned = wait::waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG))
            == Err(Errno::ECHILD);
        failed_on_pipe && nothing_spawned && open_descriptors().len() == before
    }

    #[test]
    fn test_pipe_failure_closes_created_pipes() {
        match unsafe { unistd::fork() }.unwrap() {
            ForkResult::Child => {
                let code = if pipe_failure_leaves_nothing_behind() { 0 } else { 1 };
                util::exit_child(code)
            }
            ForkResult::Parent { child } => {
                assert_eq!(wait::waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
            }
        }
    }

    #[test]
    fn test_single_stage_is_rejected() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        let error = run_pipeline(&mut shell, "true", &stages("true"), false).unwrap_err();
        assert_eq!(*error.kind(), ErrorKind::Syntax("true".to_string()));
    }

    #[test]
    fn test_background_pipeline_is_one_job() {
        let mut shell = Shell::new(ShellConfig::noninteractive()).unwrap();
        let line = "sleep 0 | true";
        assert!(run_pipeline(&mut shell, line, &stages(line), true)
            .unwrap()
            .success());

        let job = shell.jobs.list_all()[0].clone();
        assert_eq!(job.label(), line);
        assert_eq!(job.companions().len(), 1);
        assert_eq!(job.status(), JobStatus::Running);

        let status = job_control::wait_for_job(&mut shell.jobs, job.process_id()).unwrap();
        assert!(status.success());
        assert!(shell.jobs.is_empty());
    }
}
