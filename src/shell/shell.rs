//! Minibash - Shell Module
//!
//! The Shell routes every line to a builtin, the process launcher or the
//! pipeline orchestrator, owns the job table, and keeps the command
//! history.

use std::env;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::process::{self, ExitStatus};

use failure::ResultExt;
use log::{debug, error, info, warn};

use crate::core::job::{Job, JobId, JobTable};
use crate::core::parser::{self, Command};
use crate::errors::{Error, ErrorKind, Result};
use crate::history::{History, HISTORY_FILE_NAME};
use crate::shell::{
    builtins, execute_command,
    job_control::{self, Detached, Terminal, Tty},
    pipeline, redirect, ShellConfig,
};
use crate::util::{self, MinibashExitStatusExt};

pub(crate) const SYNTAX_ERROR_EXIT_STATUS: i32 = 2;
/// Used when builtin arguments do not match their usage.
const USAGE_ERROR_EXIT_STATUS: i32 = 2;

/// Minibash Shell
pub struct Shell {
    pub(crate) jobs: JobTable,
    /// Whose foreground process group the shell hands out.
    pub(crate) terminal: Box<dyn Terminal>,
    pub(crate) job_control: bool,
    pub(crate) history: History,
    history_file: Option<PathBuf>,
    /// Exit status of last command executed.
    last_exit_status: ExitStatus,
    config: ShellConfig,
    /// Prompt only when reading from a terminal.
    is_interactive: bool,
    /// Set in a pipeline child running a builtin; `exit` then ends only
    /// that child.
    is_pipeline_child: bool,
    /// `exit` was refused because of stopped jobs by the previous line.
    stopped_jobs_warned: bool,
    /// The current line may exit despite stopped jobs.
    exit_confirmed: bool,
}

impl Shell {
    /// Constructs a new Shell to manage running jobs and command history.
    pub fn new(config: ShellConfig) -> Result<Shell> {
        job_control::initialize_signals()?;

        let mut shell = Shell {
            jobs: JobTable::default(),
            terminal: Box::new(Detached),
            job_control: false,
            history: History::with_capacity(config.command_history_capacity),
            history_file: None,
            last_exit_status: ExitStatus::from_success(),
            config,
            is_interactive: util::isatty(),
            is_pipeline_child: false,
            stopped_jobs_warned: false,
            exit_confirmed: false,
        };

        if config.enable_job_control && shell.is_interactive {
            match job_control::initialize_job_control() {
                Ok(()) => {
                    shell.job_control = true;
                    shell.terminal = Box::new(Tty);
                }
                Err(e) => error!(
                    "failed to initialize shell for job control despite isatty: {}",
                    e
                ),
            }
        }

        if config.enable_command_history {
            shell.load_history()?;
        }

        let temp_result = shell.terminal.foreground_group();
        log_if_err!(temp_result, "failed to read the terminal's process group");
        if let Ok(pgid) = temp_result {
            debug!("terminal foreground process group is {}", pgid);
        }

        info!("minibash started up");
        Ok(shell)
    }

    fn load_history(&mut self) -> Result<()> {
        self.history_file = dirs::home_dir().map(|p| p.join(HISTORY_FILE_NAME));
        match self.history_file {
            Some(ref history_file) => self.history.load(history_file)?,
            None => warn!("unable to get home directory"),
        }
        Ok(())
    }

    pub fn is_interactive(&self) -> bool {
        self.is_interactive
    }

    pub fn last_exit_status(&self) -> ExitStatus {
        self.last_exit_status
    }

    /// Runs one line and returns its status, which also becomes the
    /// shell's last exit status. Errors are reported on stderr; none of
    /// them ends the shell.
    pub fn dispatch(&mut self, line: &str) -> ExitStatus {
        let line = line.trim();
        if line.is_empty() {
            return self.last_exit_status;
        }

        self.exit_confirmed = mem::replace(&mut self.stopped_jobs_warned, false);
        let status = match self.dispatch_line(line) {
            Ok(status) => status,
            Err(e) => {
                warn!("{}: {}", line, e);
                eprintln!("minibash: {}", e);
                Shell::status_for_error(&e)
            }
        };

        debug!("{} -> {}", line, status);
        self.last_exit_status = status;
        status
    }

    fn dispatch_line(&mut self, line: &str) -> Result<ExitStatus> {
        if parser::is_pipeline(line) {
            let (pipeline, background) = parser::split_background(line);
            let stages = parser::split_pipeline_stages(pipeline);
            return pipeline::run_pipeline(self, pipeline, &stages, background);
        }

        let command = match Command::parse(line)? {
            Some(command) => command,
            None => return Ok(self.last_exit_status),
        };

        if builtins::is_builtin(command.program()) {
            if command.background {
                debug!("{} runs in the foreground: builtins cannot be jobs", command.program());
            }
            let mut stdout = redirect::builtin_stdout(&command)?;
            let result = builtins::run(self, command.program(), command.args(), &mut *stdout);
            let temp_result = stdout.flush();
            log_if_err!(temp_result, "failed to flush builtin output");
            return result;
        }

        execute_command::run_external(self, &command)
    }

    /// The status a failed line reports.
    pub(crate) fn status_for_error(e: &Error) -> ExitStatus {
        let code = match *e.kind() {
            ErrorKind::Syntax(_) => SYNTAX_ERROR_EXIT_STATUS,
            ErrorKind::BuiltinCommand { code, .. } => code,
            ErrorKind::Docopt => USAGE_ERROR_EXIT_STATUS,
            _ => 1,
        };
        ExitStatus::from_status(code)
    }

    /// Removes finished jobs, announcing them when messages are enabled.
    /// Returns how many were removed.
    pub fn reap_completed(&mut self) -> usize {
        if self.config.display_messages {
            self.jobs.reap_completed(&mut io::stdout())
        } else {
            self.jobs.reap_completed(&mut io::sink())
        }
    }

    /// The shell's jobs (running and stopped), ordered by job id.
    pub fn list_jobs(&self) -> Vec<&Job> {
        self.jobs.list_all()
    }

    /// Continues a job (the most recent one by default) in the foreground
    /// or the background.
    pub fn resume(&mut self, job_id: Option<JobId>, foreground: bool) -> Result<ExitStatus> {
        let job_id = match job_id.or_else(|| self.jobs.latest().map(Job::id)) {
            Some(job_id) => job_id,
            None => return Err(Error::no_such_job("current")),
        };
        job_control::resume(&mut self.jobs, &*self.terminal, job_id, foreground)
    }

    /// Runs one line from the user, recording it in the history first.
    pub fn execute_command_string(&mut self, input: &str) -> ExitStatus {
        if self.config.enable_command_history {
            self.history.push(input);
        }
        self.dispatch(input)
    }

    /// Runs a minibash script, one command per line.
    pub fn execute_commands_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<ExitStatus> {
        let f = File::open(path).context(ErrorKind::Io)?;
        for line in BufReader::new(f).lines() {
            let line = line.context(ErrorKind::Io)?;
            self.reap_completed();
            self.execute_command_string(&line);
        }
        Ok(self.last_exit_status)
    }

    /// Runs jobs from stdin until EOF is received.
    pub fn execute_from_stdin(&mut self) {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            // Check the status of background jobs, removing exited ones.
            self.reap_completed();
            if job_control::take_interrupt() {
                println!();
            }

            if self.is_interactive {
                print!("{}", self.prompt());
                let temp_result = io::stdout().flush();
                log_if_err!(temp_result, "failed to flush prompt");
            }

            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    error!("failed to read from stdin: {}", e);
                    break;
                }
            }

            self.execute_command_string(&line);
        }
    }

    fn prompt(&self) -> String {
        let cwd = match env::current_dir() {
            Ok(cwd) => cwd,
            Err(_) => return "minibash$ ".to_string(),
        };
        let home = dirs::home_dir().unwrap_or_default();
        let rel = match cwd.strip_prefix(&home) {
            Ok(rel) if !home.as_os_str().is_empty() => Path::new("~").join(rel),
            _ => cwd.clone(),
        };
        format!("minibash:{}$ ", rel.display())
    }

    /// Marks this process as a pipeline child running a builtin.
    pub(crate) fn enter_pipeline_child(&mut self) {
        self.is_pipeline_child = true;
        self.job_control = false;
        self.config.enable_command_history = false;
    }

    /// Whether `exit` may go ahead now. With stopped jobs around, the first
    /// attempt is refused and a repeated one on the next line goes through.
    pub(crate) fn confirm_exit(&mut self) -> bool {
        if self.is_pipeline_child || self.exit_confirmed || !self.jobs.has_stopped_jobs() {
            return true;
        }
        self.stopped_jobs_warned = true;
        false
    }

    /// Exit the shell.
    ///
    /// Valid exit codes are between 0 and 255. Like bash and its descendents, it automatically
    /// converts exit codes to a u8 such that positive n becomes n % 256 and negative n becomes
    /// (256 + n) % 256.
    ///
    /// Exit the shell with a status of n. If n is None, then the exit status is that of the last
    /// command executed.
    pub fn exit(&mut self, n: Option<ExitStatus>) -> ! {
        let code = util::status_code(n.unwrap_or(self.last_exit_status)).rem_euclid(256);
        if self.is_pipeline_child {
            util::exit_child(code);
        }

        if self.config.display_messages {
            println!("exit");
        }

        if self.config.enable_command_history {
            if let Some(ref history_file) = self.history_file {
                if let Err(e) = self.history.save(history_file) {
                    error!(
                        "error: failed to save history to file during shutdown: {}",
                        e
                    );
                }
            }
        }

        info!("minibash has shut down");
        process::exit(code);
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} jobs\n{:?}", self.jobs, self.history)
    }
}
