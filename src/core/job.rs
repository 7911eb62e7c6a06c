//! Job table
//!
//! Background and stopped jobs are tracked here by the process id the
//! shell waits on. For a pipeline that is the last stage; the earlier
//! stages ride along as companions until they are reaped as well.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::process::ExitStatus;
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::errors::{Error, Result};
use crate::util::{self, MinibashExitStatusExt};

pub const JOB_TABLE_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Completed,
}

#[derive(Clone, Debug)]
pub struct Job {
    process_id: Pid,
    id: JobId,
    label: String,
    status: JobStatus,
    started_at: SystemTime,
    process_group: Option<Pid>,
    companions: Vec<Pid>,
    /// Set once `process_id` has been reaped while companions still run.
    exit_status: Option<ExitStatus>,
    notified_stopped: bool,
}

impl Job {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn process_id(&self) -> Pid {
        self.process_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed().unwrap_or_default()
    }

    pub fn process_group(&self) -> Option<Pid> {
        self.process_group
    }

    pub fn companions(&self) -> &[Pid] {
        &self.companions
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Every process still owed a `waitpid`, tracked process first.
    pub fn unreaped_processes(&self) -> Vec<Pid> {
        let mut processes = Vec::with_capacity(self.companions.len() + 1);
        if self.exit_status.is_none() {
            processes.push(self.process_id);
        }
        processes.extend_from_slice(&self.companions);
        processes
    }

    fn is_finished(&self) -> bool {
        self.exit_status.is_some() && self.companions.is_empty()
    }

    fn completion_message(&self) -> String {
        let status = self.exit_status.map(util::status_code).unwrap_or(0);
        match status {
            0 => format!("[{}] Done\t{}", self.id, self.label),
            code if code > 128 => format!("[{}] Terminated ({})\t{}", self.id, code, self.label),
            code => format!("[{}] Exit {}\t{}", self.id, code, self.label),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}\t{}", self.id, self.status, self.label)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Completed => write!(f, "Completed"),
        }
    }
}

pub struct JobTable {
    jobs: HashMap<Pid, Job>,
    capacity: usize,
    /// Highest job id ever handed out; ids are never reused.
    job_count: u32,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable::with_capacity(JOB_TABLE_CAPACITY)
    }
}

impl JobTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: HashMap::with_capacity(capacity),
            capacity,
            job_count: 0,
        }
    }

    pub fn register(&mut self, process_id: Pid, label: &str) -> Result<JobId> {
        self.register_group(process_id, Vec::new(), None, label)
    }

    /// Registers a job whose status is that of `process_id`, with
    /// `companions` still to be reaped alongside it.
    pub fn register_group(
        &mut self,
        process_id: Pid,
        companions: Vec<Pid>,
        process_group: Option<Pid>,
        label: &str,
    ) -> Result<JobId> {
        if self.is_full() {
            return Err(Error::job_table_full(self.capacity));
        }
        if self.jobs.contains_key(&process_id) {
            return Err(Error::builtin_command(
                format!("process {} already has a job", process_id),
                1,
            ));
        }

        self.job_count += 1;
        let id = JobId(self.job_count);
        debug!("registering job [{}] for process {}", id, process_id);
        self.jobs.insert(
            process_id,
            Job {
                process_id,
                id,
                label: label.trim().to_string(),
                status: JobStatus::Running,
                started_at: SystemTime::now(),
                process_group,
                companions,
                exit_status: None,
                notified_stopped: false,
            },
        );
        Ok(id)
    }

    pub fn remove(&mut self, process_id: Pid) -> Result<Job> {
        self.jobs
            .remove(&process_id)
            .ok_or_else(|| Error::no_such_job(format!("pid {}", process_id)))
    }

    pub fn find_by_id(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.values().find(|job| job.id == job_id)
    }

    pub fn find_by_process_id(&self, process_id: Pid) -> Option<&Job> {
        self.jobs.get(&process_id)
    }

    /// The most recently registered live job.
    pub fn latest(&self) -> Option<&Job> {
        self.jobs.values().max_by_key(|job| job.id)
    }

    pub fn set_status(&mut self, process_id: Pid, status: JobStatus) {
        if let Some(job) = self.jobs.get_mut(&process_id) {
            debug!("job [{}]: {} -> {}", job.id, job.status, status);
            if status != JobStatus::Stopped {
                job.notified_stopped = false;
            }
            job.status = status;
        }
    }

    /// Records that the tracked process has been reaped with `status`.
    pub fn mark_exited(&mut self, process_id: Pid, status: ExitStatus) {
        if let Some(job) = self.jobs.get_mut(&process_id) {
            job.exit_status = Some(status);
            job.status = JobStatus::Completed;
        }
    }

    /// Stops tracking a companion once something else has reaped it.
    pub fn forget_companion(&mut self, process_id: Pid, companion: Pid) {
        if let Some(job) = self.jobs.get_mut(&process_id) {
            job.companions.retain(|&pid| pid != companion);
        }
    }

    /// Marks a stop as already reported so the reaper stays quiet about it.
    pub fn mark_stop_notified(&mut self, process_id: Pid) {
        if let Some(job) = self.jobs.get_mut(&process_id) {
            job.notified_stopped = true;
        }
    }

    /// Live jobs in job id order.
    pub fn list_all(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_stopped_jobs(&self) -> bool {
        self.jobs.values().any(|job| job.status == JobStatus::Stopped)
    }

    /// Polls every live job without blocking. Finished jobs are announced
    /// on `out` and removed; newly stopped ones are announced once.
    ///
    /// Returns the number of jobs removed.
    pub fn reap_completed(&mut self, out: &mut dyn Write) -> usize {
        let mut finished = Vec::new();

        for job in self.list_all_mut() {
            poll_job(job);

            if job.is_finished() {
                finished.push(job.process_id);
            } else if job.status == JobStatus::Stopped && !job.notified_stopped {
                let temp_result = writeln!(out, "{}", job);
                log_if_err!(temp_result, "failed to announce stopped job [{}]", job.id);
                job.notified_stopped = true;
            }
        }

        for process_id in &finished {
            if let Some(job) = self.jobs.remove(process_id) {
                debug!("reaped job [{}]", job.id);
                let temp_result = writeln!(out, "{}", job.completion_message());
                log_if_err!(temp_result, "failed to announce job [{}]", job.id);
            }
        }

        finished.len()
    }

    fn list_all_mut(&mut self) -> Vec<&mut Job> {
        let mut jobs: Vec<&mut Job> = self.jobs.values_mut().collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} jobs\tjob_count: {}", self.jobs.len(), self.job_count)?;
        for job in self.list_all() {
            writeln!(f, "id: {}\tpid: {}\tlabel: {}", job.id, job.process_id, job.label)?;
        }

        Ok(())
    }
}

/// Collects whatever status information is available for `job`'s processes.
fn poll_job(job: &mut Job) {
    if job.exit_status.is_none() {
        match try_wait(job.process_id) {
            Ok(Some(WaitStatus::Exited(_, code))) => {
                job.exit_status = Some(ExitStatus::from_status(code));
                job.status = JobStatus::Completed;
            }
            Ok(Some(WaitStatus::Signaled(_, signal, _))) => {
                job.exit_status = Some(ExitStatus::from_signal(signal));
                job.status = JobStatus::Completed;
            }
            Ok(Some(WaitStatus::Stopped(_, signal))) => {
                debug!("job [{}] stopped by {:?}", job.id, signal);
                job.status = JobStatus::Stopped;
            }
            Ok(Some(WaitStatus::Continued(_))) => {
                job.status = JobStatus::Running;
                job.notified_stopped = false;
            }
            Ok(_) => {}
            Err(Errno::ECHILD) => {
                // Someone else already collected it; nothing left to wait for.
                warn!("process {} of job [{}] is gone", job.process_id, job.id);
                job.exit_status = Some(ExitStatus::from_success());
                job.status = JobStatus::Completed;
            }
            Err(e) => warn!("waitpid({}) failed: {}", job.process_id, e),
        }
    }

    let mut companions = Vec::with_capacity(job.companions.len());
    for &pid in &job.companions {
        match try_wait(pid) {
            Ok(Some(WaitStatus::Exited(..))) | Ok(Some(WaitStatus::Signaled(..))) => {
                debug!("reaped companion {} of job [{}]", pid, job.id)
            }
            Err(Errno::ECHILD) => {}
            _ => companions.push(pid),
        }
    }
    job.companions = companions;
}

fn try_wait(pid: Pid) -> nix::Result<Option<WaitStatus>> {
    match wait::waitpid(pid, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(status) => Ok(Some(status)),
        Err(Errno::EINTR) => Ok(None),
        Err(e) => Err(e),
    }
}
