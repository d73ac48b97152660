//! Background execution of pipeline runs.
//!
//! Each accepted run gets its own named thread. A job has at most one run in
//! flight: a second request for the same job while the first is still running
//! is rejected with [`DispatchError::AlreadyRunning`]. Runs of different jobs
//! proceed in parallel.

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use backsuite_core::{BackupJob, GlobalSettings, PipelineStep, RunId, RunTimestamp};
use backsuite_events::EventBus;

use crate::pipeline::{JobPipeline, RunOutcome};
use crate::scheduler::TriggerSink;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("a backup of '{job}' is already running")]
    AlreadyRunning { job: String },

    #[error("could not start run thread: {0}")]
    Spawn(#[from] io::Error),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct RunSlot {
    outcome: Mutex<Option<RunOutcome>>,
    done: Condvar,
}

impl RunSlot {
    fn complete(&self, outcome: RunOutcome) {
        *lock(&self.outcome) = Some(outcome);
        self.done.notify_all();
    }
}

/// Observer of one dispatched run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: RunId,
    job_name: String,
    slot: Arc<RunSlot>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.slot.outcome).is_some()
    }

    /// Block until the run finishes.
    pub fn wait(&self) -> RunOutcome {
        let mut outcome = lock(&self.slot.outcome);
        loop {
            if let Some(done) = outcome.as_ref() {
                return done.clone();
            }
            outcome = self.slot.done.wait(outcome).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout`; `None` if the run is still going.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RunOutcome> {
        let outcome = lock(&self.slot.outcome);
        let (outcome, _) = self
            .slot
            .done
            .wait_timeout_while(outcome, timeout, |o| o.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        outcome.clone()
    }
}

type ActiveRuns = Arc<Mutex<HashMap<String, RunId>>>;

/// Releases a job's run lock when the run thread ends, panicking or not.
struct ActiveGuard {
    active: ActiveRuns,
    job_name: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.job_name);
    }
}

/// Starts pipeline runs on background threads.
pub struct RunDispatcher {
    pipeline: Arc<JobPipeline>,
    active: ActiveRuns,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl RunDispatcher {
    pub fn new(pipeline: Arc<JobPipeline>) -> Self {
        Self {
            pipeline,
            active: Arc::new(Mutex::new(HashMap::new())),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn pipeline(&self) -> &Arc<JobPipeline> {
        &self.pipeline
    }

    /// Start a run of `job` unless one is already in flight.
    ///
    /// The job and settings are snapshots: later edits do not affect this run.
    pub fn submit(&self, job: BackupJob, settings: GlobalSettings) -> Result<RunHandle, DispatchError> {
        let run_id = RunId::new();
        let job_name = job.name.clone();
        {
            let mut active = lock(&self.active);
            if active.contains_key(&job_name) {
                self.pipeline
                    .events()
                    .log(format!("[{job_name}] Backup already running; request ignored."));
                warn!(job = %job_name, "rejected overlapping run");
                return Err(DispatchError::AlreadyRunning { job: job_name });
            }
            active.insert(job_name.clone(), run_id);
        }
        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            job_name: job_name.clone(),
        };

        let slot = Arc::new(RunSlot::default());
        let handle = RunHandle {
            run_id,
            job_name: job_name.clone(),
            slot: Arc::clone(&slot),
        };
        let pipeline = Arc::clone(&self.pipeline);

        // On spawn failure the closure is dropped, and the guard with it.
        let join = thread::Builder::new()
            .name(format!("backup-{job_name}"))
            .spawn(move || {
                let outcome = run_guarded(&pipeline, run_id, &job, &settings);
                drop(guard);
                slot.complete(outcome);
            })?;

        let mut threads = lock(&self.threads);
        threads.retain(|t| !t.is_finished());
        threads.push(join);
        debug!(job = %job_name, run_id = %run_id, "run dispatched");
        Ok(handle)
    }

    /// Names of jobs with a run in flight.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.active).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        lock(&self.active).contains_key(job_name)
    }

    /// Wait for every dispatched run thread to exit.
    pub fn join_all(&self) {
        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for join in threads {
            if join.join().is_err() {
                error!("run thread panicked outside the pipeline");
            }
        }
    }
}

impl TriggerSink for RunDispatcher {
    fn fire(&self, job: &BackupJob, settings: &GlobalSettings) {
        self.pipeline
            .events()
            .log(format!("SCHEDULER: Triggered backup for {}.", job.name));
        if let Err(err) = self.submit(job.clone(), settings.clone()) {
            info!(job = %job.name, error = %err, "scheduled run not started");
        }
    }
}

fn run_guarded(pipeline: &JobPipeline, run_id: RunId, job: &BackupJob, settings: &GlobalSettings) -> RunOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pipeline.run_with(run_id, job, settings, RunTimestamp::now())
    }));
    match result {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            let events = pipeline.events();
            events.log(format!("[{}] ERROR: run aborted: {reason}", job.name));
            events.status(&job.name, PipelineStep::Idle, "Finished with Errors!");
            events.idle();
            error!(job = %job.name, run_id = %run_id, %reason, "backup run panicked");
            RunOutcome::Aborted {
                job_name: job.name.clone(),
                reason,
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
