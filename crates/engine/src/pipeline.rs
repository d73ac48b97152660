//! The per-run state machine.
//!
//! ```text
//! 0 Start → 1 Copying → 2 Archiving → 3 CleaningTemp → 4 RotatingRetention → 0 Done
//! ```
//!
//! - Disabled job: stop at step 0 with no side effects.
//! - Step 2 runs only if step 1 succeeded.
//! - Step 3 runs whenever the staging directory exists.
//! - Step 4 runs only if step 2 succeeded.
//! - The run succeeds iff both sync and archive succeeded. The terminal status
//!   is always followed by the Idle reset.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use backsuite_core::naming::{archive_path, staging_path};
use backsuite_core::{BackupError, BackupJob, GlobalSettings, PipelineStep, RunId, RunTimestamp};
use backsuite_events::{EventBus, EventSender};

use crate::adapters::{ArchiveAdapter, ArchiveRequest, SyncAdapter, SyncRequest};
use crate::retention::{RetentionManager, RotationReport};

/// State of one run. Created at pipeline start, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub run_id: RunId,
    pub job_name: String,
    pub timestamp: RunTimestamp,
    pub temp_dir: PathBuf,
    pub archive_path: PathBuf,
    pub step: PipelineStep,
    pub retention_count: u32,
    pub sync_ok: bool,
    pub archive_ok: bool,
    pub cleanup_ok: bool,
    pub rotation: Option<RotationReport>,
    /// Steps that actually did work, in order.
    pub executed: Vec<PipelineStep>,
    pub errors: Vec<BackupError>,
}

impl JobRun {
    fn succeeded(&self) -> bool {
        self.sync_ok && self.archive_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job is disabled; nothing was touched.
    Skipped { job_name: String },
    Succeeded(JobRun),
    Failed(JobRun),
    /// The run panicked; it still reported a terminal status and the Idle reset.
    Aborted { job_name: String, reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded(_))
    }

    pub fn run(&self) -> Option<&JobRun> {
        match self {
            RunOutcome::Succeeded(run) | RunOutcome::Failed(run) => Some(run),
            RunOutcome::Skipped { .. } | RunOutcome::Aborted { .. } => None,
        }
    }

    pub fn job_name(&self) -> &str {
        match self {
            RunOutcome::Succeeded(run) | RunOutcome::Failed(run) => &run.job_name,
            RunOutcome::Skipped { job_name } | RunOutcome::Aborted { job_name, .. } => job_name,
        }
    }
}

/// Sequences sync → archive → temp cleanup → rotation for one job.
///
/// Holds no per-run state, so one pipeline is shared by all concurrent runs.
pub struct JobPipeline {
    sync: Arc<dyn SyncAdapter>,
    archive: Arc<dyn ArchiveAdapter>,
    retention: RetentionManager,
    events: EventSender,
    idle_delay: Duration,
}

impl JobPipeline {
    pub fn new(sync: Arc<dyn SyncAdapter>, archive: Arc<dyn ArchiveAdapter>, events: EventSender) -> Self {
        Self {
            sync,
            archive,
            retention: RetentionManager::new(),
            events,
            idle_delay: Duration::ZERO,
        }
    }

    /// Pause between the terminal status and the Idle reset, so slow
    /// consumers get to show the terminal message.
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Run `job` now.
    pub fn run(&self, job: &BackupJob, settings: &GlobalSettings) -> RunOutcome {
        self.run_at(job, settings, RunTimestamp::now())
    }

    /// Run `job` with an explicit start timestamp (used for artifact names).
    pub fn run_at(&self, job: &BackupJob, settings: &GlobalSettings, timestamp: RunTimestamp) -> RunOutcome {
        self.run_with(RunId::new(), job, settings, timestamp)
    }

    /// Run `job` under a caller-assigned run id.
    pub fn run_with(
        &self,
        run_id: RunId,
        job: &BackupJob,
        settings: &GlobalSettings,
        timestamp: RunTimestamp,
    ) -> RunOutcome {
        let outcome = self.execute(run_id, job, settings, timestamp);
        if matches!(outcome, RunOutcome::Skipped { .. }) {
            return outcome;
        }
        if !self.idle_delay.is_zero() {
            thread::sleep(self.idle_delay);
        }
        self.events.idle();
        outcome
    }

    fn execute(&self, run_id: RunId, job: &BackupJob, settings: &GlobalSettings, timestamp: RunTimestamp) -> RunOutcome {
        let name = job.name.as_str();
        let events = &self.events;
        events.status(name, PipelineStep::Idle, "Starting...");

        if !job.enabled {
            events.log(format!("[{name}] SKIPPED: Job is disabled."));
            events.status(name, PipelineStep::Idle, "Skipped (Disabled)");
            return RunOutcome::Skipped {
                job_name: name.to_string(),
            };
        }

        let retention_count = job.effective_retention(settings);
        if job.has_retention_override() {
            events.log(format!("[{name}] Using job-specific retention: {retention_count} backups."));
        } else {
            events.log(format!("[{name}] Using global retention ({retention_count} backups)."));
        }

        let destination = job.destination_base.as_path();
        if let Err(err) = fs::create_dir_all(destination) {
            events.log(format!(
                "[{name}] ERROR: could not create destination {}: {err}",
                destination.display()
            ));
        }

        let extension = self.archive.extension().to_string();
        let mut run = JobRun {
            run_id,
            job_name: name.to_string(),
            timestamp,
            temp_dir: staging_path(destination, name, timestamp),
            archive_path: archive_path(destination, name, timestamp, &extension),
            step: PipelineStep::Idle,
            retention_count,
            sync_ok: false,
            archive_ok: false,
            cleanup_ok: false,
            rotation: None,
            executed: Vec::new(),
            errors: Vec::new(),
        };
        info!(job = name, run_id = %run.run_id, %timestamp, "backup run started");

        self.copy(job, &mut run);
        self.compress(&mut run);
        self.clean_temp(&mut run);
        self.rotate(job, &mut run, &extension);

        run.step = PipelineStep::Idle;
        if run.succeeded() {
            events.log(format!("--- Job: {name} COMPLETED SUCCESSFULLY ---"));
            events.status(name, PipelineStep::Idle, "Finished Successfully!");
            info!(job = name, run_id = %run.run_id, "backup run succeeded");
            RunOutcome::Succeeded(run)
        } else {
            events.log(format!("--- Job: {name} FAILED ---"));
            events.status(name, PipelineStep::Idle, "Finished with Errors!");
            warn!(job = name, run_id = %run.run_id, errors = ?run.errors, "backup run failed");
            RunOutcome::Failed(run)
        }
    }

    fn enter(&self, run: &mut JobRun, step: PipelineStep, message: &str) {
        run.step = step;
        self.events.status(&run.job_name, step, message);
    }

    fn copy(&self, job: &BackupJob, run: &mut JobRun) {
        self.enter(run, PipelineStep::Copying, "Copying files...");
        run.executed.push(PipelineStep::Copying);

        let request = SyncRequest {
            job_name: &run.job_name,
            source: &job.source_dir,
            staging: &run.temp_dir,
            exclusions: &job.exclusions,
        };
        match self.sync.sync(&request, &self.events) {
            Ok(report) => {
                run.sync_ok = true;
                info!(job = %run.job_name, files = report.files_reported, "sync step succeeded");
            }
            Err(err) => {
                warn!(job = %run.job_name, error = %err, "sync step failed");
                run.errors.push(err.to_backup_error());
            }
        }
    }

    fn compress(&self, run: &mut JobRun) {
        if !run.sync_ok {
            self.events.log(format!("[{}] Skipping zip.", run.job_name));
            self.enter(run, PipelineStep::Archiving, "Skipping zip...");
            return;
        }
        self.enter(run, PipelineStep::Archiving, "Zipping files...");
        run.executed.push(PipelineStep::Archiving);

        let request = ArchiveRequest {
            job_name: &run.job_name,
            staging: &run.temp_dir,
            archive: &run.archive_path,
        };
        match self.archive.archive(&request, &self.events) {
            Ok(report) => {
                run.archive_ok = true;
                info!(job = %run.job_name, bytes = report.bytes, "archive step succeeded");
            }
            Err(err) => {
                warn!(job = %run.job_name, error = %err, "archive step failed");
                run.errors.push(err.to_backup_error());
            }
        }
    }

    fn clean_temp(&self, run: &mut JobRun) {
        self.enter(run, PipelineStep::CleaningTemp, "Cleaning temp files...");
        let name = run.job_name.clone();

        if !run.temp_dir.exists() {
            self.events.log(format!("[{name}] Temp dir doesn't exist."));
            run.cleanup_ok = true;
            return;
        }
        run.executed.push(PipelineStep::CleaningTemp);
        self.events.log(format!(
            "[{name}] Cleaning up temporary folder: {}",
            run.temp_dir.display()
        ));
        match fs::remove_dir_all(&run.temp_dir) {
            Ok(()) => {
                self.events.log(format!("[{name}]   Temp folder deleted."));
                run.cleanup_ok = true;
            }
            Err(err) => {
                self.events.log(format!("[{name}] ERROR: Failed to delete temp folder: {err}"));
                warn!(job = %name, path = %run.temp_dir.display(), error = %err, "temp cleanup failed");
                run.errors.push(BackupError::cleanup(format!(
                    "{}: {err}",
                    run.temp_dir.display()
                )));
            }
        }
    }

    fn rotate(&self, job: &BackupJob, run: &mut JobRun, extension: &str) {
        self.enter(run, PipelineStep::RotatingRetention, "Cleaning old backups...");
        if !run.archive_ok {
            self.events.log(format!("[{}] Skipping rotation.", run.job_name));
            return;
        }
        run.executed.push(PipelineStep::RotatingRetention);

        match self.retention.rotate(job, run.retention_count, extension, &self.events) {
            Ok(report) => {
                for (path, reason) in &report.failed {
                    run.errors
                        .push(BackupError::retention_delete(format!("{}: {reason}", path.display())));
                }
                run.rotation = Some(report);
            }
            Err(err) => {
                warn!(job = %run.job_name, error = %err, "rotation scan failed");
                run.errors.push(BackupError::retention_delete(err.to_string()));
            }
        }
    }
}
