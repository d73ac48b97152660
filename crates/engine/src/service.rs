//! Process-lifetime owner of the engine components.
//!
//! Wires registry, pipeline, dispatcher and scheduler together and keeps the
//! scheduler's triggers in step with registry edits. Passed explicitly to
//! whatever presents it; there is no global instance.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use backsuite_core::naming::rotation_overlaps;
use backsuite_core::{BackupJob, GlobalSettings};
use backsuite_events::{EventBus, EventSender};

use crate::adapters::{ArchiveAdapter, SyncAdapter};
use crate::config::EngineConfig;
use crate::dispatch::{DispatchError, RunDispatcher, RunHandle};
use crate::pipeline::JobPipeline;
use crate::registry::{InMemoryJobRegistry, JobRegistry, RegistryError};
use crate::scheduler::{ArmOutcome, Scheduler};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("could not start scheduler: {0}")]
    Scheduler(#[source] io::Error),
}

pub struct BackupService {
    registry: Arc<InMemoryJobRegistry>,
    events: EventSender,
    dispatcher: Arc<RunDispatcher>,
    scheduler: Scheduler,
}

impl BackupService {
    pub fn new(
        registry: Arc<InMemoryJobRegistry>,
        sync: Arc<dyn SyncAdapter>,
        archive: Arc<dyn ArchiveAdapter>,
        events: EventSender,
        config: &EngineConfig,
    ) -> Self {
        let pipeline = JobPipeline::new(sync, archive, events.clone()).with_idle_delay(config.idle_delay);
        let dispatcher = Arc::new(RunDispatcher::new(Arc::new(pipeline)));
        let scheduler = Scheduler::new(dispatcher.clone(), events.clone(), config.scheduler_config());
        Self {
            registry,
            events,
            dispatcher,
            scheduler,
        }
    }

    /// Service backed by the sync and archive tools selected in `config`.
    pub fn with_external_tools(
        registry: Arc<InMemoryJobRegistry>,
        events: EventSender,
        config: &EngineConfig,
    ) -> Self {
        Self::new(
            registry,
            Arc::new(config.sync_adapter()),
            Arc::new(config.archive_adapter()),
            events,
            config,
        )
    }

    pub fn registry(&self) -> &Arc<InMemoryJobRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<RunDispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Arm every job and start the scheduler thread.
    pub fn start(&self) -> Result<Vec<(String, ArmOutcome)>, ServiceError> {
        let armed = self.reload();
        self.scheduler.start().map_err(ServiceError::Scheduler)?;
        info!(armed = self.scheduler.armed_jobs().len(), "backup service started");
        Ok(armed)
    }

    /// Re-arm the scheduler from the registry's current contents.
    pub fn reload(&self) -> Vec<(String, ArmOutcome)> {
        let (jobs, settings) = self.registry.snapshot();
        self.warn_overlapping_rotations(&jobs);
        self.scheduler.reload(&jobs, settings)
    }

    /// Flag job pairs whose archives share a destination and a name prefix.
    fn warn_overlapping_rotations(&self, jobs: &[BackupJob]) {
        for job in jobs {
            for other in jobs {
                if job.destination_base == other.destination_base && rotation_overlaps(&job.name, &other.name) {
                    self.events.log(format!(
                        "WARNING: Rotation of '{}' also counts archives of '{}' in {}.",
                        job.name,
                        other.name,
                        job.destination_base.display()
                    ));
                    warn!(job = %job.name, other = %other.name, "overlapping archive names in one destination");
                }
            }
        }
    }

    /// Manually run one job by name.
    ///
    /// A disabled job is still dispatched; its run ends as skipped.
    pub fn submit(&self, name: &str) -> Result<RunHandle, ServiceError> {
        let Some(job) = self.registry.get(name) else {
            self.events.log(format!("ERROR: Job '{name}' not found."));
            return Err(ServiceError::UnknownJob(name.to_string()));
        };
        if !job.enabled {
            self.events.log(format!("Job '{name}' is disabled; it will be skipped."));
        } else {
            self.events.log(format!("Queueing manual backup: {name}"));
        }
        Ok(self.dispatcher.submit(job, self.registry.global_settings())?)
    }

    /// Manually run every enabled job, each on its own thread.
    pub fn run_all(&self) -> Vec<Result<RunHandle, ServiceError>> {
        let (jobs, _) = self.registry.snapshot();
        jobs.into_iter()
            .filter(|job| job.enabled)
            .map(|job| self.submit(&job.name))
            .collect()
    }

    /// Add or replace a job and re-arm its trigger.
    pub fn upsert_job(&self, job: BackupJob) -> Result<ArmOutcome, ServiceError> {
        self.registry.upsert(job.clone())?;
        self.warn_overlapping_rotations(&self.registry.snapshot().0);
        Ok(self.scheduler.arm(&job))
    }

    pub fn remove_job(&self, name: &str) -> Result<BackupJob, ServiceError> {
        let job = self.registry.remove(name)?;
        self.scheduler.disarm(name);
        Ok(job)
    }

    pub fn rename_job(&self, old: &str, new: &str) -> Result<ArmOutcome, ServiceError> {
        let job = self.registry.rename(old, new)?;
        self.warn_overlapping_rotations(&self.registry.snapshot().0);
        self.scheduler.disarm(old);
        Ok(self.scheduler.arm(&job))
    }

    /// Replace the global settings; later firings and manual runs use them.
    pub fn update_settings(&self, settings: GlobalSettings) {
        self.registry.set_global_settings(settings.clone());
        self.scheduler.update_settings(settings);
    }

    /// Stop the scheduler, then wait for in-flight runs.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.dispatcher.join_all();
        info!("backup service stopped");
    }
}
