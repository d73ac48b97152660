//! Job definitions and global settings.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use backsuite_core::{BackupJob, GlobalSettings};

/// Read access to job definitions.
pub trait JobRegistry: Send + Sync {
    /// All jobs, in insertion order.
    fn list_jobs(&self) -> Vec<BackupJob>;

    fn get(&self, name: &str) -> Option<BackupJob>;

    fn global_settings(&self) -> GlobalSettings;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid job: {0}")]
    Validation(String),
}

/// Job names end up in file names, so they must be usable as one.
fn validate(job: &BackupJob) -> Result<(), RegistryError> {
    validate_name(&job.name)
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::Validation("job name is empty".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(RegistryError::Validation(format!(
            "job name '{name}' contains a path separator"
        )));
    }
    Ok(())
}

/// In-memory registry, ordered as jobs were added.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<Vec<BackupJob>>,
    settings: RwLock<GlobalSettings>,
}

impl InMemoryJobRegistry {
    /// Build a registry, rejecting invalid or duplicate job names.
    pub fn new(jobs: Vec<BackupJob>, settings: GlobalSettings) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for job in &jobs {
            validate(job)?;
            if !seen.insert(job.name.as_str()) {
                return Err(RegistryError::AlreadyExists(job.name.clone()));
            }
        }
        Ok(Self {
            jobs: RwLock::new(jobs),
            settings: RwLock::new(settings),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<BackupJob>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<BackupJob>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new job.
    pub fn insert(&self, job: BackupJob) -> Result<(), RegistryError> {
        validate(&job)?;
        let mut jobs = self.write();
        if jobs.iter().any(|j| j.name == job.name) {
            return Err(RegistryError::AlreadyExists(job.name));
        }
        jobs.push(job);
        Ok(())
    }

    /// Add or replace a job by name. Returns the replaced definition.
    pub fn upsert(&self, job: BackupJob) -> Result<Option<BackupJob>, RegistryError> {
        validate(&job)?;
        let mut jobs = self.write();
        match jobs.iter_mut().find(|j| j.name == job.name) {
            Some(existing) => Ok(Some(std::mem::replace(existing, job))),
            None => {
                jobs.push(job);
                Ok(None)
            }
        }
    }

    pub fn remove(&self, name: &str) -> Result<BackupJob, RegistryError> {
        let mut jobs = self.write();
        let index = jobs
            .iter()
            .position(|j| j.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(jobs.remove(index))
    }

    /// Rename a job in place, keeping its position.
    pub fn rename(&self, old: &str, new: &str) -> Result<BackupJob, RegistryError> {
        validate_name(new)?;
        let mut jobs = self.write();
        if old != new && jobs.iter().any(|j| j.name == new) {
            return Err(RegistryError::AlreadyExists(new.to_string()));
        }
        let job = jobs
            .iter_mut()
            .find(|j| j.name == old)
            .ok_or_else(|| RegistryError::NotFound(old.to_string()))?;
        job.name = new.to_string();
        Ok(job.clone())
    }

    pub fn set_global_settings(&self, settings: GlobalSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Consistent copy of every job plus the settings.
    pub fn snapshot(&self) -> (Vec<BackupJob>, GlobalSettings) {
        let jobs = self.read();
        (jobs.clone(), self.global_settings())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn list_jobs(&self) -> Vec<BackupJob> {
        self.read().clone()
    }

    fn get(&self, name: &str) -> Option<BackupJob> {
        self.read().iter().find(|j| j.name == name).cloned()
    }

    fn global_settings(&self) -> GlobalSettings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
