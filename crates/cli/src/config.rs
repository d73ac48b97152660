//! Settings file persistence.
//!
//! The file is pretty-printed JSON holding the global settings and the job
//! list. A missing file is created with defaults. A file that cannot be read
//! or decoded is moved aside to `<path>.bak_<YYYYmmddHHMMSS>` and replaced
//! with defaults, so a corrupt file never prevents startup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use backsuite_core::{BackupJob, GlobalSettings};
use backsuite_engine::{InMemoryJobRegistry, RegistryError};

pub const DEFAULT_CONFIG_PATH: &str = "Settings/backup_config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub global_settings: GlobalSettings,
    #[serde(default)]
    pub backup_jobs: Vec<BackupJob>,
}

impl ConfigFile {
    pub fn into_registry(self) -> Result<InMemoryJobRegistry, RegistryError> {
        InMemoryJobRegistry::new(self.backup_jobs, self.global_settings)
    }
}

/// How [`ConfigStore::load`] obtained its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    File,
    /// No file existed; defaults were written.
    Created,
    /// The file was unreadable; it was moved to `backup` and defaults written.
    Recovered { backup: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<(ConfigFile, LoadSource)> {
        info!(path = %self.path.display(), "loading configuration");
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "configuration file not found; creating defaults");
                let config = ConfigFile::default();
                self.save(&config)?;
                return Ok((config, LoadSource::Created));
            }
            Err(err) => Err(err.to_string()),
        };

        match raw.and_then(|raw| serde_json::from_str::<ConfigFile>(&raw).map_err(|e| e.to_string())) {
            Ok(config) => Ok((config, LoadSource::File)),
            Err(reason) => {
                error!(path = %self.path.display(), %reason, "configuration unreadable; replacing with defaults");
                let backup = self.backup_path();
                fs::rename(&self.path, &backup)
                    .with_context(|| format!("moving corrupt config to {}", backup.display()))?;
                info!(backup = %backup.display(), "corrupt configuration moved aside");
                let config = ConfigFile::default();
                self.save(&config)?;
                Ok((config, LoadSource::Recovered { backup }))
            }
        }
    }

    pub fn save(&self, config: &ConfigFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        config.serialize(&mut ser).context("encoding configuration")?;
        fs::write(&self.path, out).with_context(|| format!("writing {}", self.path.display()))?;
        info!(path = %self.path.display(), "configuration saved");
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".bak_{}", Local::now().format("%Y%m%d%H%M%S")));
        PathBuf::from(name)
    }
}
