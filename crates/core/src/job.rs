//! Job and global-setting definitions.
//!
//! These are the records the registry hands out; the scheduler and the pipeline
//! only ever read them. Field names on disk follow the settings file format
//! (`volumes_to_keep_override`, `default_volumes_to_keep`, ...).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ScheduleParseError;
use crate::schedule::ScheduleSpec;

pub const DEFAULT_RETENTION_COUNT: u32 = 3;
pub const DEFAULT_ARCHIVE_BASE_NAME: &str = "Backups_Py";
pub const MANUAL_SCHEDULE: &str = "manual";

/// A backup job definition, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupJob {
    pub name: String,
    pub source_dir: PathBuf,
    /// Parent directory for both the staging copy and the archives.
    pub destination_base: PathBuf,
    /// Directory names skipped while mirroring.
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Raw schedule expression; parsed when the job is armed.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Absent or zero means "use the global default".
    #[serde(
        rename = "volumes_to_keep_override",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retention_override: Option<u32>,
}

fn default_schedule() -> String {
    MANUAL_SCHEDULE.to_string()
}

impl BackupJob {
    /// Create an enabled, manually triggered job.
    pub fn new(
        name: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        destination_base: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source_dir: source_dir.into(),
            destination_base: destination_base.into(),
            exclusions: Vec::new(),
            enabled: true,
            schedule: default_schedule(),
            retention_override: None,
        }
    }

    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_retention_override(mut self, keep: u32) -> Self {
        self.retention_override = Some(keep);
        self
    }

    /// Parse the schedule expression.
    pub fn schedule_spec(&self) -> Result<ScheduleSpec, ScheduleParseError> {
        self.schedule.parse()
    }

    /// Number of archives to keep for this job.
    pub fn effective_retention(&self, settings: &GlobalSettings) -> u32 {
        match self.retention_override {
            Some(keep) if keep > 0 => keep,
            _ => settings.retention_count(),
        }
    }

    /// Whether the retention count comes from the job itself.
    pub fn has_retention_override(&self) -> bool {
        matches!(self.retention_override, Some(keep) if keep > 0)
    }
}

/// Process-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(rename = "default_volumes_to_keep", default = "default_retention")]
    pub default_retention_count: u32,
    /// Cosmetic only; the pipeline never reads it.
    #[serde(rename = "default_backup_base_name", default = "default_base_name")]
    pub default_archive_base_name: String,
}

fn default_retention() -> u32 {
    DEFAULT_RETENTION_COUNT
}

fn default_base_name() -> String {
    DEFAULT_ARCHIVE_BASE_NAME.to_string()
}

impl GlobalSettings {
    pub fn new(default_retention_count: u32) -> Self {
        Self {
            default_retention_count,
            ..Self::default()
        }
    }

    /// Default retention, never below one.
    pub fn retention_count(&self) -> u32 {
        self.default_retention_count.max(1)
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_retention_count: DEFAULT_RETENTION_COUNT,
            default_archive_base_name: default_base_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_when_positive() {
        let settings = GlobalSettings::new(3);
        let job = BackupJob::new("Docs", "/src", "/dst").with_retention_override(7);
        assert_eq!(job.effective_retention(&settings), 7);
        assert!(job.has_retention_override());
    }

    #[test]
    fn zero_or_absent_override_uses_global_default() {
        let settings = GlobalSettings::new(5);
        let absent = BackupJob::new("Docs", "/src", "/dst");
        let zero = absent.clone().with_retention_override(0);
        assert_eq!(absent.effective_retention(&settings), 5);
        assert_eq!(zero.effective_retention(&settings), 5);
        assert!(!zero.has_retention_override());
    }

    #[test]
    fn deserializes_settings_file_shape() {
        let raw = r#"{
            "name": "Photos",
            "source_dir": "C:/Users/me/Pictures",
            "destination_base": "D:/Backups",
            "exclusions": ["cache", ".thumbs"],
            "enabled": true,
            "schedule": "daily@02:30",
            "volumes_to_keep_override": 10
        }"#;
        let job: BackupJob = serde_json::from_str(raw).unwrap();
        assert_eq!(job.name, "Photos");
        assert_eq!(job.exclusions, vec!["cache", ".thumbs"]);
        assert_eq!(job.retention_override, Some(10));
        assert_eq!(job.schedule, "daily@02:30");
    }

    #[test]
    fn missing_optional_fields_fall_back_to_defaults() {
        let raw = r#"{"name": "Docs", "source_dir": "/a", "destination_base": "/b"}"#;
        let job: BackupJob = serde_json::from_str(raw).unwrap();
        assert!(!job.enabled);
        assert_eq!(job.schedule, "manual");
        assert!(job.exclusions.is_empty());

        let settings: GlobalSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, GlobalSettings::default());
    }

    #[test]
    fn override_is_omitted_when_unset() {
        let job = BackupJob::new("Docs", "/a", "/b");
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("volumes_to_keep_override").is_none());
    }
}
