//! Archive rotation.
//!
//! The archives of a job are the regular files in its destination base named
//! `{job}_*.{ext}`. Names embed a sortable timestamp, so ascending
//! lexicographic order is chronological order and the oldest excess archives
//! are a prefix of the sorted listing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use backsuite_core::BackupJob;
use backsuite_core::naming::is_archive_of;
use backsuite_events::{EventBus, EventSender};

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("could not list {}: {source}", dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a rotation found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub found: usize,
    pub deleted: Vec<PathBuf>,
    /// Files that should have been deleted but could not be, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl RotationReport {
    pub fn kept(&self) -> usize {
        self.found - self.deleted.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionManager;

impl RetentionManager {
    pub fn new() -> Self {
        Self
    }

    /// Archives of `job_name` in `dir`, oldest first. A missing directory has none.
    pub fn list_archives(&self, dir: &Path, job_name: &str, extension: &str) -> Result<Vec<PathBuf>, RetentionError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RetentionError::Scan {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RetentionError::Scan {
                dir: dir.to_path_buf(),
                source,
            })?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name();
            if is_file && name.to_str().is_some_and(|n| is_archive_of(n, job_name, extension)) {
                archives.push(entry.path());
            }
        }
        archives.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(archives)
    }

    /// Keep the `keep` newest archives of `job`, delete the rest.
    ///
    /// A failed delete is logged and the remaining excess archives are still
    /// attempted. Running it again without new archives changes nothing.
    pub fn rotate(
        &self,
        job: &BackupJob,
        keep: u32,
        extension: &str,
        events: &EventSender,
    ) -> Result<RotationReport, RetentionError> {
        self.rotate_with(job, keep, extension, events, |path| fs::remove_file(path))
    }

    fn rotate_with<F>(
        &self,
        job: &BackupJob,
        keep: u32,
        extension: &str,
        events: &EventSender,
        mut remove: F,
    ) -> Result<RotationReport, RetentionError>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let name = job.name.as_str();
        let keep = keep.max(1) as usize;
        let dir = job.destination_base.as_path();

        events.log(format!("[{name}] Starting Backup Rotation Check..."));
        events.log(format!("[{name}]   Folder: {}, Keep: {keep}", dir.display()));

        let archives = match self.list_archives(dir, name, extension) {
            Ok(archives) => archives,
            Err(err) => {
                events.log(format!("[{name}] ERROR during rotation search: {err}"));
                return Err(err);
            }
        };

        let mut report = RotationReport {
            found: archives.len(),
            ..RotationReport::default()
        };
        events.log(format!("[{name}]   Found {} backups for this job.", report.found));

        if archives.len() <= keep {
            events.log(format!("[{name}]   No cleanup needed for this job."));
            return Ok(report);
        }

        let excess = archives.len() - keep;
        events.log(format!("[{name}]   Need to delete {excess} backups."));
        for path in archives.into_iter().take(excess) {
            let file = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
            events.log(format!("[{name}]     Deleting: {file}"));
            match remove(&path) {
                Ok(()) => {
                    debug!(job = name, path = %path.display(), "deleted expired archive");
                    report.deleted.push(path);
                }
                Err(err) => {
                    warn!(job = name, path = %path.display(), error = %err, "could not delete expired archive");
                    events.log(format!("[{name}]     WARNING: Delete failed: {err}"));
                    report.failed.push((path, err.to_string()));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn job_in(dir: &Path) -> BackupJob {
        BackupJob::new("Docs", "/unused", dir)
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    fn remaining(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn deletes_the_oldest_excess_archives() {
        let dir = tempfile::tempdir().unwrap();
        for d in 1..=5 {
            touch(dir.path(), &format!("Docs_2024-01-0{d}_10-00-00.zip"));
        }
        let (tx, _rx) = backsuite_events::channel();

        let report = RetentionManager::new()
            .rotate(&job_in(dir.path()), 3, "zip", &tx)
            .unwrap();

        assert_eq!(report.found, 5);
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.kept(), 3);
        assert_eq!(
            remaining(dir.path()),
            BTreeSet::from([
                "Docs_2024-01-03_10-00-00.zip".to_string(),
                "Docs_2024-01-04_10-00-00.zip".to_string(),
                "Docs_2024-01-05_10-00-00.zip".to_string(),
            ])
        );
    }

    #[test]
    fn leaves_other_jobs_other_extensions_and_staging_dirs_alone() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Docs_2024-01-01_10-00-00.zip");
        touch(dir.path(), "Docs_2024-01-02_10-00-00.zip");
        touch(dir.path(), "Photos_2024-01-01_10-00-00.zip");
        touch(dir.path(), "Docs_2024-01-01_10-00-00.tar.gz");
        fs::create_dir(dir.path().join("Temp_Docs_2024-01-01_10-00-00.zip")).unwrap();
        let (tx, _rx) = backsuite_events::channel();

        let report = RetentionManager::new()
            .rotate(&job_in(dir.path()), 1, "zip", &tx)
            .unwrap();

        assert_eq!(report.found, 2);
        let left = remaining(dir.path());
        assert!(!left.contains("Docs_2024-01-01_10-00-00.zip"));
        assert!(left.contains("Docs_2024-01-02_10-00-00.zip"));
        assert!(left.contains("Photos_2024-01-01_10-00-00.zip"));
        assert!(left.contains("Docs_2024-01-01_10-00-00.tar.gz"));
        assert!(left.contains("Temp_Docs_2024-01-01_10-00-00.zip"));
    }

    #[test]
    fn missing_destination_has_nothing_to_rotate() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = backsuite_events::channel();
        let report = RetentionManager::new()
            .rotate(&job_in(&dir.path().join("absent")), 3, "zip", &tx)
            .unwrap();
        assert_eq!(report, RotationReport::default());
    }

    #[test]
    fn a_failed_delete_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        for d in 1..=4 {
            touch(dir.path(), &format!("Docs_2024-01-0{d}_10-00-00.zip"));
        }
        let (tx, _rx) = backsuite_events::channel();

        let report = RetentionManager::new()
            .rotate_with(&job_in(dir.path()), 1, "zip", &tx, |path| {
                if path.ends_with("Docs_2024-01-01_10-00-00.zip") {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                } else {
                    fs::remove_file(path)
                }
            })
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(
            remaining(dir.path()),
            BTreeSet::from([
                "Docs_2024-01-01_10-00-00.zip".to_string(),
                "Docs_2024-01-04_10-00-00.zip".to_string(),
            ])
        );
    }

    #[test]
    fn zero_keep_is_treated_as_one() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Docs_2024-01-01_10-00-00.zip");
        touch(dir.path(), "Docs_2024-01-02_10-00-00.zip");
        let (tx, _rx) = backsuite_events::channel();
        let report = RetentionManager::new()
            .rotate(&job_in(dir.path()), 0, "zip", &tx)
            .unwrap();
        assert_eq!(report.kept(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: survivors are the `min(n, k)` greatest names, and a second
        /// rotation is a no-op.
        #[test]
        fn survivors_are_the_newest_and_rotation_is_idempotent(
            days in proptest::collection::btree_set(0u32..2000, 0..25),
            keep in 1u32..10,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let base = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
            let names: Vec<String> = days
                .iter()
                .map(|d| {
                    let day = base + chrono::Days::new(u64::from(*d));
                    format!("Docs_{}_12-00-00.zip", day.format("%Y-%m-%d"))
                })
                .collect();
            for name in &names {
                touch(dir.path(), name);
            }
            let (tx, _rx) = backsuite_events::channel();
            let manager = RetentionManager::new();
            let job = job_in(dir.path());

            manager.rotate(&job, keep, "zip", &tx).unwrap();
            let after_first = remaining(dir.path());

            let expected: BTreeSet<String> = names
                .iter()
                .rev()
                .take(keep as usize)
                .cloned()
                .collect();
            prop_assert_eq!(after_first.len(), names.len().min(keep as usize));
            prop_assert_eq!(&after_first, &expected);

            let second = manager.rotate(&job, keep, "zip", &tx).unwrap();
            prop_assert!(second.deleted.is_empty());
            prop_assert_eq!(remaining(dir.path()), after_first);
        }
    }
}
