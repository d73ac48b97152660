//! Fake adapters and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backsuite_core::RunTimestamp;
use backsuite_engine::{
    ArchiveAdapter, ArchiveError, ArchiveReport, ArchiveRequest, JobPipeline, SyncAdapter, SyncError,
    SyncReport, SyncRequest,
};
use backsuite_events::{BackupEvent, EventBus, EventReceiver, EventSender, StatusUpdate};

/// Copies the regular files at the top of `source` into staging, reporting each.
pub struct CopySync;

impl SyncAdapter for CopySync {
    fn sync(&self, request: &SyncRequest<'_>, events: &EventSender) -> Result<SyncReport, SyncError> {
        fs::create_dir_all(request.staging).unwrap();
        let mut files = 0;
        if let Ok(entries) = fs::read_dir(request.source) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_file() && !request.exclusions.contains(&name) {
                    fs::copy(entry.path(), request.staging.join(&name)).unwrap();
                    events.file_progress(request.job_name, name);
                    files += 1;
                }
            }
        }
        Ok(SyncReport {
            exit_code: Some(0),
            files_reported: files,
        })
    }
}

/// Leaves a partial staging directory behind and reports a bad exit.
pub struct FailingSync;

impl SyncAdapter for FailingSync {
    fn sync(&self, request: &SyncRequest<'_>, _events: &EventSender) -> Result<SyncReport, SyncError> {
        fs::create_dir_all(request.staging).unwrap();
        fs::write(request.staging.join("partial.bin"), b"half").unwrap();
        Err(SyncError::BadExit {
            tool: "robocopy".into(),
            code: Some(16),
        })
    }
}

/// The sync tool is not installed; nothing is created.
pub struct MissingSync;

impl SyncAdapter for MissingSync {
    fn sync(&self, _request: &SyncRequest<'_>, _events: &EventSender) -> Result<SyncReport, SyncError> {
        Err(SyncError::ToolMissing {
            tool: "robocopy".into(),
        })
    }
}

/// Writes the staging file names into the archive file.
pub struct ListingArchive;

impl ArchiveAdapter for ListingArchive {
    fn extension(&self) -> &str {
        "zip"
    }

    fn archive(&self, request: &ArchiveRequest<'_>, _events: &EventSender) -> Result<ArchiveReport, ArchiveError> {
        let mut names: Vec<String> = fs::read_dir(request.staging)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let body = format!("PK{}", names.join("\n"));
        fs::write(request.archive, &body).unwrap();
        Ok(ArchiveReport {
            path: request.archive.to_path_buf(),
            bytes: body.len() as u64,
        })
    }
}

/// Produces a zero-byte archive.
pub struct EmptyArchive;

impl ArchiveAdapter for EmptyArchive {
    fn extension(&self) -> &str {
        "zip"
    }

    fn archive(&self, request: &ArchiveRequest<'_>, _events: &EventSender) -> Result<ArchiveReport, ArchiveError> {
        fs::write(request.archive, b"").unwrap();
        Err(ArchiveError::Empty {
            path: request.archive.to_path_buf(),
        })
    }
}

pub fn pipeline(sync: impl SyncAdapter + 'static, archive: impl ArchiveAdapter + 'static) -> (JobPipeline, EventReceiver) {
    let (tx, rx) = backsuite_events::channel();
    (JobPipeline::new(Arc::new(sync), Arc::new(archive), tx), rx)
}

pub fn timestamp(s: &str) -> RunTimestamp {
    RunTimestamp::parse(s).unwrap()
}

/// Seed `dest` with empty archives named `{job}_{stamp}.zip`.
pub fn seed_archives(dest: &Path, job: &str, stamps: &[&str]) {
    fs::create_dir_all(dest).unwrap();
    for stamp in stamps {
        fs::write(dest.join(format!("{job}_{stamp}.zip")), b"old").unwrap();
    }
}

/// File names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn source_with_files(root: &Path, files: &[&str]) -> PathBuf {
    let source = root.join("source");
    fs::create_dir_all(&source).unwrap();
    for file in files {
        fs::write(source.join(file), file.as_bytes()).unwrap();
    }
    source
}

pub fn statuses(events: &[BackupEvent]) -> Vec<StatusUpdate> {
    events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::Status(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

pub fn logs(events: &[BackupEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            BackupEvent::Log(l) => Some(l.message.clone()),
            _ => None,
        })
        .collect()
}
