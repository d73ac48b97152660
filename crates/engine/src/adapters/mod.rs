//! Pluggable external operations invoked by the pipeline.
//!
//! The engine never mirrors or compresses bytes itself. It launches a tool,
//! interprets its exit status and output, and classifies the outcome.

pub mod archive;
mod process;
pub mod sync;

use std::path::{Path, PathBuf};

use thiserror::Error;

use backsuite_core::BackupError;
use backsuite_events::EventSender;

pub use archive::{ArchiveTool, ExternalArchive};
pub use sync::{ExternalSync, SyncTool};

/// Inputs of one mirroring operation.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub job_name: &'a str,
    pub source: &'a Path,
    pub staging: &'a Path,
    pub exclusions: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub exit_code: Option<i32>,
    /// Entries reported on the progress stream.
    pub files_reported: usize,
}

/// Mirror `source` into `staging`, recursively and preserving attributes,
/// skipping excluded subtrees. Per-file progress goes to `events`.
pub trait SyncAdapter: Send + Sync {
    fn sync(&self, request: &SyncRequest<'_>, events: &EventSender) -> Result<SyncReport, SyncError>;
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{tool} not found")]
    ToolMissing { tool: String },

    #[error("failed to run {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code:?}")]
    BadExit { tool: String, code: Option<i32> },
}

impl SyncError {
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, SyncError::ToolMissing { .. })
    }

    pub fn to_backup_error(&self) -> BackupError {
        match self {
            SyncError::ToolMissing { tool } => BackupError::tool_missing(tool.clone()),
            other => BackupError::sync(other.to_string()),
        }
    }
}

/// Inputs of one compression operation.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveRequest<'a> {
    pub job_name: &'a str,
    pub staging: &'a Path,
    pub archive: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Compress the whole content of `staging` into the single file `archive`,
/// replacing any file already there.
pub trait ArchiveAdapter: Send + Sync {
    /// File extension (without the dot) of produced archives.
    fn extension(&self) -> &str;

    fn archive(&self, request: &ArchiveRequest<'_>, events: &EventSender) -> Result<ArchiveReport, ArchiveError>;
}

/// Failed archive step. Only [`ArchiveError::ToolMissing`] is told apart by
/// callers; the rest exist for diagnostics.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{tool} not found")]
    ToolMissing { tool: String },

    #[error("failed to run {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not replace existing archive {}: {source}", path.display())]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code:?}")]
    BadExit { tool: String, code: Option<i32> },

    #[error("archive {} missing after a successful exit", path.display())]
    Missing { path: PathBuf },

    #[error("archive {} is empty", path.display())]
    Empty { path: PathBuf },
}

impl ArchiveError {
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, ArchiveError::ToolMissing { .. })
    }

    pub fn to_backup_error(&self) -> BackupError {
        match self {
            ArchiveError::ToolMissing { tool } => BackupError::tool_missing(tool.clone()),
            other => BackupError::archive(other.to_string()),
        }
    }
}
