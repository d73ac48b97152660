//! Backup error model.

use thiserror::Error;

/// Result type used across the backup engine.

/// Failure categories of a backup run.
///
/// None of these is process-fatal: each one is captured at the component
/// boundary, reported on the event bus and decides which later pipeline steps
/// are skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackupError {
    /// The sync or archive executable could not be found.
    #[error("external tool not found: {0}")]
    ExternalToolMissing(String),

    /// The mirroring step exited with a non-success code or could not run.
    #[error("sync failed: {0}")]
    SyncFailure(String),

    /// Bad exit, missing output, or zero-byte output from the archive step.
    #[error("archive failed: {0}")]
    ArchiveFailure(String),

    /// The staging directory could not be removed.
    #[error("temp cleanup failed: {0}")]
    CleanupFailure(String),

    /// A single expired archive could not be deleted.
    #[error("retention delete failed: {0}")]
    RetentionDeleteFailure(String),

    /// A schedule expression did not match the grammar.
    #[error(transparent)]
    ScheduleParse(#[from] ScheduleParseError),
}

impl BackupError {
    pub fn tool_missing(tool: impl Into<String>) -> Self {
        Self::ExternalToolMissing(tool.into())
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::SyncFailure(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::ArchiveFailure(msg.into())
    }

    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::CleanupFailure(msg.into())
    }

    pub fn retention_delete(msg: impl Into<String>) -> Self {
        Self::RetentionDeleteFailure(msg.into())
    }
}

/// Schedule expression rejected by the parser.
///
/// A job carrying such an expression is left unarmed, never defaulted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("unrecognized schedule '{0}'")]
    Unrecognized(String),

    #[error("invalid time of day '{0}' (expected HH:MM)")]
    InvalidTime(String),

    #[error("invalid interval '{0}' (expected a positive number of minutes)")]
    InvalidInterval(String),

    #[error("invalid weekday '{0}'")]
    InvalidWeekday(String),
}
