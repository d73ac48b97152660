//! Event payloads.

use chrono::{DateTime, Local};
use serde::Serialize;

use backsuite_core::{PipelineStep, TOTAL_STEPS};

/// Job name carried by the status reset message.
pub const IDLE_JOB_NAME: &str = "Idle";

/// A message on the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupEvent {
    /// Free-text log line.
    Log(LogLine),
    /// Step transition of a run (or the Idle reset).
    Status(StatusUpdate),
    /// One entry reported by the mirroring tool.
    FileProgress(FileProgress),
}

impl BackupEvent {
    pub fn log(message: impl Into<String>) -> Self {
        BackupEvent::Log(LogLine::now(message))
    }

    pub fn status(job_name: impl Into<String>, step: PipelineStep, message: impl Into<String>) -> Self {
        BackupEvent::Status(StatusUpdate::new(job_name, step, message))
    }

    pub fn file_progress(job_name: impl Into<String>, file: impl Into<String>) -> Self {
        BackupEvent::FileProgress(FileProgress {
            job_name: job_name.into(),
            file: file.into(),
        })
    }

    /// The reset message that returns a status indicator to idle.
    pub fn idle() -> Self {
        BackupEvent::Status(StatusUpdate::idle())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub job_name: String,
    pub step: u8,
    pub total_steps: u8,
    pub message: String,
}

impl StatusUpdate {
    pub fn new(job_name: impl Into<String>, step: PipelineStep, message: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            step: step.number(),
            total_steps: TOTAL_STEPS,
            message: message.into(),
        }
    }

    pub fn idle() -> Self {
        Self::new(IDLE_JOB_NAME, PipelineStep::Idle, "")
    }

    /// Idle job name or step zero both mean "reset the indicator".
    pub fn is_reset(&self) -> bool {
        self.job_name == IDLE_JOB_NAME || self.step == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileProgress {
    pub job_name: String,
    pub file: String,
}
