//! `backsuite-core`: backup model building blocks.
//!
//! This crate contains the **pure model** (no process spawning, no threads):
//! job and settings definitions, the schedule grammar, artifact naming and the
//! error taxonomy shared by the engine.

pub mod error;
pub mod id;
pub mod job;
pub mod naming;
pub mod schedule;

pub use error::{BackupError, ScheduleParseError};
pub use id::RunId;
pub use job::{BackupJob, GlobalSettings};
pub use naming::{PipelineStep, RunTimestamp, TOTAL_STEPS};
pub use schedule::ScheduleSpec;
