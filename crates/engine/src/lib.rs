//! Backup engine: external tool adapters, the per-run pipeline, retention,
//! run dispatching, scheduling and the in-memory job registry.
//!
//! ## Components
//!
//! - `SyncAdapter` / `ArchiveAdapter`: pluggable "mirror a directory" and
//!   "compress a directory" operations, with process-backed implementations
//! - `RetentionManager`: deletes the oldest archives beyond a job's limit
//! - `JobPipeline`: copy → archive → clean temp → rotate, with skip rules
//! - `RunDispatcher`: one thread per run, per-job run lock, observable handles
//! - `Scheduler`: schedule expressions → recurring triggers
//! - `InMemoryJobRegistry`: job and global-setting definitions
//! - `BackupService`: owns all of the above for the lifetime of the process

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod pipeline;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod service;

pub use adapters::{
    ArchiveAdapter, ArchiveError, ArchiveReport, ArchiveRequest, ArchiveTool, ExternalArchive,
    ExternalSync, SyncAdapter, SyncError, SyncReport, SyncRequest, SyncTool,
};
pub use config::EngineConfig;
pub use dispatch::{DispatchError, RunDispatcher, RunHandle};
pub use pipeline::{JobPipeline, JobRun, RunOutcome};
pub use registry::{InMemoryJobRegistry, JobRegistry, RegistryError};
pub use retention::{RetentionError, RetentionManager, RotationReport};
pub use scheduler::{ArmOutcome, Scheduler, SchedulerConfig, TriggerSink, Unarmed};
pub use service::{BackupService, ServiceError};
