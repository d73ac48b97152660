//! `backsuite-events`
//!
//! **Responsibility:** the progress channel between backup runs and whatever
//! renders them.
//!
//! - Many producers (pipeline runs, the scheduler, the registry) publish
//!   without ever blocking.
//! - One consumer drains everything queued on a fixed cadence.
//! - Messages are a tagged [`BackupEvent`]: log line, status update or
//!   per-file progress.

pub mod bus;
pub mod channel;
pub mod event;

pub use bus::EventBus;
pub use channel::{EventReceiver, EventSender, PollerHandle, channel};
pub use event::{BackupEvent, FileProgress, IDLE_JOB_NAME, LogLine, StatusUpdate};
