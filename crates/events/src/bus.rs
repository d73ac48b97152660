//! Event publishing abstraction.
//!
//! Publishing is fire-and-forget: a producer must never block on, or fail
//! because of, a slow or absent consumer. Ordering holds per producer only.

use std::sync::Arc;

use backsuite_core::PipelineStep;

use crate::event::BackupEvent;

/// Producer side of the event channel.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: BackupEvent);

    fn log(&self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.publish(BackupEvent::log(message));
    }

    fn status(&self, job_name: &str, step: PipelineStep, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.publish(BackupEvent::status(job_name, step, message));
    }

    fn file_progress(&self, job_name: &str, file: impl Into<String>)
    where
        Self: Sized,
    {
        self.publish(BackupEvent::file_progress(job_name, file));
    }

    fn idle(&self)
    where
        Self: Sized,
    {
        self.publish(BackupEvent::idle());
    }
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    fn publish(&self, event: BackupEvent) {
        (**self).publish(event)
    }
}
