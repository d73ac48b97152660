//! Unbounded multi-producer / single-consumer event channel.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, trace};

use crate::bus::EventBus;
use crate::event::BackupEvent;

/// Create a connected sender/receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Cloneable producer handle.
///
/// Sending never blocks. When the receiver is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<BackupEvent>,
}

impl EventBus for EventSender {
    fn publish(&self, event: BackupEvent) {
        // Log lines also land in the process log.
        if let BackupEvent::Log(line) = &event {
            info!(target: "backsuite::events", "{}", line.message);
        }
        if self.tx.send(event).is_err() {
            trace!("event receiver dropped; discarding event");
        }
    }
}

/// Single consumer of the channel.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<BackupEvent>,
}

impl EventReceiver {
    /// Take everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<BackupEvent> {
        self.rx.try_iter().collect()
    }

    /// Spawn a thread that drains the channel every `interval` and hands each
    /// event to `handler`, in queue order.
    pub fn spawn_poller<H>(self, name: &str, interval: Duration, mut handler: H) -> std::io::Result<PollerHandle>
    where
        H: FnMut(BackupEvent) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    let stop = !matches!(
                        shutdown_rx.try_recv(),
                        Err(mpsc::TryRecvError::Empty)
                    );
                    for event in self.drain() {
                        handler(event);
                    }
                    if stop {
                        break;
                    }
                    thread::sleep(interval);
                }
            })?;

        Ok(PollerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Handle to stop and join a poller thread.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop polling after one final drain, and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use backsuite_core::PipelineStep;

    use super::*;
    use crate::event::StatusUpdate;

    #[test]
    fn drain_takes_everything_queued() {
        let (tx, rx) = channel();
        tx.log("one");
        tx.status("Docs", PipelineStep::Copying, "Copying files...");
        tx.file_progress("Docs", "a.txt");

        let events = rx.drain();
        assert_eq!(events.len(), 3);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let (tx, rx) = channel();
        for step in [
            PipelineStep::Copying,
            PipelineStep::Archiving,
            PipelineStep::CleaningTemp,
            PipelineStep::RotatingRetention,
        ] {
            tx.status("Docs", step, "");
        }
        let steps: Vec<u8> = rx
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                BackupEvent::Status(s) => Some(s.step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
    }

    #[test]
    fn per_producer_order_holds_across_threads() {
        let (tx, rx) = channel();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        tx.file_progress(&format!("job-{p}"), i.to_string());
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let events = rx.drain();
        assert_eq!(events.len(), 400);
        for p in 0..4 {
            let name = format!("job-{p}");
            let seen: Vec<usize> = events
                .iter()
                .filter_map(|e| match e {
                    BackupEvent::FileProgress(fp) if fp.job_name == name => fp.file.parse().ok(),
                    _ => None,
                })
                .collect();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn publishing_without_a_receiver_does_not_block_or_panic() {
        let (tx, rx) = channel();
        drop(rx);
        tx.log("nobody listens");
        tx.idle();
    }

    #[test]
    fn poller_delivers_events_and_drains_on_shutdown() {
        let (tx, rx) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let poller = rx
            .spawn_poller("test-poller", Duration::from_millis(10), move |e| {
                sink.lock().unwrap().push(e)
            })
            .unwrap();

        tx.status("Docs", PipelineStep::Copying, "Copying files...");
        tx.idle();
        poller.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], BackupEvent::Status(StatusUpdate::idle()));
    }
}
