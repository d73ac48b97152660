//! Turns schedule expressions into recurring triggers.
//!
//! The scheduler thread wakes every `tick`, fires triggers whose time has
//! come, and re-arms them. Intervals keep their original grid; wall-clock
//! schedules re-arm for their next occurrence. A firing more than
//! `misfire_grace` late (e.g. after the machine slept) is dropped rather than
//! run. Firing hands the job to a [`TriggerSink`]; the scheduler never runs
//! backups itself.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use backsuite_core::{BackupJob, GlobalSettings, ScheduleParseError, ScheduleSpec};
use backsuite_events::{EventBus, EventSender};

/// Receives due jobs.
pub trait TriggerSink: Send + Sync {
    fn fire(&self, job: &BackupJob, settings: &GlobalSettings);
}

impl<S> TriggerSink for Arc<S>
where
    S: TriggerSink + ?Sized,
{
    fn fire(&self, job: &BackupJob, settings: &GlobalSettings) {
        (**self).fire(job, settings)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due triggers are checked.
    pub tick: Duration,
    /// Maximum lateness at which a firing still runs.
    pub misfire_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            misfire_grace: Duration::from_secs(3600),
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }
}

/// Why a job got no trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unarmed {
    Disabled,
    Manual,
    Invalid(ScheduleParseError),
    /// The expression parsed but yields no future firing.
    NoNextFire,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed { next_fire: DateTime<Local> },
    Unarmed(Unarmed),
}

impl ArmOutcome {
    pub fn is_armed(&self) -> bool {
        matches!(self, ArmOutcome::Armed { .. })
    }
}

#[derive(Debug)]
struct Trigger {
    job: BackupJob,
    spec: ScheduleSpec,
    next_fire: DateTime<Local>,
}

#[derive(Debug, Default)]
struct Triggers {
    by_job: BTreeMap<String, Trigger>,
    settings: GlobalSettings,
}

struct Shared {
    sink: Arc<dyn TriggerSink>,
    events: EventSender,
    misfire_grace: chrono::Duration,
    triggers: Mutex<Triggers>,
}

impl Shared {
    fn triggers(&self) -> MutexGuard<'_, Triggers> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick_at(&self, now: DateTime<Local>) -> usize {
        let mut due = Vec::new();
        let mut missed = Vec::new();
        let settings = {
            let mut triggers = self.triggers();
            let mut exhausted = Vec::new();
            for (name, trigger) in triggers.by_job.iter_mut() {
                if trigger.next_fire > now {
                    continue;
                }
                let next = if now - trigger.next_fire <= self.misfire_grace {
                    due.push(trigger.job.clone());
                    trigger.spec.next_after_firing(&trigger.next_fire, &now)
                } else {
                    missed.push((name.clone(), trigger.next_fire));
                    trigger.spec.next_after(&now)
                };
                match next {
                    Some(next) => trigger.next_fire = next,
                    None => exhausted.push(name.clone()),
                }
            }
            for name in exhausted {
                triggers.by_job.remove(&name);
            }
            triggers.settings.clone()
        };

        for (name, scheduled) in missed {
            self.events.log(format!(
                "SCHEDULER: Missed run of '{name}' scheduled for {}; skipping.",
                scheduled.format("%Y-%m-%d %H:%M:%S")
            ));
            warn!(job = %name, %scheduled, "misfire beyond grace; dropped");
        }
        for job in &due {
            debug!(job = %job.name, "trigger due");
            self.sink.fire(job, &settings);
        }
        due.len()
    }
}

struct Worker {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

/// Recurring trigger table plus the thread that drives it.
pub struct Scheduler {
    shared: Arc<Shared>,
    tick: Duration,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(sink: Arc<dyn TriggerSink>, events: EventSender, config: SchedulerConfig) -> Self {
        let misfire_grace =
            chrono::Duration::from_std(config.misfire_grace).unwrap_or_else(|_| chrono::Duration::seconds(3600));
        Self {
            shared: Arc::new(Shared {
                sink,
                events,
                misfire_grace,
                triggers: Mutex::new(Triggers::default()),
            }),
            tick: config.tick,
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background thread. Starting twice is a no-op.
    pub fn start(&self) -> io::Result<()> {
        let mut worker = self.worker();
        if worker.is_some() {
            return Ok(());
        }
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let tick = self.tick;
        let join = thread::Builder::new()
            .name("backsuite-scheduler".to_string())
            .spawn(move || {
                info!("scheduler started");
                loop {
                    match shutdown_rx.recv_timeout(tick) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            shared.tick_at(Local::now());
                        }
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("scheduler stopped");
            })?;
        *worker = Some(Worker {
            shutdown: shutdown_tx,
            join: Some(join),
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker().is_some()
    }

    /// Stop the background thread and wait for it. Armed triggers are kept.
    pub fn shutdown(&self) {
        let worker = self.worker().take();
        if let Some(mut worker) = worker {
            let _ = worker.shutdown.send(());
            if let Some(j) = worker.join.take() {
                let _ = j.join();
            }
        }
    }

    /// (Re)arm a job's trigger, computed from the current time.
    pub fn arm(&self, job: &BackupJob) -> ArmOutcome {
        self.arm_at(job, Local::now())
    }

    /// (Re)arm a job's trigger as if the current time were `now`.
    ///
    /// Any existing trigger for the job is replaced. The stored job is a
    /// snapshot: edits are only seen after re-arming.
    pub fn arm_at(&self, job: &BackupJob, now: DateTime<Local>) -> ArmOutcome {
        let mut triggers = self.shared.triggers();
        triggers.by_job.remove(&job.name);

        if !job.enabled {
            return ArmOutcome::Unarmed(Unarmed::Disabled);
        }
        let spec = match job.schedule_spec() {
            Ok(spec) => spec,
            Err(err) => {
                self.warn_no_trigger(job);
                return ArmOutcome::Unarmed(Unarmed::Invalid(err));
            }
        };
        if spec.is_manual() {
            return ArmOutcome::Unarmed(Unarmed::Manual);
        }
        let Some(next_fire) = spec.next_after(&now) else {
            self.warn_no_trigger(job);
            return ArmOutcome::Unarmed(Unarmed::NoNextFire);
        };

        triggers.by_job.insert(
            job.name.clone(),
            Trigger {
                job: job.clone(),
                spec,
                next_fire,
            },
        );
        drop(triggers);
        self.shared.events.log(format!("Job '{}' scheduled.", job.name));
        debug!(job = %job.name, %spec, %next_fire, "trigger armed");
        ArmOutcome::Armed { next_fire }
    }

    fn warn_no_trigger(&self, job: &BackupJob) {
        self.shared.events.log(format!(
            "WARNING: No valid trigger for '{}', schedule '{}'.",
            job.name, job.schedule
        ));
    }

    /// Remove a job's trigger. Returns whether one existed.
    pub fn disarm(&self, job_name: &str) -> bool {
        self.shared.triggers().by_job.remove(job_name).is_some()
    }

    /// Replace every trigger with those derived from `jobs`.
    pub fn reload(&self, jobs: &[BackupJob], settings: GlobalSettings) -> Vec<(String, ArmOutcome)> {
        self.reload_at(jobs, settings, Local::now())
    }

    pub fn reload_at(
        &self,
        jobs: &[BackupJob],
        settings: GlobalSettings,
        now: DateTime<Local>,
    ) -> Vec<(String, ArmOutcome)> {
        self.shared.events.log("Loading jobs into scheduler...");
        {
            let mut triggers = self.shared.triggers();
            triggers.by_job.clear();
            triggers.settings = settings;
        }
        jobs.iter()
            .map(|job| (job.name.clone(), self.arm_at(job, now)))
            .collect()
    }

    /// Settings handed to the sink with every firing.
    pub fn update_settings(&self, settings: GlobalSettings) {
        self.shared.triggers().settings = settings;
    }

    /// Names of jobs with an armed trigger, sorted.
    pub fn armed_jobs(&self) -> Vec<String> {
        self.shared.triggers().by_job.keys().cloned().collect()
    }

    pub fn next_fire(&self, job_name: &str) -> Option<DateTime<Local>> {
        self.shared.triggers().by_job.get(job_name).map(|t| t.next_fire)
    }

    /// Fire everything due at `now`. Returns how many jobs were handed to the sink.
    pub fn tick_at(&self, now: DateTime<Local>) -> usize {
        self.shared.tick_at(now)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use backsuite_events::{BackupEvent, EventReceiver};
    use chrono::TimeZone;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        fired: Mutex<Vec<(String, u32)>>,
    }

    impl RecordingSink {
        fn fired(&self) -> Vec<(String, u32)> {
            self.fired.lock().unwrap().clone()
        }
    }

    impl TriggerSink for RecordingSink {
        fn fire(&self, job: &BackupJob, settings: &GlobalSettings) {
            self.fired
                .lock()
                .unwrap()
                .push((job.name.clone(), settings.default_retention_count));
        }
    }

    fn scheduler() -> (Scheduler, Arc<RecordingSink>, EventReceiver) {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = backsuite_events::channel();
        let scheduler = Scheduler::new(sink.clone(), tx, SchedulerConfig::default());
        (scheduler, sink, rx)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 5, h, m, s).single().unwrap()
    }

    fn logs(rx: &EventReceiver) -> Vec<String> {
        rx.drain()
            .into_iter()
            .filter_map(|e| match e {
                BackupEvent::Log(l) => Some(l.message),
                _ => None,
            })
            .collect()
    }

    fn job(name: &str, schedule: &str) -> BackupJob {
        BackupJob::new(name, "/src", "/dest").with_schedule(schedule)
    }

    #[test]
    fn daily_trigger_fires_once_and_rearms_for_next_day() {
        let (scheduler, sink, rx) = scheduler();
        let outcome = scheduler.arm_at(&job("Docs", "daily@09:00"), at(8, 0, 0));

        assert_eq!(outcome, ArmOutcome::Armed { next_fire: at(9, 0, 0) });
        assert_eq!(logs(&rx), vec!["Job 'Docs' scheduled.".to_string()]);

        assert_eq!(scheduler.tick_at(at(8, 59, 59)), 0);
        assert_eq!(scheduler.tick_at(at(9, 0, 1)), 1);
        assert_eq!(sink.fired(), vec![("Docs".to_string(), 3)]);
        assert_eq!(
            scheduler.next_fire("Docs"),
            Local.with_ymd_and_hms(2024, 1, 6, 9, 0, 0).single()
        );
        assert_eq!(scheduler.tick_at(at(9, 0, 2)), 0);
    }

    #[test]
    fn interval_rearm_does_not_drift_with_late_ticks() {
        let (scheduler, sink, _rx) = scheduler();
        scheduler.arm_at(&job("Sync", "interval@10"), at(8, 0, 0));
        assert_eq!(scheduler.next_fire("Sync"), Some(at(8, 10, 0)));

        let late_tick = at(8, 10, 0) + chrono::Duration::milliseconds(400);
        assert_eq!(scheduler.tick_at(late_tick), 1);
        assert_eq!(scheduler.next_fire("Sync"), Some(at(8, 20, 0)));

        let later_tick = at(8, 20, 0) + chrono::Duration::milliseconds(450);
        assert_eq!(scheduler.tick_at(later_tick), 1);
        assert_eq!(scheduler.next_fire("Sync"), Some(at(8, 30, 0)));
        assert_eq!(sink.fired().len(), 2);
    }

    #[test]
    fn missed_interval_rearms_from_now() {
        let (scheduler, sink, _rx) = scheduler();
        scheduler.arm_at(&job("Sync", "interval@10"), at(8, 0, 0));

        assert_eq!(scheduler.tick_at(at(10, 0, 30)), 0);
        assert!(sink.fired().is_empty());
        assert_eq!(scheduler.next_fire("Sync"), Some(at(10, 10, 30)));
    }

    #[test]
    fn misfire_beyond_grace_is_dropped() {
        let (scheduler, sink, rx) = scheduler();
        scheduler.arm_at(&job("Docs", "daily@09:00"), at(8, 0, 0));
        logs(&rx);

        assert_eq!(scheduler.tick_at(at(10, 0, 1)), 0);
        assert!(sink.fired().is_empty());
        assert!(logs(&rx)[0].starts_with("SCHEDULER: Missed run of 'Docs'"));
        assert!(scheduler.next_fire("Docs").is_some());
    }

    #[test]
    fn late_firing_within_grace_still_runs() {
        let (scheduler, sink, _rx) = scheduler();
        scheduler.arm_at(&job("Docs", "daily@09:00"), at(8, 0, 0));

        assert_eq!(scheduler.tick_at(at(9, 59, 0)), 1);
        assert_eq!(sink.fired().len(), 1);
    }

    #[test]
    fn unarmable_jobs_report_why() {
        let (scheduler, _sink, rx) = scheduler();

        assert_eq!(
            scheduler.arm_at(&job("A", "manual"), at(8, 0, 0)),
            ArmOutcome::Unarmed(Unarmed::Manual)
        );
        assert_eq!(
            scheduler.arm_at(&job("B", "daily@09:00").with_enabled(false), at(8, 0, 0)),
            ArmOutcome::Unarmed(Unarmed::Disabled)
        );
        assert!(matches!(
            scheduler.arm_at(&job("C", "hourly"), at(8, 0, 0)),
            ArmOutcome::Unarmed(Unarmed::Invalid(_))
        ));
        assert!(scheduler.armed_jobs().is_empty());
        assert_eq!(
            logs(&rx),
            vec!["WARNING: No valid trigger for 'C', schedule 'hourly'.".to_string()]
        );
    }

    #[test]
    fn reload_replaces_triggers_and_settings() {
        let (scheduler, sink, _rx) = scheduler();
        scheduler.arm_at(&job("Old", "interval@5"), at(8, 0, 0));

        let outcomes = scheduler.reload_at(
            &[job("Docs", "interval@10"), job("Pics", "manual")],
            GlobalSettings::new(7),
            at(8, 0, 0),
        );

        assert!(outcomes[0].1.is_armed());
        assert!(!outcomes[1].1.is_armed());
        assert_eq!(scheduler.armed_jobs(), vec!["Docs".to_string()]);

        scheduler.tick_at(at(8, 10, 0));
        assert_eq!(sink.fired(), vec![("Docs".to_string(), 7)]);
        assert_eq!(scheduler.next_fire("Docs"), Some(at(8, 20, 0)));
    }

    #[test]
    fn disarm_removes_trigger() {
        let (scheduler, _sink, _rx) = scheduler();
        scheduler.arm_at(&job("Docs", "interval@10"), at(8, 0, 0));

        assert!(scheduler.disarm("Docs"));
        assert!(!scheduler.disarm("Docs"));
        assert_eq!(scheduler.tick_at(at(9, 0, 0)), 0);
    }

    #[test]
    fn background_thread_fires_due_triggers() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, _rx) = backsuite_events::channel();
        let scheduler = Scheduler::new(
            sink.clone(),
            tx,
            SchedulerConfig::default().with_tick(Duration::from_millis(10)),
        );
        // Armed a minute in the past, so the first tick finds it due.
        scheduler.arm_at(&job("Docs", "interval@1"), Local::now() - chrono::Duration::seconds(61));
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.fired().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        scheduler.shutdown();

        assert_eq!(sink.fired().len(), 1);
        assert!(!scheduler.is_running());
    }
}
