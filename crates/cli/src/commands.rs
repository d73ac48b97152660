//! Subcommand implementations.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use backsuite_core::{BackupJob, GlobalSettings};
use backsuite_engine::{BackupService, EngineConfig, RunHandle, RunOutcome};

use crate::config::ConfigFile;
use crate::render::ConsoleRenderer;

/// One line per job: name, state, schedule, retention, paths.
pub fn list(config: &ConfigFile) -> Vec<String> {
    if config.backup_jobs.is_empty() {
        return vec!["No backup jobs configured.".to_string()];
    }
    let width = config.backup_jobs.iter().map(|j| j.name.len()).max().unwrap_or(0);
    config
        .backup_jobs
        .iter()
        .map(|job| {
            format!(
                "{:width$}  {:8}  {:20}  {:12}  {} -> {}",
                job.name,
                if job.enabled { "enabled" } else { "disabled" },
                job.schedule,
                retention_label(job, &config.global_settings),
                job.source_dir.display(),
                job.destination_base.display(),
            )
        })
        .collect()
}

fn retention_label(job: &BackupJob, settings: &GlobalSettings) -> String {
    let keep = job.effective_retention(settings);
    if job.has_retention_override() {
        format!("keep {keep}")
    } else {
        format!("keep {keep} (global)")
    }
}

/// Parse every schedule and report its next firing after `now`.
///
/// Returns the report lines and the number of unparseable schedules.
pub fn check(config: &ConfigFile, now: DateTime<Local>) -> (Vec<String>, usize) {
    let mut invalid = 0;
    let lines = config
        .backup_jobs
        .iter()
        .map(|job| {
            let verdict = match job.schedule_spec() {
                Err(err) => {
                    invalid += 1;
                    format!("INVALID ({err})")
                }
                Ok(spec) if spec.is_manual() => "manual".to_string(),
                Ok(spec) => match spec.next_after(&now) {
                    Some(next) if job.enabled => format!("{spec}, next {}", next.format("%Y-%m-%d %H:%M")),
                    Some(_) => format!("{spec}, not armed (disabled)"),
                    None => format!("{spec}, never fires"),
                },
            };
            format!("{}: {verdict}", job.name)
        })
        .collect();
    (lines, invalid)
}

/// Build a service over `config`, render its events to stdout while `body`
/// runs, then shut everything down.
pub fn with_service<T>(
    config: ConfigFile,
    engine: &EngineConfig,
    body: impl FnOnce(&BackupService) -> Result<T>,
) -> Result<T> {
    let registry = Arc::new(config.into_registry().context("invalid job configuration")?);
    let (events, receiver) = backsuite_events::channel();
    let mut renderer = ConsoleRenderer::new();
    let poller = receiver
        .spawn_poller("backsuite-console", engine.event_poll_interval, move |event| {
            if let Some(line) = renderer.render(&event) {
                println!("{line}");
            }
        })
        .context("starting console renderer")?;

    let service = BackupService::with_external_tools(registry, events, engine);
    let result = body(&service);
    service.shutdown();
    poller.shutdown();
    result
}

fn settled(outcome: &RunOutcome) -> bool {
    matches!(outcome, RunOutcome::Succeeded(_) | RunOutcome::Skipped { .. })
}

/// Run one job and wait for it. `Ok(false)` when the run failed.
pub fn run_job(service: &BackupService, name: &str) -> Result<bool> {
    let handle = service.submit(name)?;
    Ok(settled(&handle.wait()))
}

/// Run every enabled job concurrently and wait for all of them.
pub fn run_all(service: &BackupService) -> Result<bool> {
    let mut ok = true;
    let handles: Vec<RunHandle> = service
        .run_all()
        .into_iter()
        .filter_map(|submitted| match submitted {
            Ok(handle) => Some(handle),
            Err(err) => {
                eprintln!("{err}");
                ok = false;
                None
            }
        })
        .collect();
    for handle in handles {
        ok &= settled(&handle.wait());
    }
    Ok(ok)
}

/// Arm the scheduler and keep running.
///
/// Reads commands from stdin (`run <job>`, `run-all`, `quit`) until `quit` or
/// end of input. With `ignore_stdin` it runs until the process is killed.
pub fn daemon(service: &BackupService, ignore_stdin: bool) -> Result<bool> {
    service.start()?;
    let armed = service.scheduler().armed_jobs();
    println!("Scheduler running with {} armed job(s): {}", armed.len(), armed.join(", "));

    if ignore_stdin {
        loop {
            thread::park();
        }
    }

    println!("Commands: run <job>, run-all, quit");
    let mut submitted_runs: Vec<RunHandle> = Vec::new();
    for line in io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        match line.trim().split_once(' ').unwrap_or((line.trim(), "")) {
            ("quit" | "exit" | "q", _) => break,
            ("run", name) if !name.trim().is_empty() => match service.submit(name.trim()) {
                Ok(handle) => submitted_runs.push(handle),
                Err(err) => eprintln!("{err}"),
            },
            ("run-all", _) => {
                for submitted in service.run_all() {
                    match submitted {
                        Ok(handle) => submitted_runs.push(handle),
                        Err(err) => eprintln!("{err}"),
                    }
                }
            }
            ("", _) => {}
            (other, _) => eprintln!("unknown command '{other}'"),
        }
        submitted_runs.retain(|h| !h.is_finished());
    }

    if !submitted_runs.is_empty() {
        println!("Waiting for {} running backup(s)...", submitted_runs.len());
        for handle in &submitted_runs {
            handle.wait();
        }
    }
    Ok(true)
}
