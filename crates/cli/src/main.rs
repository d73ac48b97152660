//! `backsuite` - scheduled directory backups driven by external sync and
//! archive tools.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};

use backsuite_engine::{ArchiveTool, EngineConfig, SyncTool};
use backsuite_observability::{LogConfig, LogFormat};

mod commands;
mod config;
mod render;

use config::{ConfigStore, DEFAULT_CONFIG_PATH, LoadSource};

/// Scheduled backups: mirror, compress, rotate.
#[derive(Parser)]
#[command(name = "backsuite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(short, long, env = "BACKSUITE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Append diagnostic logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit diagnostic logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Mirroring tool (robocopy, rsync)
    #[arg(long)]
    sync_tool: Option<SyncTool>,

    /// Compression tool (powershell, zip, tar)
    #[arg(long)]
    archive_tool: Option<ArchiveTool>,

    /// Path to the mirroring executable
    #[arg(long)]
    sync_program: Option<PathBuf>,

    /// Path to the compression executable
    #[arg(long)]
    archive_program: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured jobs
    #[command(alias = "ls")]
    List,

    /// Run one job now and wait for it
    Run {
        /// Job name
        job: String,
    },

    /// Run every enabled job now
    RunAll,

    /// Arm the scheduler and run jobs as they come due
    Daemon {
        /// Do not read commands from stdin; run until killed
        #[arg(long)]
        ignore_stdin: bool,
    },

    /// Validate schedules and show next firing times
    Check,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        // Console output already shows the event stream; keep stderr quiet.
        let filter = if self.log_file.is_some() { "info" } else { "warn" };
        let mut config = LogConfig::default()
            .with_format(if self.json_logs { LogFormat::Json } else { LogFormat::Human })
            .with_default_filter(filter);
        if let Some(path) = &self.log_file {
            config = config.with_log_file(path);
        }
        config
    }

    fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::default();
        if let Some(tool) = self.sync_tool {
            engine = engine.with_sync_tool(tool);
        }
        if let Some(tool) = self.archive_tool {
            engine = engine.with_archive_tool(tool);
        }
        if let Some(program) = &self.sync_program {
            engine = engine.with_sync_program(program);
        }
        if let Some(program) = &self.archive_program {
            engine = engine.with_archive_program(program);
        }
        engine
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<bool> {
    backsuite_observability::init(&cli.log_config()).context("initializing logging")?;
    tracing::info!(config = %cli.config.display(), "backsuite starting");

    let store = ConfigStore::new(&cli.config);
    let (config, source) = store.load()?;
    match &source {
        LoadSource::File => {}
        LoadSource::Created => eprintln!("Created default settings at {}", store.path().display()),
        LoadSource::Recovered { backup } => eprintln!(
            "Settings file was unreadable; moved to {} and replaced with defaults",
            backup.display()
        ),
    }

    let engine = cli.engine_config();
    // The trailing pause only matters to a long-running status display.
    let one_shot = engine.clone().with_idle_delay(Duration::ZERO);

    match cli.command {
        Commands::List => {
            for line in commands::list(&config) {
                println!("{line}");
            }
            Ok(true)
        }
        Commands::Check => {
            let (lines, invalid) = commands::check(&config, Local::now());
            for line in lines {
                println!("{line}");
            }
            Ok(invalid == 0)
        }
        Commands::Run { job } => commands::with_service(config, &one_shot, |service| commands::run_job(service, &job)),
        Commands::RunAll => commands::with_service(config, &one_shot, commands::run_all),
        Commands::Daemon { ignore_stdin } => {
            commands::with_service(config, &engine, |service| commands::daemon(service, ignore_stdin))
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_tools_and_subcommand() {
        let cli = Cli::try_parse_from([
            "backsuite",
            "--config",
            "cfg.json",
            "--sync-tool",
            "rsync",
            "--archive-tool",
            "tar",
            "run",
            "Docs",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("cfg.json"));
        assert!(matches!(cli.command, Commands::Run { ref job } if job == "Docs"));
        let engine = cli.engine_config();
        assert_eq!(engine.sync_tool, SyncTool::Rsync);
        assert_eq!(engine.archive_tool, ArchiveTool::TarGz);
    }

    #[test]
    fn log_file_raises_default_verbosity() {
        let cli = Cli::try_parse_from(["backsuite", "--log-file", "out.log", "--json-logs", "list"]).unwrap();
        let log = cli.log_config();

        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.default_filter, "info");
        assert_eq!(log.log_file, Some(PathBuf::from("out.log")));
    }
}
