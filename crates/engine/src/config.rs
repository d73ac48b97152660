//! Engine runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::adapters::sync::DEFAULT_READER_JOIN_TIMEOUT;
use crate::adapters::{ArchiveTool, ExternalArchive, ExternalSync, SyncTool};
use crate::scheduler::SchedulerConfig;

/// Tunables for the engine. Defaults match interactive desktop use.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sync_tool: SyncTool,
    /// Executable overriding the sync tool's default program name.
    pub sync_program: Option<PathBuf>,
    pub archive_tool: ArchiveTool,
    pub archive_program: Option<PathBuf>,
    /// Bound on waiting for the sync output reader after the tool exits.
    pub reader_join_timeout: Duration,
    /// Pause between a run's terminal status and the Idle reset.
    pub idle_delay: Duration,
    /// How often the scheduler checks for due triggers.
    pub scheduler_tick: Duration,
    /// Firings later than this are dropped instead of run.
    pub misfire_grace: Duration,
    /// Consumer drain cadence.
    pub event_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_tool: SyncTool::platform_default(),
            sync_program: None,
            archive_tool: ArchiveTool::platform_default(),
            archive_program: None,
            reader_join_timeout: DEFAULT_READER_JOIN_TIMEOUT,
            idle_delay: Duration::from_secs(2),
            scheduler_tick: Duration::from_millis(500),
            misfire_grace: Duration::from_secs(3600),
            event_poll_interval: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    /// Process-backed sync adapter for the configured tool.
    pub fn sync_adapter(&self) -> ExternalSync {
        let sync = ExternalSync::new(self.sync_tool).with_reader_join_timeout(self.reader_join_timeout);
        match &self.sync_program {
            Some(program) => sync.with_program(program),
            None => sync,
        }
    }

    pub fn archive_adapter(&self) -> ExternalArchive {
        let archive = ExternalArchive::new(self.archive_tool);
        match &self.archive_program {
            Some(program) => archive.with_program(program),
            None => archive,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: self.scheduler_tick,
            misfire_grace: self.misfire_grace,
        }
    }

    pub fn with_sync_tool(mut self, tool: SyncTool) -> Self {
        self.sync_tool = tool;
        self
    }

    pub fn with_sync_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.sync_program = Some(program.into());
        self
    }

    pub fn with_archive_tool(mut self, tool: ArchiveTool) -> Self {
        self.archive_tool = tool;
        self
    }

    pub fn with_archive_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.archive_program = Some(program.into());
        self
    }

    pub fn with_reader_join_timeout(mut self, timeout: Duration) -> Self {
        self.reader_join_timeout = timeout;
        self
    }

    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = grace;
        self
    }

    pub fn with_event_poll_interval(mut self, interval: Duration) -> Self {
        self.event_poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_desktop_timings() {
        let config = EngineConfig::default();
        assert_eq!(config.idle_delay, Duration::from_secs(2));
        assert_eq!(config.misfire_grace, Duration::from_secs(3600));
        assert_eq!(config.event_poll_interval, Duration::from_millis(100));
        assert_eq!(config.reader_join_timeout, Duration::from_secs(5));
    }

    #[test]
    fn adapters_follow_selected_tools() {
        let config = EngineConfig::default()
            .with_sync_tool(SyncTool::Rsync)
            .with_archive_tool(ArchiveTool::TarGz)
            .with_scheduler_tick(Duration::from_millis(50));

        assert_eq!(config.sync_adapter().tool(), SyncTool::Rsync);
        assert_eq!(config.archive_adapter().tool(), ArchiveTool::TarGz);
        assert_eq!(config.scheduler_config().tick, Duration::from_millis(50));
    }
}
