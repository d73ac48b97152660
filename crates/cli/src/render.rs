//! Console presentation of the event stream.

use backsuite_core::{PipelineStep, TOTAL_STEPS};
use backsuite_events::{BackupEvent, StatusUpdate};

/// Folds events into printable lines, the way a status bar would show them.
///
/// Log lines are always printed. Status and file-progress events become a
/// `Status: ...` line, printed only when it differs from the previous one.
#[derive(Debug, Default)]
pub struct ConsoleRenderer {
    last_status: Option<String>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, event: &BackupEvent) -> Option<String> {
        match event {
            BackupEvent::Log(line) => Some(format!("[{}] {}", line.at.format("%H:%M:%S"), line.message)),
            BackupEvent::Status(status) => self.status_line(status_text(status)),
            BackupEvent::FileProgress(progress) => self.status_line(format!(
                "Status: [{}] {}/{} - Copying: {}",
                progress.job_name,
                PipelineStep::Copying.number(),
                TOTAL_STEPS,
                progress.file
            )),
        }
    }

    fn status_line(&mut self, line: String) -> Option<String> {
        if self.last_status.as_deref() == Some(line.as_str()) {
            return None;
        }
        self.last_status = Some(line.clone());
        Some(line)
    }
}

fn status_text(status: &StatusUpdate) -> String {
    if status.is_reset() {
        "Status: Idle".to_string()
    } else {
        format!(
            "Status: [{}] {}/{} - {}",
            status.job_name, status.step, status.total_steps, status.message
        )
    }
}
