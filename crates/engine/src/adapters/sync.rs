//! Directory mirroring through an external tool.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use backsuite_events::{EventBus, EventSender};

use super::process::{LineReader, hide_console, render};
use super::{SyncAdapter, SyncError, SyncReport, SyncRequest};

pub const DEFAULT_READER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Supported mirroring tools.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTool {
    /// `robocopy SRC DST /E /COPY:DAT /R:1 /W:1 /BYTES [/XD name]...`
    Robocopy,
    /// `rsync -a --out-format=%n [--exclude=name]... SRC/ DST`
    Rsync,
}

impl SyncTool {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            SyncTool::Robocopy
        } else {
            SyncTool::Rsync
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            SyncTool::Robocopy => "robocopy",
            SyncTool::Rsync => "rsync",
        }
    }

    pub fn args(&self, request: &SyncRequest<'_>) -> Vec<OsString> {
        match self {
            SyncTool::Robocopy => {
                let mut args: Vec<OsString> = vec![
                    request.source.into(),
                    request.staging.into(),
                    "/E".into(),
                    "/COPY:DAT".into(),
                    "/R:1".into(),
                    "/W:1".into(),
                    "/BYTES".into(),
                ];
                for exclusion in request.exclusions {
                    args.push("/XD".into());
                    args.push(exclusion.into());
                }
                args
            }
            SyncTool::Rsync => {
                let mut args: Vec<OsString> = vec!["-a".into(), "--out-format=%n".into()];
                for exclusion in request.exclusions {
                    args.push(format!("--exclude={exclusion}").into());
                }
                // Trailing slash: copy the contents, not the directory itself.
                let mut source = request.source.as_os_str().to_owned();
                source.push("/");
                args.push(source);
                args.push(request.staging.into());
                args
            }
        }
    }

    /// Exit codes that mean "copied, possibly with informational conditions".
    pub fn is_success(&self, code: Option<i32>) -> bool {
        match (self, code) {
            (SyncTool::Robocopy, Some(c)) => (0..=1).contains(&c),
            // 24: source files vanished during the transfer.
            (SyncTool::Rsync, Some(c)) => c == 0 || c == 24,
            (_, None) => false,
        }
    }

    /// File entry named by one line of tool output, if the line reports one.
    pub fn progress_entry(&self, line: &str) -> Option<String> {
        match self {
            SyncTool::Robocopy => {
                let indented = line.starts_with(['\t', ' ']);
                if !indented || !line.contains('\t') {
                    return None;
                }
                let entry = line.split('\t').rev().map(str::trim).find(|p| !p.is_empty())?;
                if entry.ends_with('\\') || entry.ends_with('/') || entry.parse::<u64>().is_ok() {
                    return None;
                }
                Some(entry.to_string())
            }
            SyncTool::Rsync => {
                let entry = line.trim();
                if entry.is_empty() || entry.ends_with('/') || entry.starts_with("rsync:") {
                    return None;
                }
                Some(entry.to_string())
            }
        }
    }
}

impl FromStr for SyncTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "robocopy" => Ok(SyncTool::Robocopy),
            "rsync" => Ok(SyncTool::Rsync),
            other => Err(format!("unknown sync tool '{other}'")),
        }
    }
}

/// [`SyncAdapter`] that launches a [`SyncTool`] as a child process.
#[derive(Debug, Clone)]
pub struct ExternalSync {
    tool: SyncTool,
    program: PathBuf,
    reader_join_timeout: Duration,
}

impl ExternalSync {
    pub fn new(tool: SyncTool) -> Self {
        Self {
            tool,
            program: PathBuf::from(tool.program()),
            reader_join_timeout: DEFAULT_READER_JOIN_TIMEOUT,
        }
    }

    /// Use a specific executable instead of looking the tool up on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_reader_join_timeout(mut self, timeout: Duration) -> Self {
        self.reader_join_timeout = timeout;
        self
    }

    pub fn tool(&self) -> SyncTool {
        self.tool
    }

    fn command(&self, request: &SyncRequest<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.tool.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        hide_console(&mut command);
        command
    }
}

impl Default for ExternalSync {
    fn default() -> Self {
        Self::new(SyncTool::platform_default())
    }
}

impl SyncAdapter for ExternalSync {
    fn sync(&self, request: &SyncRequest<'_>, events: &EventSender) -> Result<SyncReport, SyncError> {
        let job = request.job_name;
        let tool_name = self.program.display().to_string();
        events.log(format!("[{job}] Starting {}...", self.tool.program()));

        let mut command = self.command(request);
        events.log(format!("[{job}]   Executing: {}", render(&command)));

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                events.log(format!("[{job}] CRITICAL ERROR: {tool_name} not found."));
                return Err(SyncError::ToolMissing { tool: tool_name });
            }
            Err(err) => {
                events.log(format!("[{job}] CRITICAL ERROR launching {tool_name}: {err}"));
                return Err(SyncError::Io {
                    tool: tool_name,
                    source: err,
                });
            }
        };

        let files = Arc::new(AtomicUsize::new(0));
        let mut readers = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            let tool = self.tool;
            let sink = events.clone();
            let counter = files.clone();
            let name = job.to_string();
            match LineReader::spawn(format!("sync-read-{job}"), stdout, move |line| {
                if let Some(entry) = tool.progress_entry(line) {
                    counter.fetch_add(1, Ordering::Relaxed);
                    sink.file_progress(&name, entry);
                }
            }) {
                Ok(reader) => readers.push(reader),
                Err(err) => warn!(job, error = %err, "could not start output reader"),
            }
        }

        if let Some(stderr) = child.stderr.take() {
            let sink = events.clone();
            let name = job.to_string();
            match LineReader::spawn(format!("sync-err-{job}"), stderr, move |line| {
                let line = line.trim();
                if !line.is_empty() {
                    sink.log(format!("[{name}]   {line}"));
                }
            }) {
                Ok(reader) => readers.push(reader),
                Err(err) => warn!(job, error = %err, "could not start error reader"),
            }
        }

        let status = child.wait().map_err(|err| SyncError::Io {
            tool: tool_name.clone(),
            source: err,
        })?;

        let deadline = Instant::now() + self.reader_join_timeout;
        let mut all_joined = true;
        for reader in readers {
            all_joined &= reader.join_until(deadline);
        }
        if all_joined {
            events.log(format!("[{job}]   Output reader finished."));
        } else {
            events.log(format!(
                "[{job}]   WARNING: output reader did not finish within {:?}; continuing.",
                self.reader_join_timeout
            ));
        }

        let code = status.code();
        let files_reported = files.load(Ordering::Relaxed);
        events.log(format!(
            "[{job}]   {} finished with Exit Code: {}",
            self.tool.program(),
            code.map_or_else(|| "none".to_string(), |c| c.to_string())
        ));
        debug!(job, ?code, files_reported, "sync finished");

        if self.tool.is_success(code) {
            Ok(SyncReport {
                exit_code: code,
                files_reported,
            })
        } else {
            Err(SyncError::BadExit {
                tool: tool_name,
                code,
            })
        }
    }
}
