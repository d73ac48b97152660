//! Single-file compression through an external tool.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use backsuite_events::{EventBus, EventSender};

use super::process::{hide_console, render};
use super::{ArchiveAdapter, ArchiveError, ArchiveReport, ArchiveRequest};

/// Supported compression tools.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveTool {
    /// `Compress-Archive` through `powershell`, producing `.zip`.
    PowerShell,
    /// Info-ZIP `zip -r -q`, producing `.zip`.
    Zip,
    /// `tar -czf`, producing `.tar.gz`.
    TarGz,
}

impl ArchiveTool {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            ArchiveTool::PowerShell
        } else {
            ArchiveTool::TarGz
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            ArchiveTool::PowerShell => "powershell",
            ArchiveTool::Zip => "zip",
            ArchiveTool::TarGz => "tar",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveTool::PowerShell | ArchiveTool::Zip => "zip",
            ArchiveTool::TarGz => "tar.gz",
        }
    }

    fn configure(&self, command: &mut Command, staging: &Path, archive: &Path) {
        match self {
            ArchiveTool::PowerShell => {
                let script = format!(
                    "Compress-Archive -Path '{}' -DestinationPath '{}' -Force -ErrorAction SilentlyContinue",
                    ps_quote(&staging.join("*")),
                    ps_quote(archive)
                );
                command.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"]);
                command.arg(script);
            }
            ArchiveTool::Zip => {
                command.args(["-r", "-q"]).arg(archive).arg(".").current_dir(staging);
            }
            ArchiveTool::TarGz => {
                command.arg("-czf").arg(archive).arg("-C").arg(staging).arg(".");
            }
        }
    }
}

/// Escape a path for a single-quoted PowerShell string.
fn ps_quote(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

impl FromStr for ArchiveTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "powershell" => Ok(ArchiveTool::PowerShell),
            "zip" => Ok(ArchiveTool::Zip),
            "tar" | "targz" | "tar.gz" => Ok(ArchiveTool::TarGz),
            other => Err(format!("unknown archive tool '{other}'")),
        }
    }
}

/// [`ArchiveAdapter`] that launches an [`ArchiveTool`] as a child process.
#[derive(Debug, Clone)]
pub struct ExternalArchive {
    tool: ArchiveTool,
    program: PathBuf,
}

impl ExternalArchive {
    pub fn new(tool: ArchiveTool) -> Self {
        Self {
            tool,
            program: PathBuf::from(tool.program()),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn tool(&self) -> ArchiveTool {
        self.tool
    }
}

impl Default for ExternalArchive {
    fn default() -> Self {
        Self::new(ArchiveTool::platform_default())
    }
}

impl ArchiveAdapter for ExternalArchive {
    fn extension(&self) -> &str {
        self.tool.extension()
    }

    fn archive(&self, request: &ArchiveRequest<'_>, events: &EventSender) -> Result<ArchiveReport, ArchiveError> {
        let job = request.job_name;
        let tool_name = self.program.display().to_string();
        events.log(format!("[{job}] Starting Zipping Process..."));
        events.log(format!("[{job}]   Source: {}", request.staging.display()));
        events.log(format!("[{job}]   Archive File: {}", request.archive.display()));

        // The zip tool runs inside the staging directory.
        let archive = std::path::absolute(request.archive).map_err(|source| ArchiveError::Io {
            tool: tool_name.clone(),
            source,
        })?;

        match fs::remove_file(&archive) {
            Ok(()) => events.log(format!("[{job}]   Replacing existing archive.")),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ArchiveError::Replace {
                    path: archive,
                    source,
                });
            }
        }

        let mut command = Command::new(&self.program);
        self.tool.configure(&mut command, request.staging, &archive);
        command.stdin(Stdio::null());
        hide_console(&mut command);
        events.log(format!("[{job}]   Executing: {}", render(&command)));

        let output = match command.output() {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                events.log(format!("[{job}] CRITICAL ERROR: {tool_name} not found."));
                return Err(ArchiveError::ToolMissing { tool: tool_name });
            }
            Err(source) => {
                events.log(format!("[{job}] CRITICAL ERROR during archiving: {source}"));
                return Err(ArchiveError::Io {
                    tool: tool_name,
                    source,
                });
            }
        };

        let code = output.status.code();
        events.log(format!(
            "[{job}]   {} Exit Code: {}",
            self.tool.program(),
            code.map_or_else(|| "none".to_string(), |c| c.to_string())
        ));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            events.log(format!("[{job}]   {} StdErr: {}", self.tool.program(), stderr.trim()));
        }
        debug!(job, ?code, "archive tool finished");

        classify(job, &tool_name, code, &archive, events).map(|bytes| ArchiveReport {
            path: archive.clone(),
            bytes,
        })
    }
}

/// Success needs a zero exit, an existing output file, and a nonzero size.
fn classify(
    job: &str,
    tool: &str,
    code: Option<i32>,
    archive: &Path,
    events: &EventSender,
) -> Result<u64, ArchiveError> {
    if code != Some(0) {
        events.log(format!("[{job}] ERROR: archiving failed (Code {code:?})."));
        return Err(ArchiveError::BadExit {
            tool: tool.to_string(),
            code,
        });
    }
    match fs::metadata(archive) {
        Ok(meta) if meta.len() > 0 => {
            events.log(format!("[{job}] SUCCESS: Archive created."));
            Ok(meta.len())
        }
        Ok(_) => {
            events.log(format!("[{job}] WARNING: Archive created but is empty!"));
            Err(ArchiveError::Empty {
                path: archive.to_path_buf(),
            })
        }
        Err(_) => {
            events.log(format!("[{job}] CRITICAL ERROR: Archive missing after a successful exit!"));
            Err(ArchiveError::Missing {
                path: archive.to_path_buf(),
            })
        }
    }
}
