//! Run timestamps, pipeline steps and artifact naming.
//!
//! Archives are named `{job}_{YYYY-MM-DD_HH-MM-SS}.{ext}` and staging copies
//! `Temp_{job}_{YYYY-MM-DD_HH-MM-SS}`, both inside the job's destination base.
//! The timestamp sorts lexicographically in chronological order, which is what
//! retention relies on.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Number of reported pipeline steps (copy, archive, clean temp, rotate).
pub const TOTAL_STEPS: u8 = 4;

pub const STAGING_PREFIX: &str = "Temp_";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Second-resolution start time of a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTimestamp(NaiveDateTime);

impl RunTimestamp {
    /// Current local wall-clock time, truncated to seconds.
    pub fn now() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    pub fn from_datetime(at: NaiveDateTime) -> Self {
        use chrono::Timelike;
        Self(at.with_nanosecond(0).unwrap_or(at))
    }

    /// Parse the `YYYY-MM-DD_HH-MM-SS` form used in file names.
    pub fn parse(s: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok().map(Self)
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

/// File name of the archive produced by a run.
pub fn archive_file_name(job_name: &str, at: RunTimestamp, extension: &str) -> String {
    format!("{job_name}_{at}.{extension}")
}

/// Directory name of the staging copy used by a run.
pub fn staging_dir_name(job_name: &str, at: RunTimestamp) -> String {
    format!("{STAGING_PREFIX}{job_name}_{at}")
}

pub fn archive_path(destination: &Path, job_name: &str, at: RunTimestamp, extension: &str) -> PathBuf {
    destination.join(archive_file_name(job_name, at, extension))
}

pub fn staging_path(destination: &Path, job_name: &str, at: RunTimestamp) -> PathBuf {
    destination.join(staging_dir_name(job_name, at))
}

/// Whether `file_name` matches `{job_name}_*.{extension}`.
pub fn is_archive_of(file_name: &str, job_name: &str, extension: &str) -> bool {
    let Some(rest) = file_name
        .strip_prefix(job_name)
        .and_then(|r| r.strip_prefix('_'))
    else {
        return false;
    };
    rest.strip_suffix(extension)
        .and_then(|r| r.strip_suffix('.'))
        .is_some()
}

/// Whether `other_job`'s archives also match `job_name`'s rotation pattern.
///
/// True for `Docs` and `Docs_Old`: with a shared destination, rotating
/// `Docs` counts and may delete `Docs_Old_*` archives.
pub fn rotation_overlaps(job_name: &str, other_job: &str) -> bool {
    other_job
        .strip_prefix(job_name)
        .is_some_and(|rest| rest.starts_with('_'))
}

/// A pipeline state; the discriminant is the step number reported on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Idle = 0,
    Copying = 1,
    Archiving = 2,
    CleaningTemp = 3,
    RotatingRetention = 4,
}

impl PipelineStep {
    pub fn number(self) -> u8 {
        self as u8
    }
}
