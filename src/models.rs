//! Core data models used throughout the evaluation system.
//!
//! These types represent history rows, their result files, and the flat
//! documents that flow into the search index.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Lifecycle status of a history entry.
///
/// The numeric value orders the lifecycle; a row may only move to a
/// status with an equal or larger value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    NotScheduled = 0,
    Scheduled = 1,
    Running = 2,
    Finished = 3,
    FinishedNoOutput = 4,
    Broken = 5,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::NotScheduled,
        Status::Scheduled,
        Status::Running,
        Status::Finished,
        Status::FinishedNoOutput,
        Status::Broken,
    ];

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Status> {
        Status::ALL.into_iter().find(|s| s.as_i64() == value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotScheduled => "not-scheduled",
            Status::Scheduled => "scheduled",
            Status::Running => "running",
            Status::Finished => "finished",
            Status::FinishedNoOutput => "finished-no-output",
            Status::Broken => "broken",
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_become(self, next: Status) -> bool {
        next >= self
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|st| st.as_str() == s.to_lowercase().replace('_', "-"))
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// Kind of a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Data = 0,
    Plot = 1,
    Unknown = 9,
}

impl ResultType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> ResultType {
        match value {
            0 => ResultType::Data,
            1 => ResultType::Plot,
            _ => ResultType::Unknown,
        }
    }

    /// Map a free-form type label (`"plot"`, `"data"`, ...) to the enum.
    pub fn from_label(label: &str) -> ResultType {
        match label.to_lowercase().as_str() {
            "plot" | "image" | "figure" => ResultType::Plot,
            "data" => ResultType::Data,
            _ => ResultType::Unknown,
        }
    }

    /// Guess the type of an output file from its extension.
    pub fn from_path(path: &Path) -> ResultType {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "pdf" | "eps" | "ps" => ResultType::Plot,
            "nc" | "nc4" | "grb" | "grib" | "grb2" | "zarr" | "csv" | "json" | "txt" => {
                ResultType::Data
            }
            _ => ResultType::Unknown,
        }
    }
}

/// Kind of a tag attached to a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Caption = 0,
    Note = 1,
}

impl TagType {
    pub fn from_i64(value: i64) -> TagType {
        if value == 0 {
            TagType::Caption
        } else {
            TagType::Note
        }
    }
}

/// One recorded plugin invocation.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub tool: String,
    pub version: String,
    pub configuration: serde_json::Value,
    pub slurm_output: Option<String>,
    pub uid: String,
    pub status: Status,
    pub flag: i64,
    pub version_details_id: Option<i64>,
}

impl HistoryEntry {
    /// The stored configuration as an object map (empty if not an object).
    pub fn config_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.configuration
            .as_object()
            .cloned()
            .unwrap_or_default()
    }
}

/// A file produced by a history entry.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub id: i64,
    pub history_id: i64,
    pub output_file: String,
    pub preview_file: Option<String>,
    pub file_type: ResultType,
}

/// Free text attached to a result (e.g. a caption).
#[derive(Debug, Clone, Serialize)]
pub struct ResultTag {
    pub id: i64,
    pub result_id: i64,
    pub tag_type: TagType,
    pub text: String,
}

/// Flat document stored in the search index.
///
/// Every DRS part becomes a top-level field next to the bookkeeping
/// fields below.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexDocument {
    pub file: String,
    pub file_no_version: String,
    pub data_type: String,
    pub timestamp: f64,
    pub creation_time: String,
    #[serde(flatten)]
    pub parts: BTreeMap<String, String>,
}

impl IndexDocument {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Render float epoch seconds as ISO-8601 UTC with a `Z` suffix.
pub fn iso_utc(timestamp: f64) -> String {
    let secs = timestamp.floor() as i64;
    let nanos = ((timestamp - timestamp.floor()) * 1e9) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}
