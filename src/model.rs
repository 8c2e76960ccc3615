use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkStatus {
    #[default]
    Present,
    Absent,
    Expelled,
}

impl MarkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkStatus::Present => "present",
            MarkStatus::Absent => "absent",
            MarkStatus::Expelled => "expelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "expelled" => Some(Self::Expelled),
            _ => None,
        }
    }
}

impl fmt::Display for MarkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kitab being examined. `full_marks` is the inclusive ceiling for a
/// present mark.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub full_marks: i64,
}

/// Last-known server value for one (examinee, subject) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMark {
    pub obtained_marks: Option<f64>,
    pub status: MarkStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Examinee {
    pub id: String,
    pub roll_number: i64,
    pub name: String,
    pub marhala_id: String,
    pub subjects: Vec<Subject>,
    /// Baseline keyed by subject id.
    pub marks: HashMap<String, StoredMark>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarhalaGroup {
    pub marhala_id: String,
    pub marhala_name: String,
    pub subjects: Vec<Subject>,
    pub examinees: Vec<Examinee>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ScopeMode {
    Markaz {
        markaz_id: String,
        marhala_id: Option<String>,
    },
    RollRange {
        start: i64,
        end: i64,
    },
    Examiner {
        examiner_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryScope {
    pub exam_id: String,
    pub mode: ScopeMode,
}

impl EntryScope {
    /// Marhala the change feed can be narrowed to, if the scope names one.
    pub fn marhala_id(&self) -> Option<&str> {
        match &self.mode {
            ScopeMode::Markaz { marhala_id, .. } => marhala_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_grouped(&self) -> bool {
        matches!(self.mode, ScopeMode::RollRange { .. })
    }
}

/// Everything a scope fetch returns: examinees (with their subjects and
/// baseline marks) plus marhala display names for grouping.
#[derive(Debug, Clone, Default)]
pub struct ScopeData {
    pub examinees: Vec<Examinee>,
    pub marhalas: Vec<MarhalaInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarhalaInfo {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub examinee_id: String,
    pub subject_id: String,
}

impl CellKey {
    pub fn new(examinee_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            examinee_id: examinee_id.into(),
            subject_id: subject_id.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.examinee_id, self.subject_id)
    }
}

/// One row of a bulk-save payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedEntry {
    pub examinee_id: String,
    pub subject_id: String,
    pub obtained_marks: Option<f64>,
    pub status: MarkStatus,
}

/// A mark change published on the feed by whichever operator wrote it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkChange {
    pub seq: i64,
    pub examinee_id: String,
    pub subject_id: String,
    pub marhala_id: String,
    pub obtained_marks: Option<f64>,
    pub status: MarkStatus,
    pub origin: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub saved: usize,
    pub last_seq: i64,
}
