use crate::model::{Examinee, MarkStatus, StoredMark};
use serde::Serialize;
use std::collections::HashMap;

/// What a cell currently shows: the raw text typed into the field and the
/// exception status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DraftCell {
    pub value: String,
    pub status: MarkStatus,
}

impl DraftCell {
    pub fn present(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status: MarkStatus::Present,
        }
    }

    pub fn from_stored(mark: &StoredMark) -> Self {
        match mark.status {
            MarkStatus::Present => Self {
                value: mark.obtained_marks.map(format_marks).unwrap_or_default(),
                status: MarkStatus::Present,
            },
            status => Self {
                value: String::new(),
                status,
            },
        }
    }
}

/// Partial update for [`DraftStore::set`]; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct DraftPatch {
    pub value: Option<String>,
    pub status: Option<MarkStatus>,
}

/// Renders stored marks the way the entry field shows them: `85` rather
/// than `85.0`.
pub fn format_marks(v: f64) -> String {
    format!("{}", v)
}

/// examinee id -> subject id -> cell. Used for both the working draft and
/// the last-synced baseline so the validator can compare them directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftStore {
    cells: HashMap<String, HashMap<String, DraftCell>>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one cell per (examinee, subject) pair from the examinee's
    /// baseline marks, or an empty present cell when nothing is stored.
    pub fn seed(examinees: &[Examinee]) -> Self {
        let mut cells: HashMap<String, HashMap<String, DraftCell>> = HashMap::new();
        for ex in examinees {
            let row = cells.entry(ex.id.clone()).or_default();
            for subject in &ex.subjects {
                let cell = ex
                    .marks
                    .get(&subject.id)
                    .map(DraftCell::from_stored)
                    .unwrap_or_default();
                row.insert(subject.id.clone(), cell);
            }
        }
        Self { cells }
    }

    pub fn get(&self, examinee_id: &str, subject_id: &str) -> Option<&DraftCell> {
        self.cells.get(examinee_id)?.get(subject_id)
    }

    /// Merges `patch` into the one addressed cell. Sibling subjects of the
    /// same examinee are never touched.
    pub fn set(&mut self, examinee_id: &str, subject_id: &str, patch: DraftPatch) -> &DraftCell {
        let cell = self
            .cells
            .entry(examinee_id.to_string())
            .or_default()
            .entry(subject_id.to_string())
            .or_default();
        if let Some(value) = patch.value {
            cell.value = value;
        }
        if let Some(status) = patch.status {
            cell.status = status;
        }
        cell
    }

    pub fn replace(&mut self, examinee_id: &str, subject_id: &str, cell: DraftCell) {
        self.cells
            .entry(examinee_id.to_string())
            .or_default()
            .insert(subject_id.to_string(), cell);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &DraftCell)> {
        self.cells.iter().flat_map(|(ex, row)| {
            row.iter()
                .map(move |(subj, cell)| (ex.as_str(), subj.as_str(), cell))
        })
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(HashMap::len).sum()
    }
}
