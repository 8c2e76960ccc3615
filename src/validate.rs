use crate::draft::{DraftCell, DraftStore};
use crate::model::{CellKey, ChangedEntry, MarkStatus};
use std::collections::{BTreeMap, HashMap};

pub const INVALID_NUMBER: &str = "invalid";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub payload: Vec<ChangedEntry>,
    /// Keyed by `examineeId:subjectId`.
    pub errors: BTreeMap<String, String>,
}

impl Diff {
    pub fn is_blocked(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Whether two cells hold the same mark. Text under an exception status
/// is never saved, so only the status counts there; present values compare
/// as numbers when both parse, so `"85.0"` and `" 85"` equal a stored 85.
pub fn same_mark(a: &DraftCell, b: &DraftCell) -> bool {
    if a.status != b.status {
        return false;
    }
    if a.status != MarkStatus::Present {
        return true;
    }
    let (x, y) = (a.value.trim(), b.value.trim());
    if x == y {
        return true;
    }
    matches!((x.parse::<f64>(), y.parse::<f64>()), (Ok(x), Ok(y)) if x == y)
}

pub fn is_changed(original: &DraftCell, draft: &DraftCell) -> bool {
    !same_mark(original, draft)
}

/// Checks one present value against its subject ceiling.
pub fn check_value(text: &str, full_marks: i64) -> Result<Option<f64>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let v = match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => return Err(INVALID_NUMBER.to_string()),
    };
    if v < 0.0 || v > full_marks as f64 {
        return Err(format!("0-{}", full_marks));
    }
    Ok(Some(v))
}

/// Compares the draft with the baseline over `order` (every loaded cell,
/// in grid order) and returns the minimal payload plus per-cell errors.
/// When any error is present the payload is cleared: a save is all or
/// nothing.
pub fn diff(
    original: &DraftStore,
    draft: &DraftStore,
    full_marks: &HashMap<String, i64>,
    order: &[CellKey],
) -> Diff {
    let empty = DraftCell::default();
    let mut out = Diff::default();

    for key in order {
        let Some(current) = draft.get(&key.examinee_id, &key.subject_id) else {
            continue;
        };
        let baseline = original
            .get(&key.examinee_id, &key.subject_id)
            .unwrap_or(&empty);
        if !is_changed(baseline, current) {
            continue;
        }

        if current.status != MarkStatus::Present {
            out.payload.push(ChangedEntry {
                examinee_id: key.examinee_id.clone(),
                subject_id: key.subject_id.clone(),
                obtained_marks: None,
                status: current.status,
            });
            continue;
        }

        let Some(&ceiling) = full_marks.get(&key.subject_id) else {
            out.errors
                .insert(key.to_string(), "unknown subject".to_string());
            continue;
        };
        match check_value(&current.value, ceiling) {
            Ok(Some(v)) => out.payload.push(ChangedEntry {
                examinee_id: key.examinee_id.clone(),
                subject_id: key.subject_id.clone(),
                obtained_marks: Some(v),
                status: MarkStatus::Present,
            }),
            // Cleared field: not a zero, nothing to send.
            Ok(None) => {}
            Err(msg) => {
                out.errors.insert(key.to_string(), msg);
            }
        }
    }

    if out.is_blocked() {
        out.payload.clear();
    }
    out
}
