use crate::draft::DraftCell;
use crate::model::{MarkStatus, Subject};
use serde::Serialize;

/// Bounds shown on the numeric field. These are hints only; the validator
/// is what actually rejects out-of-range marks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InputHints {
    pub min: i64,
    pub max: i64,
}

pub fn hints(subject: &Subject) -> InputHints {
    InputHints {
        min: 0,
        max: subject.full_marks,
    }
}

/// Typing into the field. A cell marked absent/expelled goes back to
/// present before the text is taken.
pub fn input_value(text: &str) -> DraftCell {
    DraftCell {
        value: text.to_string(),
        status: MarkStatus::Present,
    }
}

/// Clicking one of the exception buttons. Clicking the status that is
/// already active reverts the cell to present.
///
/// The typed value is kept underneath so reverting restores it; the
/// validator never sends it while the status is non-present.
pub fn toggle_status(current: &DraftCell, clicked: MarkStatus) -> DraftCell {
    let status = if clicked == MarkStatus::Present || current.status == clicked {
        MarkStatus::Present
    } else {
        clicked
    };
    DraftCell {
        value: current.value.clone(),
        status,
    }
}

/// Value the field renders: empty (and disabled) for exception statuses.
pub fn display_value(cell: &DraftCell) -> &str {
    match cell.status {
        MarkStatus::Present => &cell.value,
        _ => "",
    }
}
