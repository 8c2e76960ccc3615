use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("no scope is open")]
    NoScope,
    #[error("{0}")]
    BadScope(String),
    #[error("markaz hosts more than one marhala; pick a marhalaId")]
    AmbiguousScope { marhalas: Vec<String> },
    #[error("scope has {rows} examinees, more than the {max} allowed")]
    ScopeTooLarge { rows: usize, max: usize },
    #[error("cell {0} is not part of the open scope")]
    UnknownCell(String),
    #[error("inputs are locked while a save is in flight")]
    InputsLocked,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EntryError {
    pub fn code(&self) -> &'static str {
        match self {
            EntryError::NoScope => "no_scope",
            EntryError::BadScope(_) => "bad_scope",
            EntryError::AmbiguousScope { .. } => "ambiguous_scope",
            EntryError::ScopeTooLarge { .. } => "scope_too_large",
            EntryError::UnknownCell(_) => "unknown_cell",
            EntryError::InputsLocked => "inputs_locked",
            EntryError::Store(_) => "store_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EntryError::AmbiguousScope { marhalas } => Some(json!({ "marhalaIds": marhalas })),
            EntryError::ScopeTooLarge { rows, max } => {
                Some(json!({ "rows": rows, "maxRows": max }))
            }
            EntryError::UnknownCell(key) => Some(json!({ "cell": key })),
            _ => None,
        }
    }
}
