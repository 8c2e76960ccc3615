use crate::error::EntryError;
use crate::ipc::error::{entry_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{CellKey, MarkStatus};
use serde_json::json;
use std::time::Instant;

pub(super) fn cell_key(req: &Request) -> Result<CellKey, serde_json::Value> {
    let field = |name: &str| {
        req.params
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", name), None))
    };
    Ok(CellKey::new(field("examineeId")?, field("subjectId")?))
}

/// Typed text as the field would hold it. Numbers are accepted for
/// convenience and rendered without a trailing `.0`.
fn typed_text(v: Option<&serde_json::Value>) -> Option<String> {
    match v {
        None | Some(serde_json::Value::Null) => Some(String::new()),
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(_) => None,
    }
}

fn handle_set_value(state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = match cell_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let Some(text) = typed_text(req.params.get("value")) else {
        return err(&req.id, "bad_params", "value must be a string, number or null", None);
    };
    let Some(session) = state.session.as_mut() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    match session.set_value(&key, &text, Instant::now()) {
        Ok(cell) => ok(&req.id, json!({ "cell": cell, "status": session.status() })),
        Err(e) => entry_err(&req.id, &e),
    }
}

fn handle_toggle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = match cell_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let Some(status) = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .and_then(MarkStatus::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: present, absent, expelled",
            None,
        );
    };
    let Some(session) = state.session.as_mut() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    match session.toggle_status(&key, status, Instant::now()) {
        Ok(cell) => ok(&req.id, json!({ "cell": cell, "status": session.status() })),
        Err(e) => entry_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cell.setValue" => Some(handle_set_value(state, req)),
        "cell.toggleStatus" => Some(handle_toggle_status(state, req)),
        _ => None,
    }
}
