use crate::error::EntryError;
use crate::ipc::error::{entry_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::SaveNow;
use serde_json::json;

fn handle_save_now(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_mut() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    let result = match session.save_now() {
        SaveNow::Started(job) => {
            let body = json!({
                "outcome": "started",
                "jobId": job.job_id,
                "entries": job.entries.len(),
            });
            state.queue_save(job);
            body
        }
        SaveNow::Queued => json!({ "outcome": "queued" }),
        SaveNow::NothingToSave => json!({ "outcome": "nothingToSave" }),
        SaveNow::Blocked(errors) => json!({ "outcome": "blocked", "errors": errors }),
    };
    ok(&req.id, result)
}

fn handle_save_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    ok(&req.id, json!(session.status()))
}

fn handle_entry_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    ok(&req.id, json!(session.progress()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "save.now" => Some(handle_save_now(state, req)),
        "save.status" => Some(handle_save_status(state, req)),
        "entry.progress" => Some(handle_entry_progress(state, req)),
        _ => None,
    }
}
