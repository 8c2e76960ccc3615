use crate::backend::MarkBackend;
use crate::ipc::error::{entry_err, err, ok};
use crate::ipc::handlers::setup::load_entry_config;
use crate::ipc::types::{AppState, Request};
use crate::scope;
use crate::session::EntrySession;
use serde_json::json;
use std::time::Instant;

fn handle_filters_options(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let exam_id = req.params.get("examId").and_then(|v| v.as_str());
    match conn.filter_options(exam_id) {
        Ok(options) => ok(&req.id, json!(options)),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

fn handle_scope_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let entry_scope = match scope::parse(&req.params) {
        Ok(s) => s,
        Err(e) => return entry_err(&req.id, &e),
    };
    let config = match load_entry_config(conn, &state.base_config) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // The previous scope's draft and timers go away even if the new one
    // fails to open.
    if let Some(mut previous) = state.session.take() {
        previous.close();
    }

    let opened = EntrySession::open(conn, entry_scope, config, &state.origin, Instant::now());
    let session = match opened {
        Ok(s) => s,
        Err(e) => return entry_err(&req.id, &e),
    };
    let result = json!({
        "sessionId": session.id(),
        "scope": session.scope(),
        "grid": session.view(),
        "status": session.status(),
    });
    state.session = Some(session);
    ok(&req.id, result)
}

fn handle_scope_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let closed = match state.session.take() {
        Some(mut session) => {
            session.close();
            true
        }
        None => false,
    };
    ok(&req.id, json!({ "closed": closed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "filters.options" => Some(handle_filters_options(state, req)),
        "scope.open" => Some(handle_scope_open(state, req)),
        "scope.close" => Some(handle_scope_close(state, req)),
        _ => None,
    }
}
