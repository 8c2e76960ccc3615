use super::cell::cell_key;
use crate::error::EntryError;
use crate::ipc::error::{entry_err, err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_grid_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.session.as_ref() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    ok(&req.id, json!(session.view()))
}

fn handle_grid_page(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(page) = req.params.get("page").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "page must be a non-negative integer", None);
    };
    let Some(session) = state.session.as_mut() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    match session.set_page(page as usize) {
        Ok(()) => ok(&req.id, json!(session.view())),
        Err(e) => entry_err(&req.id, &e),
    }
}

fn handle_grid_focus(state: &mut AppState, req: &Request) -> serde_json::Value {
    let key = match cell_key(req) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let Some(session) = state.session.as_mut() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    match session.focus(&key) {
        Ok(index) => ok(&req.id, json!({ "index": index })),
        Err(e) => entry_err(&req.id, &e),
    }
}

fn handle_grid_key_down(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(key) = req.params.get("key").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing key", None);
    };
    let Some(session) = state.session.as_mut() else {
        return entry_err(&req.id, &EntryError::NoScope);
    };
    session.key_down(key);
    ok(&req.id, json!({ "focus": session.view().focus }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grid.get" => Some(handle_grid_get(state, req)),
        "grid.page" => Some(handle_grid_page(state, req)),
        "grid.focus" => Some(handle_grid_focus(state, req)),
        "grid.keyDown" => Some(handle_grid_key_down(state, req)),
        _ => None,
    }
}
