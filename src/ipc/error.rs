use crate::error::EntryError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn entry_err(id: &str, e: &EntryError) -> serde_json::Value {
    let message = match e {
        // Keep the context chain for store failures.
        EntryError::Store(inner) => format!("{inner:#}"),
        other => other.to_string(),
    };
    err(id, e.code(), message, e.details())
}

/// Notification line: no id, never answered.
pub fn event(name: &str, params: serde_json::Value) -> serde_json::Value {
    json!({
        "event": name,
        "params": params,
    })
}
