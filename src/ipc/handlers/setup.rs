use crate::config::{ConflictPolicy, EntryConfig, SETTINGS_KEY};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Entry,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "entry" => Some(Self::Entry),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Entry => SETTINGS_KEY,
        }
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    obj: &mut Map<String, Value>,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    for (k, v) in patch {
        match section {
            SetupSection::Entry => match k.as_str() {
                "debounceMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 50, 60_000)?));
                }
                "feedPollMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 50, 60_000)?));
                }
                "pageSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 500)?));
                }
                "maxScopeRows" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20_000)?));
                }
                "lockInputsWhileSaving" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "conflictPolicy" => {
                    let s = parse_string_max(v, k, 16)?;
                    if ConflictPolicy::parse(&s).is_none() {
                        return Err("conflictPolicy must be one of: remoteWins, keepLocal".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown entry field: {}", k)),
            },
        }
    }
    Ok(())
}

/// The overrides stored in the workspace, validated field by field.
fn load_saved(conn: &Connection, section: SetupSection) -> anyhow::Result<Map<String, Value>> {
    let mut saved = Map::new();
    if let Some(raw) = db::settings_get_json(conn, section.key())? {
        if let Some(raw_obj) = raw.as_object() {
            for (k, v) in raw_obj {
                let single = Map::from_iter([(k.clone(), v.clone())]);
                // Skip fields an older build wrote with a now-invalid value.
                let _ = merge_section_patch(section, &mut saved, &single);
            }
        }
    }
    Ok(saved)
}

fn layered(base: &EntryConfig, saved: &Map<String, Value>) -> anyhow::Result<EntryConfig> {
    let mut current = serde_json::to_value(base)?;
    if let Some(obj) = current.as_object_mut() {
        for (k, v) in saved {
            obj.insert(k.clone(), v.clone());
        }
    }
    Ok(serde_json::from_value(current)?)
}

/// Effective entry configuration: defaults, environment, then the
/// workspace's `setup.entry` row.
pub fn load_entry_config(conn: &Connection, base: &EntryConfig) -> anyhow::Result<EntryConfig> {
    let saved = load_saved(conn, SetupSection::Entry)?;
    layered(base, &saved)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let entry = match load_entry_config(conn, &state.base_config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "entry": entry }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut saved = match load_saved(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut saved, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &Value::Object(saved.clone())) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    match layered(&state.base_config, &saved) {
        // Takes effect on the next scope.open.
        Ok(entry) => ok(&req.id, json!({ "entry": entry })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
