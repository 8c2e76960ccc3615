//! Loop-side hooks: timer ticks, save completions and the notifications
//! they produce.

use super::error::event;
use super::types::{AppState, SaveDone};
use crate::session::SessionEvent;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long the loop sleeps when no scope is open.
pub const IDLE_WAIT: Duration = Duration::from_secs(3600);

pub fn next_wait(state: &AppState, now: Instant) -> Duration {
    match state.session.as_ref() {
        Some(session) => session.next_wakeup().saturating_duration_since(now),
        None => IDLE_WAIT,
    }
}

/// Fires a due debounce and polls the change feed.
pub fn tick(state: &mut AppState, now: Instant) {
    let Some(session) = state.session.as_mut() else {
        return;
    };
    let due = session.poll_due(now);
    if let Some(conn) = state.db.as_ref() {
        session.poll_feed(conn, now);
    }
    if let Some(job) = due {
        state.queue_save(job);
    }
}

pub fn complete_save(state: &mut AppState, done: SaveDone, now: Instant) {
    let Some(session) = state.session.as_mut() else {
        debug!(session = %done.session_id, "save finished after scope closed");
        return;
    };
    if session.id() != done.session_id {
        debug!(session = %done.session_id, "save finished for a replaced scope");
        return;
    }
    let Some(conn) = state.db.as_ref() else {
        return;
    };
    session.complete_save(conn, done.job_id, done.outcome, now);
    // A queued manual save starts the moment the previous one resolves.
    if let Some(job) = session.poll_due(now) {
        state.queue_save(job);
    }
}

pub fn drain_notifications(state: &mut AppState) -> Vec<serde_json::Value> {
    let Some(session) = state.session.as_mut() else {
        return Vec::new();
    };
    let session_id = session.id().to_string();
    session
        .drain_events()
        .into_iter()
        .map(|e| match e {
            SessionEvent::SaveStatus(status) => event("save.status", json!(status)),
            SessionEvent::RemoteMerged(report) => event(
                "marks.remoteMerged",
                json!({ "sessionId": session_id, "cells": report.merged }),
            ),
            SessionEvent::Conflicts(conflicts) => event(
                "marks.conflict",
                json!({ "sessionId": session_id, "conflicts": conflicts }),
            ),
            SessionEvent::FeedError(message) => {
                event("feed.error", json!({ "sessionId": session_id, "message": message }))
            }
            SessionEvent::Reloaded => event("scope.reloaded", json!({ "sessionId": session_id })),
            SessionEvent::SyncError(message) => {
                event("sync.error", json!({ "sessionId": session_id, "message": message }))
            }
        })
        .collect()
}
