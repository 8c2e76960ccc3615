mod common;

use common::{grid_cell, seed, temp_dir, Sidecar};
use serde_json::json;
use std::time::Duration;

const FAST: [(&str, &str); 2] = [
    ("MARKENTRYD_DEBOUNCE_MS", "100"),
    ("MARKENTRYD_FEED_POLL_MS", "50"),
];

fn markaz_scope() -> serde_json::Value {
    json!({ "examId": "x", "markazId": "k1", "marhalaId": "m1" })
}

#[test]
fn peer_save_reaches_the_other_operator() {
    let workspace = temp_dir("markentry-feed-merge");
    let mut first = Sidecar::spawn(&FAST);
    first.select_workspace(&workspace);
    seed(&workspace);
    let mut second = Sidecar::spawn(&FAST);
    second.select_workspace(&workspace);

    first.request_ok("scope.open", markaz_scope());
    second.request_ok("scope.open", markaz_scope());
    second.request_ok("grid.focus", json!({ "examineeId": "B", "subjectId": "1" }));

    first.request_ok(
        "cell.setValue",
        json!({ "examineeId": "A", "subjectId": "1", "value": "77" }),
    );
    first.wait_event("save.status", |p| p["status"] == "success");

    let merged = second.wait_event("marks.remoteMerged", |_| true);
    assert_eq!(merged["cells"], json!(["A:1"]));
    let grid = second.request_ok("grid.get", json!({}));
    let a1 = grid_cell(&grid, "A", "1").expect("A:1");
    assert_eq!(a1["value"], "77");
    assert_eq!(a1["dirty"], false);
    // Merging does not move the peer's cursor.
    assert_eq!(grid["focus"]["examineeId"], "B");
    assert_eq!(grid["focus"]["index"], 2);

    // The writer never merges its own echo.
    let echoes = first.events_within("marks.remoteMerged", Duration::from_millis(300));
    assert!(echoes.is_empty(), "own save echoed back: {:?}", echoes);
}

#[test]
fn peer_overwrite_of_a_pending_edit_is_reported() {
    let workspace = temp_dir("markentry-feed-conflict");
    let mut first = Sidecar::spawn(&FAST);
    first.select_workspace(&workspace);
    seed(&workspace);
    // A long quiet period keeps the second operator's edit unsaved.
    let mut second = Sidecar::spawn(&[
        ("MARKENTRYD_DEBOUNCE_MS", "60000"),
        ("MARKENTRYD_FEED_POLL_MS", "50"),
    ]);
    second.select_workspace(&workspace);

    first.request_ok("scope.open", markaz_scope());
    second.request_ok("scope.open", markaz_scope());

    second.request_ok(
        "cell.setValue",
        json!({ "examineeId": "A", "subjectId": "2", "value": "40" }),
    );
    first.request_ok(
        "cell.setValue",
        json!({ "examineeId": "A", "subjectId": "2", "value": "55" }),
    );
    first.wait_event("save.status", |p| p["status"] == "success");

    let conflict = second.wait_event("marks.conflict", |_| true);
    let entry = &conflict["conflicts"][0];
    assert_eq!(entry["examineeId"], "A");
    assert_eq!(entry["subjectId"], "2");
    assert_eq!(entry["local"]["value"], "40");
    assert_eq!(entry["remote"]["value"], "55");
    assert_eq!(entry["overwritten"], true);

    let grid = second.request_ok("grid.get", json!({}));
    assert_eq!(grid_cell(&grid, "A", "2").expect("A:2")["value"], "55");
}

#[test]
fn keep_local_policy_holds_the_pending_edit() {
    let workspace = temp_dir("markentry-feed-keep-local");
    let mut first = Sidecar::spawn(&FAST);
    first.select_workspace(&workspace);
    seed(&workspace);
    let mut second = Sidecar::spawn(&[
        ("MARKENTRYD_DEBOUNCE_MS", "60000"),
        ("MARKENTRYD_FEED_POLL_MS", "50"),
        ("MARKENTRYD_CONFLICT_POLICY", "keepLocal"),
    ]);
    second.select_workspace(&workspace);

    first.request_ok("scope.open", markaz_scope());
    second.request_ok("scope.open", markaz_scope());

    second.request_ok(
        "cell.setValue",
        json!({ "examineeId": "B", "subjectId": "2", "value": "12" }),
    );
    first.request_ok(
        "cell.setValue",
        json!({ "examineeId": "B", "subjectId": "2", "value": "30" }),
    );
    first.wait_event("save.status", |p| p["status"] == "success");

    let conflict = second.wait_event("marks.conflict", |_| true);
    assert_eq!(conflict["conflicts"][0]["overwritten"], false);
    let grid = second.request_ok("grid.get", json!({}));
    let b2 = grid_cell(&grid, "B", "2").expect("B:2");
    assert_eq!(b2["value"], "12");
    assert_eq!(b2["dirty"], true);
}
