#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// A running markentryd. Stdout is read on a thread so notifications can
/// be awaited with a timeout.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<serde_json::Value>,
    pending: Vec<serde_json::Value>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn(envs: &[(&str, &str)]) -> Self {
        let exe = env!("CARGO_BIN_EXE_markentryd");
        let mut cmd = Command::new(exe);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (k, v) in envs {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().expect("spawn markentryd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let (tx, rx) = unbounded();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let value: serde_json::Value =
                    serde_json::from_str(line.trim()).expect("parse sidecar line");
                if tx.send(value).is_err() {
                    break;
                }
            }
        });
        Self {
            child,
            stdin,
            lines: rx,
            pending: Vec::new(),
            next_id: 1,
        }
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = format!("r{}", self.next_id);
        self.next_id += 1;
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let deadline = Instant::now() + WAIT;
        loop {
            let value = match self.lines.recv_deadline(deadline) {
                Ok(v) => v,
                Err(_) => panic!("no response for {}", method),
            };
            if value.get("id").and_then(|v| v.as_str()) == Some(id.as_str()) {
                return value;
            }
            // Notifications interleave with responses.
            self.pending.push(value);
        }
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Error code of a request expected to fail.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
        value["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    /// Waits for the first notification named `event` whose params satisfy
    /// `pred`; earlier unrelated notifications are kept.
    pub fn wait_event(
        &mut self,
        event: &str,
        pred: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        let matches = |v: &serde_json::Value| {
            v.get("event").and_then(|e| e.as_str()) == Some(event) && pred(&v["params"])
        };
        if let Some(pos) = self.pending.iter().position(|v| matches(v)) {
            return self.pending.remove(pos)["params"].clone();
        }
        let deadline = Instant::now() + WAIT;
        loop {
            match self.lines.recv_deadline(deadline) {
                Ok(v) if matches(&v) => return v["params"].clone(),
                Ok(v) => self.pending.push(v),
                Err(_) => panic!("timed out waiting for {}", event),
            }
        }
    }

    /// All notifications named `event` seen within `window`.
    pub fn events_within(&mut self, event: &str, window: Duration) -> Vec<serde_json::Value> {
        let deadline = Instant::now() + window;
        loop {
            match self.lines.recv_deadline(deadline) {
                Ok(v) => self.pending.push(v),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.pending
            .iter()
            .filter(|v| v.get("event").and_then(|e| e.as_str()) == Some(event))
            .map(|v| v["params"].clone())
            .collect()
    }

    pub fn select_workspace(&mut self, workspace: &Path) {
        self.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Exam `x` at markaz `k1`: examinees A and B in marhala m1 (kitabs 1 and
/// 2 out of 100), C in marhala m2 (kitab 3 out of 50). Examiner t1 marks
/// kitab 2. The schema must already exist.
pub fn seed(workspace: &Path) {
    let conn = rusqlite::Connection::open(workspace.join("markentry.sqlite3")).expect("open db");
    conn.busy_timeout(Duration::from_secs(5)).expect("busy timeout");
    conn.execute_batch(
        "INSERT INTO exams(id, name) VALUES('x', 'Annual 1446');
         INSERT INTO marhalas(id, name, sort_order)
           VALUES('m1', 'Mutawassitah', 1), ('m2', 'Sanabiyah', 2);
         INSERT INTO markaz(id, name) VALUES('k1', 'Markaz One');
         INSERT INTO subjects(id, marhala_id, name, full_marks, sort_order) VALUES
           ('1', 'm1', 'Nahw', 100, 1),
           ('2', 'm1', 'Sarf', 100, 2),
           ('3', 'm2', 'Fiqh', 50, 1);
         INSERT INTO examinees(id, exam_id, roll_number, name, marhala_id, markaz_id) VALUES
           ('A', 'x', 101, 'Abdullah', 'm1', 'k1'),
           ('B', 'x', 102, 'Bilal', 'm1', 'k1'),
           ('C', 'x', 103, 'Hamza', 'm2', 'k1');
         INSERT INTO examiners(id, name) VALUES('t1', 'Ustadh Yusuf');
         INSERT INTO examiner_assignments(examiner_id, exam_id, subject_id, markaz_id)
           VALUES('t1', 'x', '2', 'k1');",
    )
    .expect("seed fixtures");
}

/// (obtained_marks, status) as stored.
pub fn stored_mark(
    workspace: &Path,
    examinee: &str,
    subject: &str,
) -> Option<(Option<f64>, String)> {
    let conn = rusqlite::Connection::open(workspace.join("markentry.sqlite3")).expect("open db");
    conn.busy_timeout(Duration::from_secs(5)).expect("busy timeout");
    let mut stmt = conn
        .prepare(
            "SELECT obtained_marks, status FROM marks
             WHERE examinee_id = ? AND subject_id = ?",
        )
        .expect("prepare");
    let mut rows = stmt.query((examinee, subject)).expect("query");
    rows.next()
        .expect("row")
        .map(|r| (r.get(0).expect("marks"), r.get(1).expect("status")))
}

pub fn event_count(workspace: &Path) -> i64 {
    let conn = rusqlite::Connection::open(workspace.join("markentry.sqlite3")).expect("open db");
    conn.busy_timeout(Duration::from_secs(5)).expect("busy timeout");
    conn.query_row("SELECT COUNT(*) FROM mark_events", [], |r| r.get(0))
        .expect("count")
}

/// The cell view for (examinee, subject) in a grid.get result.
pub fn grid_cell<'a>(
    grid: &'a serde_json::Value,
    examinee: &str,
    subject: &str,
) -> Option<&'a serde_json::Value> {
    grid["tables"].as_array()?.iter().find_map(|t| {
        let row = t["rows"]
            .as_array()?
            .iter()
            .find(|r| r["examineeId"] == examinee)?;
        row["cells"]
            .as_array()?
            .iter()
            .find(|c| c["subjectId"] == subject)
    })
}
