use crate::backend::{FeedFilter, FilterOptions, MarkBackend, NamedRef};
use crate::model::{
    ChangedEntry, EntryScope, Examinee, MarhalaInfo, MarkChange, MarkStatus, SaveReceipt,
    ScopeData, ScopeMode, StoredMark, Subject,
};
use anyhow::{anyhow, Context};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_FILE: &str = "markentry.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    // Several operators' sidecars share one workspace file.
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get::<_, String>(0))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marhalas(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS markaz(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            marhala_id TEXT NOT NULL,
            name TEXT NOT NULL,
            full_marks INTEGER NOT NULL CHECK(full_marks > 0),
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(marhala_id) REFERENCES marhalas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_marhala ON subjects(marhala_id, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS examinees(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            roll_number INTEGER NOT NULL,
            name TEXT NOT NULL,
            marhala_id TEXT NOT NULL,
            markaz_id TEXT,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(marhala_id) REFERENCES marhalas(id),
            FOREIGN KEY(markaz_id) REFERENCES markaz(id),
            UNIQUE(exam_id, roll_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_examinees_markaz
         ON examinees(exam_id, markaz_id, marhala_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS examiners(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS examiner_assignments(
            examiner_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            markaz_id TEXT,
            PRIMARY KEY(examiner_id, exam_id, subject_id),
            FOREIGN KEY(examiner_id) REFERENCES examiners(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            exam_id TEXT NOT NULL,
            examinee_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            obtained_marks REAL,
            status TEXT NOT NULL,
            updated_at TEXT,
            updated_by TEXT,
            PRIMARY KEY(examinee_id, subject_id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(examinee_id) REFERENCES examinees(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mark_events(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            exam_id TEXT NOT NULL,
            marhala_id TEXT NOT NULL,
            examinee_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            obtained_marks REAL,
            status TEXT NOT NULL,
            origin TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mark_events_exam ON mark_events(exam_id, seq)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    ensure_marks_updated_by(&conn)?;
    Ok(conn)
}

// Workspaces created before operator tagging have no updated_by column.
fn ensure_marks_updated_by(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "marks", "updated_by")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE marks ADD COLUMN updated_by TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings row {} is not json", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

fn parse_status(raw: &str) -> rusqlite::Result<MarkStatus> {
    MarkStatus::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown mark status {:?}", raw).into(),
        )
    })
}

fn subjects_by_marhala(
    conn: &Connection,
    marhala_ids: &[String],
) -> anyhow::Result<HashMap<String, Vec<Subject>>> {
    let mut out: HashMap<String, Vec<Subject>> = HashMap::new();
    if marhala_ids.is_empty() {
        return Ok(out);
    }
    let placeholders = vec!["?"; marhala_ids.len()].join(",");
    let sql = format!(
        "SELECT id, marhala_id, name, full_marks FROM subjects
         WHERE marhala_id IN ({}) ORDER BY sort_order, id",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(marhala_ids.iter()), |r| {
        Ok((
            r.get::<_, String>(1)?,
            Subject {
                id: r.get(0)?,
                name: r.get(2)?,
                full_marks: r.get(3)?,
            },
        ))
    })?;
    for row in rows {
        let (marhala_id, subject) = row?;
        out.entry(marhala_id).or_default().push(subject);
    }
    Ok(out)
}

struct ExamineeRow {
    id: String,
    roll_number: i64,
    name: String,
    marhala_id: String,
    markaz_id: Option<String>,
}

/// One examiner assignment. `markaz_id` of `None` covers every markaz.
struct Assignment {
    subject_id: String,
    markaz_id: Option<String>,
}

impl Assignment {
    fn covers(&self, subject_id: &str, markaz_id: Option<&str>) -> bool {
        self.subject_id == subject_id
            && match &self.markaz_id {
                Some(k) => markaz_id == Some(k.as_str()),
                None => true,
            }
    }
}

/// Examinee rows for a scope. Examiner mode also returns the assignments
/// that decide which kitabs each examinee gets.
fn scope_examinee_rows(
    conn: &Connection,
    scope: &EntryScope,
) -> anyhow::Result<(Vec<ExamineeRow>, Option<Vec<Assignment>>)> {
    let mut binds: Vec<Value> = vec![Value::Text(scope.exam_id.clone())];
    let mut assigned: Option<Vec<Assignment>> = None;

    let filter = match &scope.mode {
        ScopeMode::Markaz {
            markaz_id,
            marhala_id,
        } => {
            binds.push(Value::Text(markaz_id.clone()));
            match marhala_id {
                Some(m) => {
                    binds.push(Value::Text(m.clone()));
                    "AND e.markaz_id = ? AND e.marhala_id = ?".to_string()
                }
                None => "AND e.markaz_id = ?".to_string(),
            }
        }
        ScopeMode::RollRange { start, end } => {
            binds.push(Value::Integer(*start));
            binds.push(Value::Integer(*end));
            "AND e.roll_number BETWEEN ? AND ?".to_string()
        }
        ScopeMode::Examiner { examiner_id } => {
            let mut stmt = conn.prepare(
                "SELECT a.subject_id, s.marhala_id, a.markaz_id
                 FROM examiner_assignments a JOIN subjects s ON s.id = a.subject_id
                 WHERE a.examiner_id = ? AND a.exam_id = ?
                 ORDER BY s.sort_order, s.id",
            )?;
            let rows = stmt
                .query_map((examiner_id, &scope.exam_id), |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            if rows.is_empty() {
                return Ok((Vec::new(), Some(Vec::new())));
            }
            let mut clauses = Vec::new();
            let mut assignments = Vec::new();
            for (subject_id, marhala_id, markaz_id) in rows {
                binds.push(Value::Text(marhala_id));
                match &markaz_id {
                    Some(k) => {
                        binds.push(Value::Text(k.clone()));
                        clauses.push("(e.marhala_id = ? AND e.markaz_id = ?)");
                    }
                    None => clauses.push("(e.marhala_id = ?)"),
                }
                assignments.push(Assignment {
                    subject_id,
                    markaz_id,
                });
            }
            assigned = Some(assignments);
            format!("AND ({})", clauses.join(" OR "))
        }
    };

    let sql = format!(
        "SELECT e.id, e.roll_number, e.name, e.marhala_id, e.markaz_id FROM examinees e
         WHERE e.exam_id = ? {} ORDER BY e.roll_number",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(ExamineeRow {
                id: r.get(0)?,
                roll_number: r.get(1)?,
                name: r.get(2)?,
                marhala_id: r.get(3)?,
                markaz_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, assigned))
}

fn baseline_marks(
    conn: &Connection,
    examinee_ids: &[String],
) -> anyhow::Result<HashMap<String, HashMap<String, StoredMark>>> {
    let mut out: HashMap<String, HashMap<String, StoredMark>> = HashMap::new();
    // Chunked to stay under SQLite's bound-parameter limit.
    for chunk in examinee_ids.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT examinee_id, subject_id, obtained_marks, status FROM marks
             WHERE examinee_id IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |r| {
            let status: String = r.get(3)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                StoredMark {
                    obtained_marks: r.get(2)?,
                    status: parse_status(&status)?,
                },
            ))
        })?;
        for row in rows {
            let (examinee_id, subject_id, mark) = row?;
            out.entry(examinee_id).or_default().insert(subject_id, mark);
        }
    }
    Ok(out)
}

fn marhala_infos(conn: &Connection, ids: &[String]) -> anyhow::Result<Vec<MarhalaInfo>> {
    let mut out = Vec::new();
    let mut stmt = conn.prepare("SELECT id, name, sort_order FROM marhalas WHERE id = ?")?;
    for id in ids {
        if let Some(info) = stmt
            .query_row([id], |r| {
                Ok(MarhalaInfo {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    sort_order: r.get(2)?,
                })
            })
            .optional()?
        {
            out.push(info);
        }
    }
    Ok(out)
}

fn list_named(conn: &Connection, sql: &str, binds: &[&str]) -> anyhow::Result<Vec<NamedRef>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            Ok(NamedRef {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl MarkBackend for Connection {
    fn fetch_scope(&self, scope: &EntryScope) -> anyhow::Result<ScopeData> {
        let (rows, assigned) = scope_examinee_rows(self, scope)
            .with_context(|| format!("failed to load examinees for exam {}", scope.exam_id))?;

        let mut marhala_ids: Vec<String> = rows.iter().map(|r| r.marhala_id.clone()).collect();
        marhala_ids.sort();
        marhala_ids.dedup();
        let subjects = subjects_by_marhala(self, &marhala_ids)?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut marks = baseline_marks(self, &ids)?;

        let examinees = rows
            .into_iter()
            .map(|row| {
                let mut own = subjects.get(&row.marhala_id).cloned().unwrap_or_default();
                // Examiners only see the kitabs assigned for the examinee's markaz.
                if let Some(assignments) = &assigned {
                    let markaz = row.markaz_id.as_deref();
                    own.retain(|s| assignments.iter().any(|a| a.covers(&s.id, markaz)));
                }
                Examinee {
                    subjects: own,
                    marks: marks.remove(&row.id).unwrap_or_default(),
                    id: row.id,
                    roll_number: row.roll_number,
                    name: row.name,
                    marhala_id: row.marhala_id,
                }
            })
            .collect();

        Ok(ScopeData {
            examinees,
            marhalas: marhala_infos(self, &marhala_ids)?,
        })
    }

    fn bulk_save(
        &self,
        exam_id: &str,
        origin: &str,
        entries: &[ChangedEntry],
    ) -> anyhow::Result<SaveReceipt> {
        let tx = self.unchecked_transaction()?;
        let now = now_rfc3339();
        let mut last_seq = 0;
        {
            let mut lookup = tx.prepare(
                "SELECT e.marhala_id, s.id FROM examinees e
                 LEFT JOIN subjects s ON s.id = ? AND s.marhala_id = e.marhala_id
                 WHERE e.id = ? AND e.exam_id = ?",
            )?;
            let mut upsert = tx.prepare(
                "INSERT INTO marks(exam_id, examinee_id, subject_id, obtained_marks, status,
                                   updated_at, updated_by)
                 VALUES(?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(examinee_id, subject_id) DO UPDATE SET
                   exam_id = excluded.exam_id,
                   obtained_marks = excluded.obtained_marks,
                   status = excluded.status,
                   updated_at = excluded.updated_at,
                   updated_by = excluded.updated_by",
            )?;
            let mut event = tx.prepare(
                "INSERT INTO mark_events(exam_id, marhala_id, examinee_id, subject_id,
                                         obtained_marks, status, origin, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for (i, e) in entries.iter().enumerate() {
                let found: Option<(String, Option<String>)> = lookup
                    .query_row((&e.subject_id, &e.examinee_id, exam_id), |r| {
                        Ok((r.get(0)?, r.get(1)?))
                    })
                    .optional()?;
                let Some((marhala_id, subject)) = found else {
                    return Err(anyhow!(
                        "entry {}: examinee {} is not registered for exam {}",
                        i,
                        e.examinee_id,
                        exam_id
                    ));
                };
                if subject.is_none() {
                    return Err(anyhow!(
                        "entry {}: subject {} is not part of examinee {}'s marhala",
                        i,
                        e.subject_id,
                        e.examinee_id
                    ));
                }
                if e.status != MarkStatus::Present && e.obtained_marks.is_some() {
                    return Err(anyhow!(
                        "entry {}: {} marks must be null",
                        i,
                        e.status
                    ));
                }
                upsert.execute((
                    exam_id,
                    &e.examinee_id,
                    &e.subject_id,
                    e.obtained_marks,
                    e.status.as_str(),
                    &now,
                    origin,
                ))?;
                event.execute((
                    exam_id,
                    &marhala_id,
                    &e.examinee_id,
                    &e.subject_id,
                    e.obtained_marks,
                    e.status.as_str(),
                    origin,
                    &now,
                ))?;
                last_seq = tx.last_insert_rowid();
            }
        }
        tx.commit()?;
        Ok(SaveReceipt {
            saved: entries.len(),
            last_seq,
        })
    }

    fn feed_head(&self, filter: &FeedFilter) -> anyhow::Result<i64> {
        let head: Option<i64> = self.query_row(
            "SELECT MAX(seq) FROM mark_events WHERE exam_id = ?",
            [&filter.exam_id],
            |r| r.get(0),
        )?;
        Ok(head.unwrap_or(0))
    }

    fn changes_since(&self, filter: &FeedFilter, cursor: i64) -> anyhow::Result<Vec<MarkChange>> {
        let mut binds: Vec<Value> =
            vec![Value::Text(filter.exam_id.clone()), Value::Integer(cursor)];
        let marhala_clause = match &filter.marhala_id {
            Some(m) => {
                binds.push(Value::Text(m.clone()));
                "AND marhala_id = ?"
            }
            None => "",
        };
        let sql = format!(
            "SELECT seq, examinee_id, subject_id, marhala_id, obtained_marks, status, origin
             FROM mark_events WHERE exam_id = ? AND seq > ? {} ORDER BY seq LIMIT 5000",
            marhala_clause
        );
        let mut stmt = self.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                let status: String = r.get(5)?;
                Ok(MarkChange {
                    seq: r.get(0)?,
                    examinee_id: r.get(1)?,
                    subject_id: r.get(2)?,
                    marhala_id: r.get(3)?,
                    obtained_marks: r.get(4)?,
                    status: parse_status(&status)?,
                    origin: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn filter_options(&self, exam_id: Option<&str>) -> anyhow::Result<FilterOptions> {
        let exams = list_named(self, "SELECT id, name FROM exams ORDER BY name", &[])?;
        let marhalas = list_named(
            self,
            "SELECT id, name FROM marhalas ORDER BY sort_order, name",
            &[],
        )?;
        let (markaz, examiners) = match exam_id {
            Some(exam) => (
                list_named(
                    self,
                    "SELECT DISTINCT k.id, k.name FROM markaz k
                     JOIN examinees e ON e.markaz_id = k.id
                     WHERE e.exam_id = ? ORDER BY k.name",
                    &[exam],
                )?,
                list_named(
                    self,
                    "SELECT DISTINCT x.id, x.name FROM examiners x
                     JOIN examiner_assignments a ON a.examiner_id = x.id
                     WHERE a.exam_id = ? ORDER BY x.name",
                    &[exam],
                )?,
            ),
            None => (
                list_named(self, "SELECT id, name FROM markaz ORDER BY name", &[])?,
                list_named(self, "SELECT id, name FROM examiners ORDER BY name", &[])?,
            ),
        };
        Ok(FilterOptions {
            exams,
            markaz,
            marhalas,
            examiners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    fn seeded(prefix: &str) -> (PathBuf, Connection) {
        let ws = temp_workspace(prefix);
        let conn = open_db(&ws).expect("open db");
        conn.execute_batch(
            "INSERT INTO exams(id, name) VALUES('x', 'Annual 1446');
             INSERT INTO marhalas(id, name, sort_order)
               VALUES('m1', 'Mutawassitah', 1), ('m2', 'Sanabiyah', 2);
             INSERT INTO markaz(id, name) VALUES('k1', 'Markaz One');
             INSERT INTO subjects(id, marhala_id, name, full_marks, sort_order) VALUES
               ('nahw', 'm1', 'Nahw', 100, 1),
               ('sarf', 'm1', 'Sarf', 50, 2),
               ('fiqh', 'm2', 'Fiqh', 100, 1);
             INSERT INTO examinees(id, exam_id, roll_number, name, marhala_id, markaz_id) VALUES
               ('a', 'x', 101, 'Abdullah', 'm1', 'k1'),
               ('b', 'x', 102, 'Bilal', 'm1', 'k1'),
               ('c', 'x', 103, 'Hamza', 'm2', 'k1');
             INSERT INTO examiners(id, name) VALUES('t1', 'Ustadh Yusuf');
             INSERT INTO examiner_assignments(examiner_id, exam_id, subject_id, markaz_id)
               VALUES('t1', 'x', 'sarf', NULL);",
        )
        .expect("seed");
        (ws, conn)
    }

    fn entry(ex: &str, subj: &str, marks: Option<f64>, status: MarkStatus) -> ChangedEntry {
        ChangedEntry {
            examinee_id: ex.into(),
            subject_id: subj.into(),
            obtained_marks: marks,
            status,
        }
    }

    #[test]
    fn roll_range_spans_marhalas_with_their_subjects() {
        let (ws, conn) = seeded("markentry-db-roll");
        let data = conn
            .fetch_scope(&EntryScope {
                exam_id: "x".into(),
                mode: ScopeMode::RollRange { start: 102, end: 103 },
            })
            .expect("fetch");
        assert_eq!(data.examinees.len(), 2);
        assert_eq!(data.examinees[0].subjects.len(), 2);
        assert_eq!(data.examinees[1].subjects[0].id, "fiqh");
        assert_eq!(data.marhalas.len(), 2);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn examiner_scope_keeps_only_assigned_subjects() {
        let (ws, conn) = seeded("markentry-db-examiner");
        let data = conn
            .fetch_scope(&EntryScope {
                exam_id: "x".into(),
                mode: ScopeMode::Examiner {
                    examiner_id: "t1".into(),
                },
            })
            .expect("fetch");
        assert_eq!(data.examinees.len(), 2);
        assert!(data
            .examinees
            .iter()
            .all(|e| e.subjects.len() == 1 && e.subjects[0].id == "sarf"));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn examiner_assignments_split_by_markaz_stay_apart() {
        let (ws, conn) = seeded("markentry-db-examiner-split");
        conn.execute_batch(
            "INSERT INTO markaz(id, name) VALUES('k2', 'Markaz Two');
             INSERT INTO examinees(id, exam_id, roll_number, name, marhala_id, markaz_id)
               VALUES('d', 'x', 104, 'Dawud', 'm1', 'k2');
             INSERT INTO examiners(id, name) VALUES('t2', 'Ustadh Idris');
             INSERT INTO examiner_assignments(examiner_id, exam_id, subject_id, markaz_id)
               VALUES('t2', 'x', 'sarf', 'k1'), ('t2', 'x', 'nahw', 'k2');",
        )
        .expect("seed split");
        let data = conn
            .fetch_scope(&EntryScope {
                exam_id: "x".into(),
                mode: ScopeMode::Examiner {
                    examiner_id: "t2".into(),
                },
            })
            .expect("fetch");

        let kitabs: Vec<(&str, Vec<&str>)> = data
            .examinees
            .iter()
            .map(|e| (e.id.as_str(), e.subjects.iter().map(|s| s.id.as_str()).collect()))
            .collect();
        assert_eq!(
            kitabs,
            vec![("a", vec!["sarf"]), ("b", vec!["sarf"]), ("d", vec!["nahw"])]
        );
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn bulk_save_upserts_and_publishes_events() {
        let (ws, conn) = seeded("markentry-db-save");
        let filter = FeedFilter {
            exam_id: "x".into(),
            marhala_id: None,
        };
        let head = conn.feed_head(&filter).expect("head");
        conn.bulk_save(
            "x",
            "op-1",
            &[
                entry("a", "nahw", Some(85.0), MarkStatus::Present),
                entry("b", "sarf", None, MarkStatus::Absent),
            ],
        )
        .expect("save");
        conn.bulk_save("x", "op-1", &[entry("a", "nahw", Some(88.0), MarkStatus::Present)])
            .expect("resave");

        let data = conn
            .fetch_scope(&EntryScope {
                exam_id: "x".into(),
                mode: ScopeMode::Markaz {
                    markaz_id: "k1".into(),
                    marhala_id: Some("m1".into()),
                },
            })
            .expect("fetch");
        let a = &data.examinees[0];
        assert_eq!(a.marks.get("nahw").and_then(|m| m.obtained_marks), Some(88.0));

        let changes = conn.changes_since(&filter, head).expect("changes");
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[1].status, MarkStatus::Absent);
        assert!(changes.iter().all(|c| c.origin == "op-1"));

        let narrowed = conn
            .changes_since(
                &FeedFilter {
                    exam_id: "x".into(),
                    marhala_id: Some("m2".into()),
                },
                head,
            )
            .expect("changes");
        assert!(narrowed.is_empty());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn bulk_save_is_all_or_nothing() {
        let (ws, conn) = seeded("markentry-db-atomic");
        let res = conn.bulk_save(
            "x",
            "op-1",
            &[
                entry("a", "nahw", Some(40.0), MarkStatus::Present),
                entry("a", "fiqh", Some(40.0), MarkStatus::Present),
            ],
        );
        assert!(res.is_err());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM marks", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0);

        let res = conn.bulk_save(
            "x",
            "op-1",
            &[entry("a", "nahw", Some(3.0), MarkStatus::Expelled)],
        );
        assert!(res.is_err());
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn settings_round_trip() {
        let (ws, conn) = seeded("markentry-db-settings");
        assert_eq!(settings_get_json(&conn, "setup.entry").expect("get"), None);
        settings_set_json(&conn, "setup.entry", &serde_json::json!({ "pageSize": 10 }))
            .expect("set");
        assert_eq!(
            settings_get_json(&conn, "setup.entry").expect("get"),
            Some(serde_json::json!({ "pageSize": 10 }))
        );
        let _ = std::fs::remove_dir_all(ws);
    }
}
