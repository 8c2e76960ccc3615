mod backend;
mod cell;
mod config;
mod db;
mod draft;
mod error;
mod feed;
mod grid;
mod ipc;
mod model;
mod scheduler;
mod scope;
mod session;
#[cfg(test)]
mod testkit;
mod validate;

use anyhow::{anyhow, Context};
use backend::MarkBackend;
use config::EntryConfig;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use model::SaveReceipt;
use rusqlite::Connection;
use session::SaveJob;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How long a closing sidecar waits for a save already on the wire.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn read_lines(tx: Sender<String>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if tx.send(line).is_err() {
            break;
        }
    }
}

fn run_save(
    cache: &mut Option<(PathBuf, Connection)>,
    workspace: &Path,
    job: &SaveJob,
) -> anyhow::Result<SaveReceipt> {
    if !cache.as_ref().is_some_and(|(p, _)| p.as_path() == workspace) {
        let conn = db::open_db(workspace)
            .with_context(|| format!("save worker could not open {}", workspace.display()))?;
        *cache = Some((workspace.to_path_buf(), conn));
    }
    let (_, conn) = cache
        .as_ref()
        .ok_or_else(|| anyhow!("save worker has no connection"))?;
    conn.bulk_save(&job.exam_id, &job.origin, &job.entries)
}

/// Executes bulk saves off the loop thread on its own connection.
fn save_worker(jobs: Receiver<ipc::SaveDispatch>, done: Sender<ipc::SaveDone>) {
    let mut cache: Option<(PathBuf, Connection)> = None;
    for ipc::SaveDispatch { workspace, job } in jobs.iter() {
        info!(job_id = job.job_id, entries = job.entries.len(), "bulk save");
        let outcome = run_save(&mut cache, &workspace, &job).map_err(|e| {
            warn!(job_id = job.job_id, error = %format!("{e:#}"), "bulk save rejected");
            format!("{e:#}")
        });
        let reply = ipc::SaveDone {
            session_id: job.session_id,
            job_id: job.job_id,
            outcome,
        };
        if done.send(reply).is_err() {
            break;
        }
    }
}

fn write_line(out: &mut impl Write, value: &serde_json::Value) {
    let _ = writeln!(
        out,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = out.flush();
}

fn handle_line(state: &mut ipc::AppState, line: &str, out: &mut impl Write) {
    if line.trim().is_empty() {
        return;
    }
    let req: ipc::Request = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            // Can't reply without id.
            write_line(
                out,
                &serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                }),
            );
            return;
        }
    };
    let resp = ipc::handle_request(state, req);
    write_line(out, &resp);
}

fn dispatch_saves(state: &mut ipc::AppState, jobs: &Sender<ipc::SaveDispatch>) {
    let pending: Vec<_> = state.outbox.drain(..).collect();
    for dispatch in pending {
        if let Err(e) = jobs.send(dispatch) {
            error!("save worker is gone");
            let job = e.into_inner().job;
            let done = ipc::SaveDone {
                session_id: job.session_id,
                job_id: job.job_id,
                outcome: Err("save worker stopped".to_string()),
            };
            ipc::complete_save(state, done, Instant::now());
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let (line_tx, line_rx) = unbounded::<String>();
    thread::spawn(move || read_lines(line_tx));
    let (job_tx, job_rx) = unbounded::<ipc::SaveDispatch>();
    let (done_tx, done_rx) = unbounded::<ipc::SaveDone>();
    thread::spawn(move || save_worker(job_rx, done_tx));

    let mut state = ipc::AppState::new(EntryConfig::from_env());
    info!(operator = %state.origin, version = env!("CARGO_PKG_VERSION"), "markentryd started");

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut stdin_open = true;
    while stdin_open {
        let wait = ipc::next_wait(&state, Instant::now());
        select! {
            recv(line_rx) -> line => match line {
                Ok(line) => handle_line(&mut state, &line, &mut out),
                Err(_) => stdin_open = false,
            },
            recv(done_rx) -> done => {
                if let Ok(done) = done {
                    ipc::complete_save(&mut state, done, Instant::now());
                }
            },
            default(wait) => {},
        }
        // Timers are checked after every wakeup so a busy stdin cannot
        // starve the debounce or the feed.
        ipc::tick(&mut state, Instant::now());
        dispatch_saves(&mut state, &job_tx);
        for note in ipc::drain_notifications(&mut state) {
            write_line(&mut out, &note);
        }
    }

    // stdin closed: let a save already handed to the worker land.
    if state.session.as_ref().is_some_and(|s| s.in_flight().is_some()) {
        match done_rx.recv_timeout(SHUTDOWN_GRACE) {
            Ok(done) => ipc::complete_save(&mut state, done, Instant::now()),
            Err(_) => warn!("exiting with a save still in flight"),
        }
    }
    info!("stdin closed; exiting");
}
