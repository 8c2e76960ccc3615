use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::EntryConfig;
use crate::model::SaveReceipt;
use crate::session::{EntrySession, SaveJob};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A save job bound for the worker, with the workspace it writes to.
#[derive(Debug)]
pub struct SaveDispatch {
    pub workspace: PathBuf,
    pub job: SaveJob,
}

/// What the save worker reports back to the loop.
#[derive(Debug)]
pub struct SaveDone {
    pub session_id: String,
    pub job_id: u64,
    pub outcome: Result<SaveReceipt, String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Defaults plus environment; the workspace settings row is layered on
    /// top when a scope opens.
    pub base_config: EntryConfig,
    /// Operator id stamped on every save from this process.
    pub origin: String,
    pub session: Option<EntrySession>,
    pub outbox: Vec<SaveDispatch>,
}

impl AppState {
    pub fn new(base_config: EntryConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            base_config,
            origin: uuid::Uuid::new_v4().to_string(),
            session: None,
            outbox: Vec::new(),
        }
    }

    pub fn queue_save(&mut self, job: SaveJob) {
        let Some(workspace) = self.workspace.clone() else {
            return;
        };
        self.outbox.push(SaveDispatch { workspace, job });
    }
}
