use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SETTINGS_KEY: &str = "setup.entry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// A peer's change replaces the local cell even if it has unsaved
    /// edits; the overwrite is reported.
    RemoteWins,
    /// A peer's change only moves the baseline; the unsaved local value
    /// stays and will be sent with the next save.
    KeepLocal,
}

impl ConflictPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "remoteWins" => Some(Self::RemoteWins),
            "keepLocal" => Some(Self::KeepLocal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryConfig {
    pub debounce_ms: u64,
    pub page_size: usize,
    pub feed_poll_ms: u64,
    pub conflict_policy: ConflictPolicy,
    pub lock_inputs_while_saving: bool,
    pub max_scope_rows: usize,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            page_size: 25,
            feed_poll_ms: 1000,
            conflict_policy: ConflictPolicy::RemoteWins,
            lock_inputs_while_saving: true,
            max_scope_rows: 2000,
        }
    }
}

impl EntryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn feed_poll(&self) -> Duration {
        Duration::from_millis(self.feed_poll_ms)
    }

    /// Defaults overlaid with `MARKENTRYD_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("MARKENTRYD_DEBOUNCE_MS").and_then(|s| s.parse().ok()) {
            self.debounce_ms = v;
        }
        if let Some(v) = lookup("MARKENTRYD_PAGE_SIZE").and_then(|s| s.parse().ok()) {
            if v > 0 {
                self.page_size = v;
            }
        }
        if let Some(v) = lookup("MARKENTRYD_FEED_POLL_MS").and_then(|s| s.parse().ok()) {
            self.feed_poll_ms = v;
        }
        if let Some(v) =
            lookup("MARKENTRYD_CONFLICT_POLICY").and_then(|s| ConflictPolicy::parse(&s))
        {
            self.conflict_policy = v;
        }
        if let Some(v) = lookup("MARKENTRYD_LOCK_INPUTS").and_then(|s| s.parse().ok()) {
            self.lock_inputs_while_saving = v;
        }
        self
    }
}
