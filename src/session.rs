use crate::backend::MarkBackend;
use crate::cell;
use crate::config::EntryConfig;
use crate::draft::{DraftCell, DraftPatch, DraftStore};
use crate::error::EntryError;
use crate::feed::{self, Conflict, LiveSubscriber, MergeReport};
use crate::grid::{self, CellView, EntrySurface, Focus, GridView, Layout};
use crate::model::{CellKey, ChangedEntry, EntryScope, MarkStatus, SaveReceipt};
use crate::scheduler::{SaveScheduler, SaveStatus};
use crate::scope;
use crate::validate::{self, Diff};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A bulk save handed to whoever executes it (the save worker in the
/// sidecar, the test directly).
#[derive(Debug, Clone)]
pub struct SaveJob {
    pub session_id: String,
    pub job_id: u64,
    pub exam_id: String,
    pub origin: String,
    pub entries: Vec<ChangedEntry>,
}

#[derive(Debug)]
pub enum SaveNow {
    Started(SaveJob),
    /// Another save is in flight; this one runs as soon as it resolves.
    Queued,
    NothingToSave,
    Blocked(BTreeMap<String, String>),
}

/// Things the front end should hear about without having asked.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SaveStatus(StatusView),
    RemoteMerged(MergeReport),
    Conflicts(Vec<Conflict>),
    FeedError(String),
    Reloaded,
    SyncError(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: SaveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub in_flight: bool,
    pub pending_changes: usize,
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub subject_id: String,
    pub name: String,
    pub entered: usize,
    pub absent: usize,
    pub expelled: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total_cells: usize,
    pub dirty: usize,
    pub errors: usize,
    pub subjects: Vec<SubjectProgress>,
}

/// Owns everything for one open scope: baseline, draft, grid, scheduler
/// and the feed subscription. All mutation goes through `&mut self`, so
/// whatever reads the draft when the debounce fires sees the current
/// state.
pub struct EntrySession {
    id: String,
    origin: String,
    scope: EntryScope,
    config: EntryConfig,
    surface: EntrySurface,
    baseline: DraftStore,
    draft: DraftStore,
    errors: BTreeMap<String, String>,
    scheduler: SaveScheduler,
    subscriber: Option<LiveSubscriber>,
    feed_failing: bool,
    next_feed_poll: Instant,
    last_status: SaveStatus,
    events: Vec<SessionEvent>,
}

impl EntrySession {
    pub fn open(
        backend: &dyn MarkBackend,
        scope: EntryScope,
        config: EntryConfig,
        origin: &str,
        now: Instant,
    ) -> Result<Self, EntryError> {
        let mut events = Vec::new();
        // Subscribe before fetching so nothing written in between is missed.
        let subscriber = match LiveSubscriber::subscribe(backend, &scope, origin) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "feed subscription failed");
                events.push(SessionEvent::FeedError(e.to_string()));
                None
            }
        };

        let data = backend.fetch_scope(&scope)?;
        let groups = scope::resolve(&scope, data, config.max_scope_rows)?;
        let layout = if scope.is_grouped() {
            Layout::Grouped
        } else {
            Layout::Flat {
                page_size: config.page_size,
            }
        };
        let surface = EntrySurface::new(layout, groups);
        let examinees: Vec<_> = surface.examinees().cloned().collect();
        let baseline = DraftStore::seed(&examinees);

        let id = Uuid::new_v4().to_string();
        info!(
            session = %id,
            exam = %scope.exam_id,
            examinees = examinees.len(),
            cells = baseline.len(),
            "scope opened"
        );

        Ok(Self {
            id,
            origin: origin.to_string(),
            scheduler: SaveScheduler::new(config.debounce()),
            next_feed_poll: now + config.feed_poll(),
            feed_failing: subscriber.is_none(),
            subscriber,
            scope,
            config,
            surface,
            draft: baseline.clone(),
            baseline,
            errors: BTreeMap::new(),
            last_status: SaveStatus::Idle,
            events,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> &EntryScope {
        &self.scope
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn check_cell(&self, key: &CellKey) -> Result<(), EntryError> {
        if !self.surface.contains(key) {
            return Err(EntryError::UnknownCell(key.to_string()));
        }
        if self.inputs_locked() {
            return Err(EntryError::InputsLocked);
        }
        Ok(())
    }

    fn inputs_locked(&self) -> bool {
        self.config.lock_inputs_while_saving && self.scheduler.is_saving()
    }

    fn accept_edit(&mut self, key: &CellKey, cell: DraftCell, now: Instant) -> DraftCell {
        self.draft.set(
            &key.examinee_id,
            &key.subject_id,
            DraftPatch {
                value: Some(cell.value.clone()),
                status: Some(cell.status),
            },
        );
        self.errors.remove(&key.to_string());
        self.scheduler.note_edit(now);
        self.push_status_if_changed();
        cell
    }

    pub fn set_value(
        &mut self,
        key: &CellKey,
        text: &str,
        now: Instant,
    ) -> Result<DraftCell, EntryError> {
        self.check_cell(key)?;
        Ok(self.accept_edit(key, cell::input_value(text), now))
    }

    pub fn toggle_status(
        &mut self,
        key: &CellKey,
        status: MarkStatus,
        now: Instant,
    ) -> Result<DraftCell, EntryError> {
        self.check_cell(key)?;
        let current = self
            .draft
            .get(&key.examinee_id, &key.subject_id)
            .cloned()
            .unwrap_or_default();
        Ok(self.accept_edit(key, cell::toggle_status(&current, status), now))
    }

    pub fn get(&self, key: &CellKey) -> Option<&DraftCell> {
        self.draft.get(&key.examinee_id, &key.subject_id)
    }

    pub fn focus(&mut self, key: &CellKey) -> Result<usize, EntryError> {
        self.surface
            .focus_cell(key)
            .ok_or_else(|| EntryError::UnknownCell(key.to_string()))
    }

    /// Only Enter moves focus; other keys belong to the field itself.
    pub fn key_down(&mut self, key: &str) -> Option<Focus> {
        match key {
            "Enter" => self.surface.enter(),
            _ => self.surface.focus(),
        }
    }

    pub fn set_page(&mut self, page: usize) -> Result<(), EntryError> {
        if self.surface.set_page(page) {
            Ok(())
        } else {
            Err(EntryError::BadScope(format!(
                "page {} out of range (0..{})",
                page,
                self.surface.page_count()
            )))
        }
    }

    pub fn validate(&self) -> Diff {
        validate::diff(
            &self.baseline,
            &self.draft,
            &self.surface.full_marks(),
            &self.surface.all_cells(),
        )
    }

    fn start_job(&mut self, entries: Vec<ChangedEntry>) -> SaveJob {
        let job_id = self.scheduler.begin();
        debug!(session = %self.id, job_id, entries = entries.len(), "save started");
        self.push_status_if_changed();
        SaveJob {
            session_id: self.id.clone(),
            job_id,
            exam_id: self.scope.exam_id.clone(),
            origin: self.origin.clone(),
            entries,
        }
    }

    /// Runs the validator over the current draft. `Err` carries the per-cell
    /// errors when the save is blocked.
    fn prepare(&mut self) -> Result<Vec<ChangedEntry>, BTreeMap<String, String>> {
        let diff = self.validate();
        self.errors = diff.errors.clone();
        if diff.is_blocked() {
            self.scheduler
                .block(format!("{} cell(s) failed validation", diff.errors.len()));
            self.push_status_if_changed();
            return Err(diff.errors);
        }
        Ok(diff.payload)
    }

    /// Called from the event loop: fires the debounced save if its quiet
    /// period has elapsed.
    pub fn poll_due(&mut self, now: Instant) -> Option<SaveJob> {
        if !self.scheduler.is_due(now) {
            return None;
        }
        let payload = self.prepare().ok()?;
        if payload.is_empty() {
            self.scheduler.settle_noop();
            self.push_status_if_changed();
            return None;
        }
        Some(self.start_job(payload))
    }

    pub fn save_now(&mut self) -> SaveNow {
        if !self.scheduler.request_now() {
            return SaveNow::Queued;
        }
        match self.prepare() {
            Err(errors) => SaveNow::Blocked(errors),
            Ok(payload) if payload.is_empty() => {
                self.scheduler.settle_noop();
                self.push_status_if_changed();
                SaveNow::NothingToSave
            }
            Ok(payload) => SaveNow::Started(self.start_job(payload)),
        }
    }

    /// Resolves a save. On success the scope is refetched so the baseline
    /// matches what the store now holds; on failure the draft is left as
    /// is. Returns `false` for an outcome that does not belong to the save
    /// in flight.
    pub fn complete_save(
        &mut self,
        backend: &dyn MarkBackend,
        job_id: u64,
        outcome: Result<SaveReceipt, String>,
        now: Instant,
    ) -> bool {
        let result = outcome.as_ref().map(|_| ()).map_err(|e| e.clone());
        if !self.scheduler.finish(job_id, result, now) {
            return false;
        }
        match outcome {
            Ok(receipt) => {
                info!(session = %self.id, job_id, saved = receipt.saved, "save confirmed");
                if let Err(e) = self.reload(backend) {
                    warn!(session = %self.id, error = %e, "refetch after save failed");
                    self.events.push(SessionEvent::SyncError(e.to_string()));
                }
            }
            Err(reason) => {
                warn!(session = %self.id, job_id, %reason, "save failed");
            }
        }
        self.push_status_if_changed();
        true
    }

    /// Refetches the scope and reconciles: cells without pending edits take
    /// the server value, cells with pending edits keep them unless the
    /// server already holds the same mark (compared as saved, so `"85.0"`
    /// matches a stored 85 and text under absent/expelled is ignored).
    pub fn reload(&mut self, backend: &dyn MarkBackend) -> Result<(), EntryError> {
        let data = backend.fetch_scope(&self.scope)?;
        let groups = scope::resolve(&self.scope, data, self.config.max_scope_rows)?;
        self.surface.replace_groups(groups);
        let examinees: Vec<_> = self.surface.examinees().cloned().collect();
        let fresh = DraftStore::seed(&examinees);

        let mut draft = fresh.clone();
        for (ex, subj, server) in fresh.iter() {
            let local = self.draft.get(ex, subj);
            let old_base = self.baseline.get(ex, subj);
            if let Some(local) = local {
                let pending = old_base.map_or(true, |b| validate::is_changed(b, local));
                if pending && !validate::same_mark(local, server) {
                    draft.replace(ex, subj, local.clone());
                }
            }
        }
        self.baseline = fresh;
        self.draft = draft;
        let baseline = &self.baseline;
        let current = &self.draft;
        self.errors.retain(|key, _| {
            key.split_once(':').is_some_and(|(ex, subj)| {
                match (baseline.get(ex, subj), current.get(ex, subj)) {
                    (Some(b), Some(c)) => validate::is_changed(b, c),
                    _ => false,
                }
            })
        });
        self.events.push(SessionEvent::Reloaded);
        Ok(())
    }

    /// Polls the change feed when its interval has elapsed. A failing feed
    /// is reported once and retried on the next interval; it never stops
    /// local editing.
    pub fn poll_feed(&mut self, backend: &dyn MarkBackend, now: Instant) -> Option<MergeReport> {
        if now < self.next_feed_poll {
            return None;
        }
        self.next_feed_poll = now + self.config.feed_poll();

        if self.subscriber.is_none() {
            match LiveSubscriber::subscribe(backend, &self.scope, &self.origin) {
                Ok(s) => self.subscriber = Some(s),
                Err(e) => {
                    self.note_feed_error(e.to_string());
                    return None;
                }
            }
        }
        let polled = match self.subscriber.as_mut() {
            Some(sub) => sub.poll(backend),
            None => return None,
        };
        match polled {
            Ok(changes) => {
                if self.feed_failing {
                    info!(session = %self.id, "feed recovered");
                }
                self.feed_failing = false;
                if changes.is_empty() {
                    return None;
                }
                let report = self.apply_remote(&changes);
                // Changes for cells outside this scope merge nothing.
                (!report.is_empty()).then_some(report)
            }
            Err(e) => {
                self.note_feed_error(e.to_string());
                None
            }
        }
    }

    fn note_feed_error(&mut self, message: String) {
        if !self.feed_failing {
            warn!(session = %self.id, error = %message, "feed poll failed");
            self.events.push(SessionEvent::FeedError(message));
        }
        self.feed_failing = true;
    }

    pub fn apply_remote(&mut self, changes: &[crate::model::MarkChange]) -> MergeReport {
        let surface = &self.surface;
        let report = feed::merge(
            changes,
            &mut self.baseline,
            &mut self.draft,
            self.config.conflict_policy,
            |key| surface.contains(key),
        );
        if !report.conflicts.is_empty() {
            warn!(
                session = %self.id,
                conflicts = report.conflicts.len(),
                "peer changes hit cells with unsaved edits"
            );
            self.events
                .push(SessionEvent::Conflicts(report.conflicts.clone()));
        }
        if !report.merged.is_empty() {
            self.events.push(SessionEvent::RemoteMerged(report.clone()));
        }
        report
    }

    /// Earliest instant the event loop needs to call back in.
    pub fn next_wakeup(&self) -> Instant {
        match self.scheduler.deadline() {
            Some(d) if !self.scheduler.is_saving() => d.min(self.next_feed_poll),
            _ => self.next_feed_poll,
        }
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.scheduler.in_flight()
    }

    fn dirty_count(&self) -> usize {
        self.draft
            .iter()
            .filter(|(ex, subj, cell)| {
                let base = self.baseline.get(ex, subj).cloned().unwrap_or_default();
                validate::is_changed(&base, cell)
            })
            .count()
    }

    pub fn status(&self) -> StatusView {
        StatusView {
            status: self.scheduler.status(),
            error: self.scheduler.last_error().map(str::to_string),
            in_flight: self.scheduler.is_saving(),
            pending_changes: self.dirty_count(),
            errors: self.errors.clone(),
        }
    }

    fn push_status_if_changed(&mut self) {
        let status = self.scheduler.status();
        if status != self.last_status {
            self.last_status = status;
            let view = self.status();
            self.events.push(SessionEvent::SaveStatus(view));
        }
    }

    pub fn view(&self) -> GridView {
        let disabled = self.inputs_locked();
        let empty = DraftCell::default();
        self.surface.render(|ex, subject| {
            let key = CellKey::new(&ex.id, &subject.id);
            let current = self.draft.get(&ex.id, &subject.id).unwrap_or(&empty);
            let base = self.baseline.get(&ex.id, &subject.id).unwrap_or(&empty);
            CellView {
                subject_id: subject.id.clone(),
                value: cell::display_value(current).to_string(),
                status: current.status,
                dirty: validate::is_changed(base, current),
                disabled,
                error: self.errors.get(&key.to_string()).cloned(),
                hints: cell::hints(subject),
            }
        })
    }

    pub fn progress(&self) -> Progress {
        let mut subjects: Vec<SubjectProgress> = Vec::new();
        let mut total = 0;
        for group in self.surface.groups() {
            for subject in &group.subjects {
                let idx = match subjects.iter().position(|p| p.subject_id == subject.id) {
                    Some(i) => i,
                    None => {
                        subjects.push(SubjectProgress {
                            subject_id: subject.id.clone(),
                            name: subject.name.clone(),
                            ..Default::default()
                        });
                        subjects.len() - 1
                    }
                };
                let sitting = group
                    .examinees
                    .iter()
                    .filter(|ex| grid::row_subjects(group, ex).any(|s| s.id == subject.id));
                for ex in sitting {
                    total += 1;
                    let cell = self.draft.get(&ex.id, &subject.id);
                    let p = &mut subjects[idx];
                    match cell.map(|c| (c.status, c.value.trim().is_empty())) {
                        Some((MarkStatus::Absent, _)) => p.absent += 1,
                        Some((MarkStatus::Expelled, _)) => p.expelled += 1,
                        Some((MarkStatus::Present, false)) => p.entered += 1,
                        _ => p.missing += 1,
                    }
                }
            }
        }
        Progress {
            total_cells: total,
            dirty: self.dirty_count(),
            errors: self.errors.len(),
            subjects,
        }
    }

    /// Teardown: cancels the debounce and drops the feed subscription.
    pub fn close(&mut self) {
        self.scheduler.cancel();
        self.subscriber = None;
        info!(session = %self.id, "scope closed");
    }
}
