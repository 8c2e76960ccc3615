use crate::model::{ChangedEntry, EntryScope, MarkChange, SaveReceipt, ScopeData};
use serde::Serialize;

/// Narrows the change feed: always by exam, by marhala when the scope
/// names one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub exam_id: String,
    pub marhala_id: Option<String>,
}

impl FeedFilter {
    pub fn for_scope(scope: &EntryScope) -> Self {
        Self {
            exam_id: scope.exam_id.clone(),
            marhala_id: scope.marhala_id().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub exams: Vec<NamedRef>,
    pub markaz: Vec<NamedRef>,
    pub marhalas: Vec<NamedRef>,
    pub examiners: Vec<NamedRef>,
}

/// The three collaborators the entry engine talks to: scope fetch, bulk
/// save and the change feed.
pub trait MarkBackend {
    fn fetch_scope(&self, scope: &EntryScope) -> anyhow::Result<ScopeData>;

    /// All-or-nothing upsert of `entries`. `origin` tags the resulting feed
    /// events so the writer can recognise its own changes.
    fn bulk_save(
        &self,
        exam_id: &str,
        origin: &str,
        entries: &[ChangedEntry],
    ) -> anyhow::Result<SaveReceipt>;

    /// Cursor to start a fresh subscription from.
    fn feed_head(&self, filter: &FeedFilter) -> anyhow::Result<i64>;

    fn changes_since(&self, filter: &FeedFilter, cursor: i64) -> anyhow::Result<Vec<MarkChange>>;

    fn filter_options(&self, exam_id: Option<&str>) -> anyhow::Result<FilterOptions>;
}
