use crate::backend::{FeedFilter, MarkBackend};
use crate::config::ConflictPolicy;
use crate::draft::{DraftCell, DraftStore};
use crate::model::{CellKey, EntryScope, MarkChange, StoredMark};
use crate::validate;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub examinee_id: String,
    pub subject_id: String,
    pub local: DraftCell,
    pub remote: DraftCell,
    /// `true` when the local value was replaced.
    pub overwritten: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub merged: Vec<String>,
    pub conflicts: Vec<Conflict>,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty() && self.conflicts.is_empty()
    }
}

/// A cursor into the change feed for one scope. Dropped and recreated
/// whenever the scope changes.
#[derive(Debug)]
pub struct LiveSubscriber {
    filter: FeedFilter,
    origin: String,
    cursor: i64,
}

impl LiveSubscriber {
    pub fn subscribe(
        backend: &dyn MarkBackend,
        scope: &EntryScope,
        origin: &str,
    ) -> anyhow::Result<Self> {
        let filter = FeedFilter::for_scope(scope);
        let cursor = backend.feed_head(&filter)?;
        debug!(exam = %filter.exam_id, cursor, "feed subscribed");
        Ok(Self {
            filter,
            origin: origin.to_string(),
            cursor,
        })
    }

    /// Pulls new events, dropping the ones this operator wrote itself.
    pub fn poll(&mut self, backend: &dyn MarkBackend) -> anyhow::Result<Vec<MarkChange>> {
        let changes = backend.changes_since(&self.filter, self.cursor)?;
        if let Some(last) = changes.iter().map(|c| c.seq).max() {
            self.cursor = self.cursor.max(last);
        }
        Ok(changes
            .into_iter()
            .filter(|c| c.origin != self.origin)
            .collect())
    }
}

/// Applies peer changes to the baseline and, per `policy`, to the draft.
/// Changes for cells outside the loaded scope are ignored.
pub fn merge(
    changes: &[MarkChange],
    baseline: &mut DraftStore,
    draft: &mut DraftStore,
    policy: ConflictPolicy,
    loaded: impl Fn(&CellKey) -> bool,
) -> MergeReport {
    let mut report = MergeReport::default();
    for change in changes {
        let key = CellKey::new(&change.examinee_id, &change.subject_id);
        if !loaded(&key) {
            continue;
        }
        let remote = DraftCell::from_stored(&StoredMark {
            obtained_marks: change.obtained_marks,
            status: change.status,
        });
        let base = baseline
            .get(&key.examinee_id, &key.subject_id)
            .cloned()
            .unwrap_or_default();
        let local = draft
            .get(&key.examinee_id, &key.subject_id)
            .cloned()
            .unwrap_or_default();
        let pending = validate::is_changed(&base, &local);

        baseline.replace(&key.examinee_id, &key.subject_id, remote.clone());

        let clashes = pending && !validate::same_mark(&local, &remote);
        match policy {
            ConflictPolicy::RemoteWins => {
                draft.replace(&key.examinee_id, &key.subject_id, remote.clone());
                report.merged.push(key.to_string());
            }
            ConflictPolicy::KeepLocal if !pending => {
                draft.replace(&key.examinee_id, &key.subject_id, remote.clone());
                report.merged.push(key.to_string());
            }
            ConflictPolicy::KeepLocal => {}
        }
        if clashes {
            report.conflicts.push(Conflict {
                examinee_id: key.examinee_id.clone(),
                subject_id: key.subject_id.clone(),
                local,
                remote,
                overwritten: policy == ConflictPolicy::RemoteWins,
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarkStatus;

    fn change(
        seq: i64,
        ex: &str,
        subj: &str,
        marks: Option<f64>,
        status: MarkStatus,
    ) -> MarkChange {
        MarkChange {
            seq,
            examinee_id: ex.into(),
            subject_id: subj.into(),
            marhala_id: "m".into(),
            obtained_marks: marks,
            status,
            origin: "peer".into(),
        }
    }

    fn stores() -> (DraftStore, DraftStore) {
        let mut base = DraftStore::new();
        base.replace("a", "s1", DraftCell::default());
        base.replace("a", "s2", DraftCell::default());
        (base.clone(), base)
    }

    #[test]
    fn untouched_cell_takes_remote_value() {
        let (mut base, mut draft) = stores();
        let report = merge(
            &[change(1, "a", "s1", Some(60.0), MarkStatus::Present)],
            &mut base,
            &mut draft,
            ConflictPolicy::RemoteWins,
            |_| true,
        );
        assert_eq!(draft.get("a", "s1"), Some(&DraftCell::present("60")));
        assert_eq!(base.get("a", "s1"), Some(&DraftCell::present("60")));
        assert_eq!(report.merged, vec!["a:s1".to_string()]);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn remote_wins_overwrites_pending_edit_and_reports_it() {
        let (mut base, mut draft) = stores();
        draft.replace("a", "s2", DraftCell::present("45"));
        let report = merge(
            &[change(2, "a", "s2", None, MarkStatus::Absent)],
            &mut base,
            &mut draft,
            ConflictPolicy::RemoteWins,
            |_| true,
        );
        assert_eq!(draft.get("a", "s2").map(|c| c.status), Some(MarkStatus::Absent));
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].overwritten);
        assert_eq!(report.conflicts[0].local, DraftCell::present("45"));
    }

    #[test]
    fn keep_local_moves_only_the_baseline() {
        let (mut base, mut draft) = stores();
        draft.replace("a", "s1", DraftCell::present("45"));
        let report = merge(
            &[change(3, "a", "s1", Some(50.0), MarkStatus::Present)],
            &mut base,
            &mut draft,
            ConflictPolicy::KeepLocal,
            |_| true,
        );
        assert_eq!(draft.get("a", "s1"), Some(&DraftCell::present("45")));
        assert_eq!(base.get("a", "s1"), Some(&DraftCell::present("50")));
        assert!(report.merged.is_empty());
        assert!(!report.conflicts[0].overwritten);
    }

    #[test]
    fn identical_pending_value_is_not_a_conflict() {
        let (mut base, mut draft) = stores();
        draft.replace("a", "s1", DraftCell::present("50"));
        let report = merge(
            &[change(4, "a", "s1", Some(50.0), MarkStatus::Present)],
            &mut base,
            &mut draft,
            ConflictPolicy::RemoteWins,
            |_| true,
        );
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn changes_outside_scope_are_ignored() {
        let (mut base, mut draft) = stores();
        let report = merge(
            &[change(5, "zz", "s1", Some(1.0), MarkStatus::Present)],
            &mut base,
            &mut draft,
            ConflictPolicy::RemoteWins,
            |k| k.examinee_id == "a",
        );
        assert!(report.is_empty());
        assert!(draft.get("zz", "s1").is_none());
    }

    #[test]
    fn pending_edit_equal_to_remote_mark_is_not_a_conflict() {
        let (mut base, mut draft) = stores();
        draft.replace("a", "s1", DraftCell::present("50.0"));
        draft.replace(
            "a",
            "s2",
            DraftCell {
                value: "12".into(),
                status: MarkStatus::Absent,
            },
        );
        let report = merge(
            &[
                change(6, "a", "s1", Some(50.0), MarkStatus::Present),
                change(7, "a", "s2", None, MarkStatus::Absent),
            ],
            &mut base,
            &mut draft,
            ConflictPolicy::KeepLocal,
            |_| true,
        );
        assert!(report.conflicts.is_empty());
    }
}
