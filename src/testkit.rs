//! In-memory [`MarkBackend`] for unit tests.

use crate::backend::{FeedFilter, FilterOptions, MarkBackend};
use crate::model::{
    ChangedEntry, EntryScope, Examinee, MarhalaInfo, MarkChange, MarkStatus, SaveReceipt,
    ScopeData, ScopeMode, StoredMark, Subject,
};
use anyhow::anyhow;
use std::cell::{Cell, RefCell};

#[derive(Default)]
pub struct MemoryBackend {
    pub examinees: RefCell<Vec<Examinee>>,
    pub marhalas: Vec<MarhalaInfo>,
    pub events: RefCell<Vec<MarkChange>>,
    pub save_calls: RefCell<Vec<Vec<ChangedEntry>>>,
    pub fail_saves: Cell<bool>,
    pub fail_feed: Cell<bool>,
}

pub fn subject(id: &str, full_marks: i64) -> Subject {
    Subject {
        id: id.into(),
        name: format!("Kitab {id}"),
        full_marks,
    }
}

impl MemoryBackend {
    /// One examinee per id in marhala `m1`, roll numbers from 1, each taking
    /// subjects `1` and `2` out of 100.
    pub fn with_examinees(ids: &[&str]) -> Self {
        let subjects = vec![subject("1", 100), subject("2", 100)];
        let examinees = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Examinee {
                id: id.to_string(),
                roll_number: i as i64 + 1,
                name: format!("Examinee {id}"),
                marhala_id: "m1".into(),
                subjects: subjects.clone(),
                marks: Default::default(),
            })
            .collect();
        Self {
            examinees: RefCell::new(examinees),
            marhalas: vec![MarhalaInfo {
                id: "m1".into(),
                name: "Mutawassitah".into(),
                sort_order: 1,
            }],
            ..Default::default()
        }
    }

    /// Writes a mark as another operator would: store plus feed event.
    pub fn peer_write(
        &self,
        examinee: &str,
        subject: &str,
        marks: Option<f64>,
        status: MarkStatus,
    ) {
        self.write(examinee, subject, marks, status, "peer");
    }

    fn write(
        &self,
        examinee: &str,
        subject: &str,
        marks: Option<f64>,
        status: MarkStatus,
        origin: &str,
    ) {
        let mut examinees = self.examinees.borrow_mut();
        let Some(ex) = examinees.iter_mut().find(|e| e.id == examinee) else {
            return;
        };
        ex.marks.insert(
            subject.to_string(),
            StoredMark {
                obtained_marks: marks,
                status,
            },
        );
        let mut events = self.events.borrow_mut();
        let seq = events.len() as i64 + 1;
        events.push(MarkChange {
            seq,
            examinee_id: examinee.into(),
            subject_id: subject.into(),
            marhala_id: ex.marhala_id.clone(),
            obtained_marks: marks,
            status,
            origin: origin.into(),
        });
    }

    pub fn stored(&self, examinee: &str, subject: &str) -> Option<StoredMark> {
        self.examinees
            .borrow()
            .iter()
            .find(|e| e.id == examinee)?
            .marks
            .get(subject)
            .copied()
    }
}

impl MarkBackend for MemoryBackend {
    fn fetch_scope(&self, scope: &EntryScope) -> anyhow::Result<ScopeData> {
        let examinees = self
            .examinees
            .borrow()
            .iter()
            .filter(|e| match &scope.mode {
                ScopeMode::RollRange { start, end } => (*start..=*end).contains(&e.roll_number),
                _ => true,
            })
            .cloned()
            .collect();
        Ok(ScopeData {
            examinees,
            marhalas: self.marhalas.clone(),
        })
    }

    fn bulk_save(
        &self,
        _exam_id: &str,
        origin: &str,
        entries: &[ChangedEntry],
    ) -> anyhow::Result<SaveReceipt> {
        self.save_calls.borrow_mut().push(entries.to_vec());
        if self.fail_saves.get() {
            return Err(anyhow!("connection reset by peer"));
        }
        for e in entries {
            self.write(&e.examinee_id, &e.subject_id, e.obtained_marks, e.status, origin);
        }
        Ok(SaveReceipt {
            saved: entries.len(),
            last_seq: self.events.borrow().len() as i64,
        })
    }

    fn feed_head(&self, _filter: &FeedFilter) -> anyhow::Result<i64> {
        Ok(self.events.borrow().len() as i64)
    }

    fn changes_since(&self, _filter: &FeedFilter, cursor: i64) -> anyhow::Result<Vec<MarkChange>> {
        if self.fail_feed.get() {
            return Err(anyhow!("feed unavailable"));
        }
        Ok(self
            .events
            .borrow()
            .iter()
            .filter(|c| c.seq > cursor)
            .cloned()
            .collect())
    }

    fn filter_options(&self, _exam_id: Option<&str>) -> anyhow::Result<FilterOptions> {
        Ok(FilterOptions::default())
    }
}
