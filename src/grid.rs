use crate::cell::InputHints;
use crate::model::{CellKey, Examinee, MarhalaGroup, MarkStatus, Subject};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One table for a single subject set, paged.
    Flat { page_size: usize },
    /// One table per marhala group, unpaged.
    Grouped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Focus {
    pub index: usize,
    /// Whether the field content should be selected on focus.
    pub select: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    pub subject_id: String,
    pub value: String,
    pub status: MarkStatus,
    pub dirty: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hints: InputHints,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub examinee_id: String,
    pub roll_number: i64,
    pub name: String,
    pub cells: Vec<CellView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub marhala_id: String,
    pub marhala_name: String,
    pub subjects: Vec<Subject>,
    pub rows: Vec<RowView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusView {
    pub index: usize,
    pub select: bool,
    pub examinee_id: String,
    pub subject_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub layout: &'static str,
    pub page: usize,
    pub page_count: usize,
    pub tables: Vec<TableView>,
    pub focus: Option<FocusView>,
}

/// Columns of `group` that `ex` actually sits, in column order. Examiner
/// scopes can give examinees of one marhala different kitabs.
pub fn row_subjects<'a>(
    group: &'a MarhalaGroup,
    ex: &'a Examinee,
) -> impl Iterator<Item = &'a Subject> + 'a {
    group
        .subjects
        .iter()
        .filter(move |s| ex.subjects.iter().any(|own| own.id == s.id))
}

/// The entry surface shared by both arrangements. Row/column resolution is
/// the only thing that differs between them; focus, paging and cell
/// rendering are common.
#[derive(Debug)]
pub struct EntrySurface {
    layout: Layout,
    groups: Vec<MarhalaGroup>,
    page: usize,
    focus: Option<Focus>,
}

impl EntrySurface {
    pub fn new(layout: Layout, groups: Vec<MarhalaGroup>) -> Self {
        Self {
            layout,
            groups,
            page: 0,
            focus: None,
        }
    }

    pub fn groups(&self) -> &[MarhalaGroup] {
        &self.groups
    }

    pub fn page_count(&self) -> usize {
        match self.layout {
            Layout::Grouped => 1,
            Layout::Flat { page_size } => {
                let rows: usize = self.groups.iter().map(|g| g.examinees.len()).sum();
                rows.div_ceil(page_size.max(1)).max(1)
            }
        }
    }

    pub fn examinees(&self) -> impl Iterator<Item = &Examinee> {
        self.groups.iter().flat_map(|g| g.examinees.iter())
    }

    /// subject id -> full marks over every loaded group.
    pub fn full_marks(&self) -> HashMap<String, i64> {
        self.groups
            .iter()
            .flat_map(|g| g.subjects.iter())
            .map(|s| (s.id.clone(), s.full_marks))
            .collect()
    }

    /// Rows visible on the current page, grouped as rendered.
    fn visible(&self) -> Vec<(&MarhalaGroup, &[Examinee])> {
        match self.layout {
            Layout::Grouped => self
                .groups
                .iter()
                .map(|g| (g, g.examinees.as_slice()))
                .collect(),
            Layout::Flat { page_size } => {
                let size = page_size.max(1);
                let start = self.page * size;
                self.groups
                    .first()
                    .map(|g| {
                        let end = (start + size).min(g.examinees.len());
                        let rows = g.examinees.get(start..end).unwrap_or(&[]);
                        vec![(g, rows)]
                    })
                    .unwrap_or_default()
            }
        }
    }

    /// Row-major linearization of the visible cells; the order Enter walks.
    pub fn visible_cells(&self) -> Vec<CellKey> {
        let mut out = Vec::new();
        for (group, rows) in self.visible() {
            for ex in rows {
                for s in row_subjects(group, ex) {
                    out.push(CellKey::new(&ex.id, &s.id));
                }
            }
        }
        out
    }

    /// Every loaded cell in grid order, across all pages.
    pub fn all_cells(&self) -> Vec<CellKey> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.examinees.iter().flat_map(move |ex| {
                    row_subjects(g, ex).map(move |s| CellKey::new(&ex.id, &s.id))
                })
            })
            .collect()
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.groups.iter().any(|g| {
            g.examinees.iter().any(|e| {
                e.id == key.examinee_id && row_subjects(g, e).any(|s| s.id == key.subject_id)
            })
        })
    }

    pub fn focus(&self) -> Option<Focus> {
        self.focus
    }

    pub fn focused_key(&self) -> Option<CellKey> {
        let f = self.focus?;
        self.visible_cells().into_iter().nth(f.index)
    }

    /// Focuses a cell on the current page. Returns its linear index.
    pub fn focus_cell(&mut self, key: &CellKey) -> Option<usize> {
        let index = self.visible_cells().iter().position(|k| k == key)?;
        self.focus = Some(Focus {
            index,
            select: false,
        });
        Some(index)
    }

    /// Enter: move to the next linear cell and select its content. The last
    /// cell keeps focus; with nothing focused the first cell is taken.
    pub fn enter(&mut self) -> Option<Focus> {
        let len = self.visible_cells().len();
        if len == 0 {
            self.focus = None;
            return None;
        }
        let index = match self.focus {
            Some(f) => (f.index + 1).min(len - 1),
            None => 0,
        };
        self.focus = Some(Focus {
            index,
            select: true,
        });
        self.focus
    }

    pub fn set_page(&mut self, page: usize) -> bool {
        if page >= self.page_count() {
            return false;
        }
        self.page = page;
        self.clamp_focus();
        true
    }

    /// Swaps in freshly fetched groups. Page and focused index are kept
    /// (clamped) so a reload does not interrupt typing.
    pub fn replace_groups(&mut self, groups: Vec<MarhalaGroup>) {
        self.groups = groups;
        self.page = self.page.min(self.page_count() - 1);
        self.clamp_focus();
    }

    fn clamp_focus(&mut self) {
        let len = self.visible_cells().len();
        self.focus = match self.focus {
            Some(_) if len == 0 => None,
            Some(f) => Some(Focus {
                index: f.index.min(len - 1),
                select: f.select,
            }),
            None => None,
        };
    }

    pub fn render(&self, mut cell: impl FnMut(&Examinee, &Subject) -> CellView) -> GridView {
        let tables = self
            .visible()
            .into_iter()
            .map(|(group, rows)| TableView {
                marhala_id: group.marhala_id.clone(),
                marhala_name: group.marhala_name.clone(),
                subjects: group.subjects.clone(),
                rows: rows
                    .iter()
                    .map(|ex| RowView {
                        examinee_id: ex.id.clone(),
                        roll_number: ex.roll_number,
                        name: ex.name.clone(),
                        cells: row_subjects(group, ex).map(|s| cell(ex, s)).collect(),
                    })
                    .collect(),
            })
            .collect();

        let focus = self.focus.and_then(|f| {
            let key = self.focused_key()?;
            Some(FocusView {
                index: f.index,
                select: f.select,
                examinee_id: key.examinee_id,
                subject_id: key.subject_id,
            })
        });

        GridView {
            layout: match self.layout {
                Layout::Flat { .. } => "flat",
                Layout::Grouped => "grouped",
            },
            page: self.page,
            page_count: self.page_count(),
            tables,
            focus,
        }
    }
}
