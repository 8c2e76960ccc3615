use crate::error::EntryError;
use crate::model::{EntryScope, Examinee, MarhalaGroup, MarhalaInfo, ScopeData, ScopeMode};
use std::collections::HashMap;

fn opt_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<Option<&'a str>, EntryError> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match v.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => Ok(Some(s)),
            _ => Err(EntryError::BadScope(format!("{} must be a non-empty string", key))),
        },
    }
}

/// Builds an [`EntryScope`] from request params. Exactly one of
/// `markazId`, `rollRange` or `examinerId` must be given.
pub fn parse(params: &serde_json::Value) -> Result<EntryScope, EntryError> {
    let Some(exam_id) = opt_str(params, "examId")? else {
        return Err(EntryError::BadScope("missing examId".into()));
    };
    let markaz_id = opt_str(params, "markazId")?;
    let examiner_id = opt_str(params, "examinerId")?;
    let marhala_id = opt_str(params, "marhalaId")?;
    let roll_range = match params.get("rollRange") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let start = v.get("start").and_then(|x| x.as_i64());
            let end = v.get("end").and_then(|x| x.as_i64());
            match (start, end) {
                (Some(s), Some(e)) => Some((s, e)),
                _ => {
                    return Err(EntryError::BadScope(
                        "rollRange needs integer start and end".into(),
                    ))
                }
            }
        }
    };

    let modes = [markaz_id.is_some(), roll_range.is_some(), examiner_id.is_some()]
        .iter()
        .filter(|m| **m)
        .count();
    if modes != 1 {
        return Err(EntryError::BadScope(
            "exactly one of markazId, rollRange, examinerId is required".into(),
        ));
    }
    if marhala_id.is_some() && markaz_id.is_none() {
        return Err(EntryError::BadScope(
            "marhalaId is only valid together with markazId".into(),
        ));
    }

    let mode = if let Some(markaz_id) = markaz_id {
        ScopeMode::Markaz {
            markaz_id: markaz_id.to_string(),
            marhala_id: marhala_id.map(str::to_string),
        }
    } else if let Some((start, end)) = roll_range {
        if start <= 0 || end <= 0 {
            return Err(EntryError::BadScope("roll numbers must be positive".into()));
        }
        if start > end {
            return Err(EntryError::BadScope(format!(
                "rollRange start {} is after end {}",
                start, end
            )));
        }
        ScopeMode::RollRange { start, end }
    } else {
        ScopeMode::Examiner {
            examiner_id: examiner_id.unwrap_or_default().to_string(),
        }
    };

    Ok(EntryScope {
        exam_id: exam_id.to_string(),
        mode,
    })
}

/// Partitions examinees by marhala. Groups come out in marhala sort order
/// and examinees by roll number. A group's columns are every kitab any of
/// its examinees sits, in order of first appearance.
pub fn group_by_marhala(examinees: &[Examinee], marhalas: &[MarhalaInfo]) -> Vec<MarhalaGroup> {
    let info: HashMap<&str, &MarhalaInfo> = marhalas.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut groups: Vec<MarhalaGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for ex in examinees {
        let i = *index.entry(ex.marhala_id.clone()).or_insert_with(|| {
            groups.push(MarhalaGroup {
                marhala_id: ex.marhala_id.clone(),
                marhala_name: info
                    .get(ex.marhala_id.as_str())
                    .map(|m| m.name.clone())
                    .unwrap_or_else(|| ex.marhala_id.clone()),
                subjects: Vec::new(),
                examinees: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[i];
        for subject in &ex.subjects {
            if !group.subjects.iter().any(|s| s.id == subject.id) {
                group.subjects.push(subject.clone());
            }
        }
        group.examinees.push(ex.clone());
    }

    let order = |id: &str| info.get(id).map(|m| m.sort_order).unwrap_or(i64::MAX);
    groups.sort_by(|a, b| {
        order(&a.marhala_id)
            .cmp(&order(&b.marhala_id))
            .then_with(|| a.marhala_id.cmp(&b.marhala_id))
    });
    for g in &mut groups {
        g.examinees.sort_by_key(|e| e.roll_number);
    }
    groups
}

/// Checks fetched data against the scope's shape: size cap, and a flat
/// grid must not mix grading schemes.
pub fn resolve(
    scope: &EntryScope,
    data: ScopeData,
    max_rows: usize,
) -> Result<Vec<MarhalaGroup>, EntryError> {
    if data.examinees.len() > max_rows {
        return Err(EntryError::ScopeTooLarge {
            rows: data.examinees.len(),
            max: max_rows,
        });
    }
    let groups = group_by_marhala(&data.examinees, &data.marhalas);
    if !scope.is_grouped() && groups.len() > 1 {
        return Err(EntryError::AmbiguousScope {
            marhalas: groups.iter().map(|g| g.marhala_id.clone()).collect(),
        });
    }
    Ok(groups)
}
