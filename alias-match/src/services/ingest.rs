//! Row I/O and input integrity
//!
//! Rows travel as a JSON array of objects. `record_id`, `full_name` and
//! `partition` are required; any other column is carried through untouched.
//! Every problem in a file is collected before failing.

use crate::error::{MatchError, MatchResult};
use crate::models::{ConfidenceTier, MatchSource, NameEntry, NewFeedback};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Columns added by resolution
pub const RESULT_COLUMNS: &[&str] = &["assigned_alias", "confidence_tier", "match_source", "evidence_text"];

/// Which side of a resolution run a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Rows to resolve; result columns, if present, are discarded
    Input,
    /// Resolved rows; result columns are parsed and checked
    Output,
}

fn required_text(row: &Map<String, Value>, field: &str, idx: usize, problems: &mut Vec<String>) -> String {
    match row.get(field) {
        None | Some(Value::Null) => {
            problems.push(format!("row {}: missing {}", idx, field));
            String::new()
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            problems.push(format!("row {}: empty {}", idx, field));
            String::new()
        }
        Some(Value::String(s)) => s.clone(),
        // Spreadsheet exports often carry numeric ids
        Some(Value::Number(n)) if field == "record_id" => n.to_string(),
        Some(other) => {
            problems.push(format!("row {}: {} must be a string, got {}", idx, field, other));
            String::new()
        }
    }
}

fn optional_text(row: &Map<String, Value>, field: &str, idx: usize, problems: &mut Vec<String>) -> Option<String> {
    match row.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            problems.push(format!("row {}: {} must be a string, got {}", idx, field, other));
            None
        }
    }
}

/// Parse rows from a JSON value
pub fn parse_rows(value: Value, kind: RowKind) -> MatchResult<Vec<NameEntry>> {
    let rows = match value {
        Value::Array(rows) => rows,
        other => {
            return Err(MatchError::InputIntegrity(vec![format!(
                "expected a JSON array of rows, got {}",
                json_kind(&other)
            )]))
        }
    };

    let mut problems = Vec::new();
    let mut entries = Vec::with_capacity(rows.len());
    let mut seen_ids = HashSet::new();

    for (idx, row) in rows.into_iter().enumerate() {
        let row = match row {
            Value::Object(map) => map,
            other => {
                problems.push(format!("row {}: expected an object, got {}", idx, json_kind(&other)));
                continue;
            }
        };

        let record_id = required_text(&row, "record_id", idx, &mut problems);
        let full_name = required_text(&row, "full_name", idx, &mut problems);
        let partition = required_text(&row, "partition", idx, &mut problems);

        if !record_id.is_empty() && !seen_ids.insert(record_id.clone()) {
            problems.push(format!("row {}: duplicate record_id '{}'", idx, record_id));
        }

        let mut entry = NameEntry::new(record_id, full_name, partition);

        if kind == RowKind::Output {
            entry.assigned_alias = optional_text(&row, "assigned_alias", idx, &mut problems)
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());
            entry.evidence_text =
                optional_text(&row, "evidence_text", idx, &mut problems).unwrap_or_default();

            if let Some(tier) = optional_text(&row, "confidence_tier", idx, &mut problems) {
                match ConfidenceTier::parse(&tier) {
                    Some(tier) => entry.confidence_tier = tier,
                    None => problems.push(format!("row {}: unknown confidence_tier '{}'", idx, tier)),
                }
            }
            match optional_text(&row, "match_source", idx, &mut problems) {
                Some(source) => match MatchSource::parse(&source) {
                    Some(source) => entry.match_source = source,
                    None => problems.push(format!("row {}: unknown match_source '{}'", idx, source)),
                },
                None => problems.push(format!("row {}: missing match_source", idx)),
            }
        }

        entry.extra = row
            .into_iter()
            .filter(|(key, _)| {
                !matches!(key.as_str(), "record_id" | "full_name" | "partition")
                    && !RESULT_COLUMNS.contains(&key.as_str())
            })
            .collect::<BTreeMap<_, _>>();

        entries.push(entry);
    }

    if problems.is_empty() {
        Ok(entries)
    } else {
        Err(MatchError::InputIntegrity(problems))
    }
}

/// Integrity problems in rows about to be resolved
///
/// Same rules as [`parse_rows`], for entries built in code. Rows must also
/// still be pending.
pub fn check_entries(entries: &[NameEntry]) -> Vec<String> {
    let mut problems = Vec::new();
    let mut seen_ids = HashSet::new();

    for (idx, entry) in entries.iter().enumerate() {
        for (field, value) in [
            ("record_id", &entry.record_id),
            ("full_name", &entry.full_name),
            ("partition", &entry.partition),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("row {}: empty {}", idx, field));
            }
        }
        if !entry.record_id.is_empty() && !seen_ids.insert(entry.record_id.as_str()) {
            problems.push(format!("row {}: duplicate record_id '{}'", idx, entry.record_id));
        }
        if !entry.is_pending() {
            problems.push(format!(
                "row {}: already settled as {}",
                idx, entry.match_source
            ));
        }
    }

    problems
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read rows from a JSON file
pub fn read_rows(path: &Path, kind: RowKind) -> MatchResult<Vec<NameEntry>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        MatchError::InputIntegrity(vec![format!("{}: invalid JSON: {}", path.display(), e)])
    })?;
    parse_rows(value, kind)
}

/// Write rows (with result columns) as pretty JSON
pub fn write_rows(path: &Path, entries: &[NameEntry]) -> MatchResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Parse operator-supplied confirmations
pub fn parse_confirmations(value: Value) -> MatchResult<Vec<NewFeedback>> {
    let rows = match value {
        Value::Array(rows) => rows,
        other => {
            return Err(MatchError::InputIntegrity(vec![format!(
                "expected a JSON array of confirmations, got {}",
                json_kind(&other)
            )]))
        }
    };

    let mut problems = Vec::new();
    let mut drafts = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        match serde_json::from_value::<NewFeedback>(row) {
            Ok(draft) => drafts.push(draft),
            Err(e) => problems.push(format!("row {}: {}", idx, e)),
        }
    }

    if problems.is_empty() {
        Ok(drafts)
    } else {
        Err(MatchError::InputIntegrity(problems))
    }
}

/// Read confirmations from a JSON file
pub fn read_confirmations(path: &Path) -> MatchResult<Vec<NewFeedback>> {
    let content = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        MatchError::InputIntegrity(vec![format!("{}: invalid JSON: {}", path.display(), e)])
    })?;
    parse_confirmations(value)
}
