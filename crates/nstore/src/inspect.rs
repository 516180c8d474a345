//! Read-only views over stored records: tree dumps and reference checks.

use std::fmt::Write as _;

use nstore_backing::BackingStore;
use nstore_types::Record;
use serde_json::Value;

use crate::codec::pid_refs_of;
use crate::error::StoreResult;
use crate::registry::TypeRegistry;

/// Strings longer than this are cut in dumps.
const MAX_STRING_CHARS: usize = 100;

/// Field followed when a record's type has no declared children field.
const DEFAULT_CHILDREN_FIELD: &str = "children";

/// Render `pid` and its descendants, one record per line, down to
/// `max_depth` levels (the starting record is level 1).
pub fn render_tree(
    backing: &dyn BackingStore,
    registry: &TypeRegistry,
    pid: &str,
    max_depth: usize,
) -> StoreResult<String> {
    let mut out = String::new();
    render_level(backing, registry, pid, 1, max_depth, &mut out)?;
    Ok(out)
}

fn render_level(
    backing: &dyn BackingStore,
    registry: &TypeRegistry,
    pid: &str,
    level: usize,
    max_depth: usize,
    out: &mut String,
) -> StoreResult<()> {
    if level > max_depth {
        return Ok(());
    }
    let indent = "   ".repeat(level);
    let Some(raw) = backing.get(pid)? else {
        let _ = writeln!(out, "{indent}{pid}: <missing>");
        return Ok(());
    };
    let Ok(mut value) = serde_json::from_str::<Value>(&raw) else {
        let _ = writeln!(out, "{indent}{pid}: <unreadable>");
        return Ok(());
    };
    truncate_strings(&mut value);
    let _ = writeln!(out, "{indent}{pid}: {value}");

    let children_field = value
        .get("type")
        .and_then(Value::as_str)
        .and_then(|type_name| registry.schema(type_name))
        .and_then(|schema| schema.children_field.as_deref())
        .unwrap_or(DEFAULT_CHILDREN_FIELD);
    if let Some(Value::Array(children)) = value.get(children_field) {
        for child in children.iter().filter_map(Value::as_str) {
            render_level(backing, registry, child, level + 1, max_depth, out)?;
        }
    }
    Ok(())
}

fn truncate_strings(value: &mut Value) {
    match value {
        Value::String(s) if s.chars().count() > MAX_STRING_CHARS => {
            let cut: String = s.chars().take(MAX_STRING_CHARS).collect();
            *s = format!("{cut}...");
        }
        Value::Array(items) => items.iter_mut().for_each(truncate_strings),
        Value::Object(map) => map.values_mut().for_each(truncate_strings),
        _ => {}
    }
}

/// A reference to a pid with no record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dangling {
    pub from: String,
    pub missing: String,
}

/// Result of checking every stored record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub records: usize,
    /// Records that do not parse.
    pub unreadable: Vec<String>,
    pub dangling: Vec<Dangling>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.unreadable.is_empty() && self.dangling.is_empty()
    }
}

/// Parse every record and check that every edge names a stored pid.
pub fn verify(backing: &dyn BackingStore, registry: &TypeRegistry) -> StoreResult<VerifyReport> {
    let keys = backing.keys()?;
    let mut report = VerifyReport {
        records: keys.len(),
        ..Default::default()
    };
    for key in &keys {
        let Some(raw) = backing.get(key)? else { continue };
        let record = match Record::from_json(&raw) {
            Ok(record) => record,
            Err(_) => {
                report.unreadable.push(key.clone());
                continue;
            }
        };
        for target in pid_refs_of(&record, registry.schema(&record.type_name)) {
            if !backing.has_key(&target)? {
                report.dangling.push(Dangling {
                    from: key.clone(),
                    missing: target,
                });
            }
        }
    }
    Ok(report)
}
