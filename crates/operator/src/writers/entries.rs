//! Name-keyed list edits on the aggregate status. Every helper reports whether it changed anything.

use serde_json::{Map, Value, json};

pub(crate) const DISCOVERED_AT: &str = "discoveredAt";

const LIST_FIELDS: [&str; 4] = [
    "kubernetesProviders",
    "machineProviders",
    "machineClasses",
    "clusters",
];
const COUNT_FIELDS: [&str; 4] = [
    "kubernetesProviderCount",
    "machineProviderCount",
    "activeClusters",
    "activeMachines",
];

fn entry_name(entry: &Value) -> Option<&str> {
    entry.get("name")?.as_str()
}

/// Equal in every field except the first-seen timestamp.
fn equivalent(a: &Value, b: &Value) -> bool {
    fn strip(v: &Value) -> Option<Map<String, Value>> {
        let mut fields = v.as_object()?.clone();
        fields.remove(DISCOVERED_AT);
        Some(fields)
    }
    match (strip(a), strip(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn list_mut<'a>(status: &'a mut Map<String, Value>, field: &str) -> &'a mut Vec<Value> {
    let slot = status
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(list) => list,
        _ => unreachable!("slot was just replaced with an array"),
    }
}

/// Replace or append `entry` in the list at `field`, keyed by its `name`.
///
/// An existing equivalent entry is left alone. Otherwise the existing
/// `discoveredAt` is carried over. Later duplicates of the name are dropped.
pub(crate) fn upsert_named(status: &mut Map<String, Value>, field: &str, mut entry: Value) -> bool {
    let Some(name) = entry_name(&entry).map(str::to_string) else {
        return false;
    };
    let list = list_mut(status, field);
    let positions = list
        .iter()
        .enumerate()
        .filter(|(_, e)| entry_name(e) == Some(name.as_str()))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    let Some((&first, duplicates)) = positions.split_first() else {
        list.push(entry);
        return true;
    };

    let existing = &list[first];
    if equivalent(existing, &entry) && duplicates.is_empty() {
        return false;
    }

    if let Some(seen) = existing
        .get(DISCOVERED_AT)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        entry[DISCOVERED_AT] = Value::String(seen.to_string());
    }

    list[first] = entry;
    for &i in duplicates.iter().rev() {
        list.remove(i);
    }
    true
}

/// Remove every entry named `name` from the list at `field`.
pub(crate) fn remove_named(status: &mut Map<String, Value>, field: &str, name: &str) -> bool {
    let list = list_mut(status, field);
    let before = list.len();
    list.retain(|e| entry_name(e) != Some(name));
    list.len() != before
}

/// Add `name` to a list of plain strings unless present.
pub(crate) fn insert_name(status: &mut Map<String, Value>, field: &str, name: &str) -> bool {
    let list = list_mut(status, field);
    if list.iter().any(|v| v.as_str() == Some(name)) {
        return false;
    }
    list.push(Value::String(name.to_string()));
    true
}

pub(crate) fn remove_name(status: &mut Map<String, Value>, field: &str, name: &str) -> bool {
    let list = list_mut(status, field);
    let before = list.len();
    list.retain(|v| v.as_str() != Some(name));
    list.len() != before
}

pub(crate) fn set_count(status: &mut Map<String, Value>, field: &str, count: usize) -> bool {
    let count = json!(count);
    if status.get(field) == Some(&count) {
        return false;
    }
    status.insert(field.to_string(), count);
    true
}

/// Make `count_field` match the length of `list_field`.
pub(crate) fn sync_count(status: &mut Map<String, Value>, list_field: &str, count_field: &str) -> bool {
    let len = list_mut(status, list_field).len();
    set_count(status, count_field, len)
}

/// Fill in any status fields missing from an aggregate so it always has the full shape.
pub(crate) fn initialize_status_defaults(status: &mut Map<String, Value>) {
    for field in LIST_FIELDS.into_iter().chain(["providerStatuses", "conditions"]) {
        list_mut(status, field);
    }
    for field in COUNT_FIELDS {
        status.entry(field.to_string()).or_insert_with(|| json!(0));
    }
    status
        .entry("phase".to_string())
        .or_insert_with(|| json!("Ready"));
}
