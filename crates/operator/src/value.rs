use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Walk `path` through nested JSON objects.
pub fn nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.as_object()?.get(*key))
}

pub fn nested_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    nested(value, path)?.as_str()
}

/// Integer at `path`. Whole floats are accepted since JSON decoders disagree on `3` vs `3.0`.
pub fn nested_i64(value: &Value, path: &[&str]) -> Option<i64> {
    let v = nested(value, path)?;
    v.as_i64()
        .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

pub fn nested_array<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Vec<Value>> {
    nested(value, path)?.as_array()
}

pub fn nested_object<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Map<String, Value>> {
    nested(value, path)?.as_object()
}

/// String-valued entries of the object at `path`, non-string values are skipped.
pub fn nested_string_map(value: &Value, path: &[&str]) -> Option<BTreeMap<String, String>> {
    let object = nested_object(value, path)?;
    Some(
        object
            .iter()
            .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
            .collect(),
    )
}

/// Set `new` at `path`, creating (or replacing non-object) intermediate nodes.
pub fn set_nested(value: &mut Value, path: &[&str], new: Value) {
    let Some((last, parents)) = path.split_last() else {
        *value = new;
        return;
    };

    let mut cursor = value;
    for key in parents {
        cursor = ensure_object(cursor)
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(cursor).insert(last.to_string(), new);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}
