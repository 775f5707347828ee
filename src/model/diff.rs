//! Record merge and diff helpers for differential updates

use serde_json::Value;

use crate::fields::Record;

/// Expand dotted keys into nested records: `{"a.b": 1}` becomes `{"a": {"b": 1}}`.
pub fn expand_dotted(record: Record) -> Record {
    let mut out = Record::new();
    for (key, value) in record {
        let value = match value {
            Value::Object(nested) => Value::Object(expand_dotted(nested)),
            other => other,
        };
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut out, &parts, value);
    }
    out
}

fn insert_path(target: &mut Record, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => match (target.get_mut(*last), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_records(existing, &incoming, true)
            }
            (_, value) => {
                target.insert(last.to_string(), value);
            }
        },
        [first, rest @ ..] => {
            let slot = target
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Record::new()));
            if !slot.is_object() {
                *slot = Value::Object(Record::new());
            }
            if let Value::Object(next) = slot {
                insert_path(next, rest, value);
            }
        }
    }
}

/// Merge `changes` into `target`.
///
/// With `recursive`, nested records are merged key by key. Arrays and
/// scalars are always replaced wholesale.
pub fn merge_records(target: &mut Record, changes: &Record, recursive: bool) {
    for (key, incoming) in changes {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) if recursive => {
                merge_records(existing, nested, true);
            }
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Leaf values of `updated` that differ from `original`, as a nested record.
pub fn diff_records(original: &Record, updated: &Record) -> Record {
    let mut diff = Record::new();
    for (key, value) in updated {
        match (original.get(key), value) {
            (Some(before), after) if before == after => {}
            (Some(Value::Object(before)), Value::Object(after)) => {
                let nested = diff_records(before, after);
                if !nested.is_empty() {
                    diff.insert(key.clone(), Value::Object(nested));
                }
            }
            _ => {
                diff.insert(key.clone(), value.clone());
            }
        }
    }
    diff
}

/// Replace the value at an existing dotted path.
pub(crate) fn set_at_path(record: &mut Record, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    set_parts(record, &parts, value);
}

fn set_parts(target: &mut Record, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            target.insert(last.to_string(), value);
        }
        [first, rest @ ..] => {
            if let Some(Value::Object(next)) = target.get_mut(*first) {
                set_parts(next, rest, value);
            }
        }
    }
}
