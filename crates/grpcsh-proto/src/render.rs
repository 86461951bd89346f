//! Rendering subscribe responses into sink records.
//!
//! A timestamped notification becomes one nested JSON tree: element names are
//! the keys at each level, an element's `key=value` attributes become sibling
//! entries inside that element's object, and the leaf value lands either
//! directly under the final element's name or, when that element carries key
//! attributes of its own, under a `"value"` entry next to them. Intermediate
//! elements always descend; a path never collapses into one flat object.
//!
//! Leaf values are opaque on the wire. Numeric-looking strings are promoted
//! to numbers (integer first, then decimal when the text contains a `.`),
//! anything else stays a string.

use crate::gnmi::{Notification, PathElem, SubscribeResponse, TypedValue, typed_value};
use grpcsh_core::{Record, UpdateType};
use serde_json::{Map, Value};

/// Renders one inbound subscribe response. Anything without a timestamped
/// notification payload is a stream synchronization marker and is dumped
/// verbatim.
pub fn subscribe_record(response: &SubscribeResponse) -> Record {
    match &response.response {
        Some(crate::gnmi::subscribe_response::Response::Update(notification))
            if notification.timestamp != 0 =>
        {
            render_notification(notification)
        }
        _ => Record {
            notification: Value::String(format!("{response:?}")),
            timestamp: 0,
            update_type: UpdateType::Sync,
        },
    }
}

fn render_notification(notification: &Notification) -> Record {
    let mut root = Map::new();
    let mut context = &mut root;
    if let Some(prefix) = &notification.prefix {
        for elem in &prefix.elem {
            context = enter(context, elem);
        }
    }
    for update in &notification.update {
        if let Some(path) = &update.path {
            let leaf = update.val.as_ref().map(leaf_value).unwrap_or(Value::Null);
            insert_at(context, &path.elem, Some(leaf));
        }
    }
    for delete in &notification.delete {
        insert_at(context, &delete.elem, None);
    }
    let update_type = if notification.delete.is_empty() {
        UpdateType::Update
    } else {
        UpdateType::Delete
    };
    Record {
        notification: Value::Object(root),
        timestamp: notification.timestamp,
        update_type,
    }
}

/// Descends into `elem`'s object, creating it if needed and writing the
/// element's key attributes as entries inside it. A previously written leaf
/// at the same name is displaced by the object.
fn enter<'a>(context: &'a mut Map<String, Value>, elem: &PathElem) -> &'a mut Map<String, Value> {
    let slot = context
        .entry(elem.name.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => {
            for (key, value) in &elem.key {
                map.insert(key.clone(), Value::String(value.clone()));
            }
            map
        }
        _ => unreachable!("slot was normalized to an object"),
    }
}

/// Walks `elems` under `context`. With a leaf, the final element receives it
/// (next to its key attributes under `"value"` when it has any); without one,
/// the walk just materializes the subtree, which is how deletes render.
fn insert_at(context: &mut Map<String, Value>, elems: &[PathElem], leaf: Option<Value>) {
    let Some((first, rest)) = elems.split_first() else {
        return;
    };
    if rest.is_empty() {
        match leaf {
            Some(value) if first.key.is_empty() => {
                context.insert(first.name.clone(), value);
            }
            Some(value) => {
                enter(context, first).insert("value".to_string(), value);
            }
            None => {
                enter(context, first);
            }
        }
        return;
    }
    insert_at(enter(context, first), rest, leaf);
}

fn leaf_value(val: &TypedValue) -> Value {
    match &val.value {
        Some(typed_value::Value::JsonVal(bytes)) => match serde_json::from_slice::<Value>(bytes) {
            Ok(parsed) => promote_numeric(parsed),
            Err(_) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        },
        Some(typed_value::Value::StringVal(s)) => promote_numeric(Value::String(s.clone())),
        None => Value::Null,
    }
}

/// Targets report numeric leaves as strings; promote the unambiguous ones.
/// Exponent forms without a decimal point are left alone.
fn promote_numeric(value: Value) -> Value {
    if let Value::String(s) = &value {
        if let Ok(n) = s.parse::<i64>() {
            return Value::from(n);
        }
        if s.contains('.') {
            if let Ok(f) = s.parse::<f64>() {
                return Value::from(f);
            }
        }
    }
    value
}
