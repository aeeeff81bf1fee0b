//! Value-level operations on the entity tree.
//!
//! The tree follows realtime-database semantics: `null` and empty objects do
//! not exist, so writing either one removes the node, and removing the last
//! child of an object removes the object too.

use serde_json::{Map, Value};

pub(crate) fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segments {
        node = match node {
            Value::Object(map) => map.get(seg)?,
            // Legacy member lists are stored as arrays.
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if is_absent(node) {
        None
    } else {
        Some(node)
    }
}

/// Replace the subtree at `segments` with `value`. Returns whether a value
/// existed there before the write.
pub(crate) fn set(root: &mut Value, segments: &[String], value: Value) -> bool {
    let value = prune(value);
    let existed = lookup(root, segments).is_some();
    set_in(root, segments, value);
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    existed
}

fn set_in(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    let map = ensure_object(node);
    if rest.is_empty() {
        if is_absent(&value) {
            map.remove(head);
        } else {
            map.insert(head.clone(), value);
        }
        return;
    }
    let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    set_in(child, rest, value);
    if is_absent(child) {
        map.remove(head);
    }
}

/// Make `node` an object, keeping array elements under their index keys.
fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        let map = match node.take() {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !is_absent(v))
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Map::new(),
        };
        *node = Value::Object(map);
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

/// Drop nulls and empty objects, recursively.
pub(crate) fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !is_absent(v))
                .collect();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(prune).collect()),
        other => other,
    }
}

pub(crate) fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
