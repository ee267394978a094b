//! Dotted-key access and layering over a JSON value tree.

use serde_json::{Map, Value};

/// Deep-merges `layer` into `base`.
///
/// Objects merge key by key; any other value in `layer` replaces the
/// value in `base`, arrays included.
pub(crate) fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Looks up a dotted key.
pub(crate) fn lookup<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .try_fold(tree, |node, segment| node.as_object()?.get(segment))
}

/// Writes a dotted key, creating intermediate objects.
///
/// Returns false if an intermediate segment holds a non-object value.
pub(crate) fn insert(tree: &mut Value, key: &str, value: Value) -> bool {
    let mut node = tree;
    let mut segments = key.split('.').peekable();
    while let Some(segment) = segments.next() {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        let Some(object) = node.as_object_mut() else {
            return false;
        };
        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return true;
        }
        node = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

/// Normalizes a key for environment matching: lowercase, no underscores.
///
/// `REQUEST_UUID_HEADER_KEY` and `requestUUIDHeaderKey` normalize to the
/// same string.
pub(crate) fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Resolves an environment path against the tree's existing keys.
///
/// Each segment maps to the existing key with the same normalized form,
/// or to its lowercase spelling when no such key exists.
pub(crate) fn resolve_env_path(tree: &Value, segments: &[&str]) -> Vec<String> {
    let mut node = Some(tree);
    let mut resolved = Vec::with_capacity(segments.len());
    for segment in segments {
        let wanted = normalize(segment);
        let existing = node
            .and_then(Value::as_object)
            .and_then(|object| object.keys().find(|k| normalize(k) == wanted))
            .cloned();
        let key = existing.unwrap_or_else(|| segment.to_lowercase());
        node = node.and_then(|n| n.get(&key));
        resolved.push(key);
    }
    resolved
}
