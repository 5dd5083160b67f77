//! Layering of Input Values and removal of unchanged defaults.
//!
//! Precedence, lowest first: schema defaults, the `--params-in` file,
//! answers from the terminal wizard, values returned by the remote form.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::schema::{self, SchemaStore};

/// Start Input Values from the schema defaults unless something (a resumed
/// remote session) already populated them.
pub fn seed_from_defaults(store: &mut SchemaStore) {
    if store.input_params.is_empty() {
        store.input_params = store.schema_defaults.clone();
    }
}

pub fn apply_params_file(store: &mut SchemaStore, path: &Path) -> Result<()> {
    store.load_input_params(path)
}

/// Merge, not replace: file values the session did not touch survive.
pub fn apply_session_answers(store: &mut SchemaStore, answers: &IndexMap<String, Value>) {
    for (id, value) in answers {
        store.input_params.insert(id.clone(), value.clone());
    }
}

/// Take a mapping returned by the remote form unless it is empty.
pub fn adopt_non_empty(target: &mut IndexMap<String, Value>, incoming: IndexMap<String, Value>) {
    if !incoming.is_empty() {
        *target = incoming;
    }
}

/// Drop values equal to their declared default, for both workflow
/// parameters and engine flags. Does nothing when `save_all` is set.
pub fn strip_defaults(
    store: &mut SchemaStore,
    flags: &mut IndexMap<String, Value>,
    save_all: bool,
) {
    if save_all {
        return;
    }
    for (id, default) in &store.schema_defaults {
        if store
            .input_params
            .get(id)
            .is_some_and(|value| values_equal(value, default))
        {
            debug!(param = %id, "dropping parameter equal to its default");
            store.input_params.shift_remove(id);
        }
    }
    for (id, node) in &schema::engine_flags_group().properties {
        let Some(default) = &node.default else {
            continue;
        };
        if flags.get(id).is_some_and(|value| values_equal(value, default)) {
            flags.shift_remove(id);
        }
    }
}

/// JSON equality where `1` and `1.0` are the same number.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PipelineSchema;
    use serde_json::json;
    use std::fs;

    fn store() -> SchemaStore {
        SchemaStore::from_schema(
            PipelineSchema::from_value(json!({
                "properties": {
                    "a": {"type": "integer", "default": 1},
                    "b": {"type": "string"}
                }
            }))
            .unwrap(),
        )
    }

    fn map(value: Value) -> IndexMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn later_sources_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("params.json");
        fs::write(&file, r#"{"a": 2}"#).unwrap();

        let mut store = store();
        seed_from_defaults(&mut store);
        assert_eq!(store.input_params.get("a"), Some(&json!(1)));

        apply_params_file(&mut store, &file).unwrap();
        assert_eq!(store.input_params.get("a"), Some(&json!(2)));

        apply_session_answers(&mut store, &map(json!({"a": 3})));
        assert_eq!(store.input_params.get("a"), Some(&json!(3)));

        let mut remote = map(json!({"a": "4", "b": ""}));
        crate::remote::sanitise(&store.schema, &mut remote).unwrap();
        adopt_non_empty(&mut store.input_params, remote);
        assert_eq!(store.input_params.get("a"), Some(&json!(4)));
        assert!(!store.input_params.contains_key("b"));
    }

    #[test]
    fn empty_remote_mapping_is_not_adopted() {
        let mut flags = map(json!({"-profile": "docker"}));
        adopt_non_empty(&mut flags, IndexMap::new());
        assert_eq!(flags.get("-profile"), Some(&json!("docker")));
    }

    #[test]
    fn strip_defaults_keeps_only_changed_values() {
        let mut store = store();
        store.input_params = map(json!({"a": 1, "b": 2}));
        let mut flags = map(json!({"-resume": false, "-profile": "docker"}));
        strip_defaults(&mut store, &mut flags, false);
        assert_eq!(store.input_params, map(json!({"b": 2})));
        assert_eq!(flags, map(json!({"-profile": "docker"})));
    }

    #[test]
    fn save_all_keeps_defaults() {
        let mut store = store();
        store.input_params = map(json!({"a": 1, "b": 2}));
        let mut flags = IndexMap::new();
        strip_defaults(&mut store, &mut flags, true);
        assert_eq!(store.input_params.len(), 2);
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }
}
