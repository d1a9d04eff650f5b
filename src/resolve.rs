//! Placeholder substitution.
//!
//! Action arguments may reference run state with `${...}` placeholders:
//!
//! - `${p}` or `${derived.gain}` walks the environment by dotted path.
//! - `${cal.offset}` or `${cal.tuner.gamma}` looks up a calibration name in
//!   the in-memory cache, falling back to the durable store (and caching
//!   the hit), then walks any remaining segments into that value.
//!
//! Resolution is a two-stage pipeline: a structural walk over sequences and
//! mappings, plus a dotted-path lookup for the placeholder scalars. There
//! is deliberately no expression language.
//!
//! # Soft failure
//!
//! An unresolved path yields `Null`, never an error. A long physical
//! measurement must not abort because one reference points at state that
//! has not been produced yet; the null simply propagates into the result
//! stream where downstream consumers can see the gap. Callers that need a
//! hard failure (sweep bounds, for example) coerce and reject the null
//! themselves.

use serde_json::{Map, Value};

use crate::calibration::CalibrationStore;
use crate::environment::Environment;

/// Prefix selecting the calibration namespace inside a placeholder.
const CAL_PREFIX: &str = "cal.";

/// Resolve `value` against the environment and calibration state.
///
/// Sequences and mappings are resolved element-wise; strings that are
/// exactly one `${...}` placeholder are substituted; everything else passes
/// through unchanged.
pub fn resolve(
    value: &Value,
    env: &Environment,
    cal_cache: &mut Map<String, Value>,
    cal_store: &CalibrationStore,
) -> Value {
    match value {
        Value::String(text) => substitute(text, env, cal_cache, cal_store),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve(item, env, cal_cache, cal_store))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, env, cal_cache, cal_store)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute(
    text: &str,
    env: &Environment,
    cal_cache: &mut Map<String, Value>,
    cal_store: &CalibrationStore,
) -> Value {
    let Some(expr) = text.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) else {
        return Value::String(text.to_string());
    };

    if let Some(cal_path) = expr.strip_prefix(CAL_PREFIX) {
        let mut segments = cal_path.split('.');
        let name = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();

        let value = match cal_cache.get(name) {
            Some(v) => v.clone(),
            None => match cal_store.get(name) {
                Some(v) => {
                    cal_cache.insert(name.to_string(), v.clone());
                    v
                }
                None => Value::Null,
            },
        };
        return walk(&value, &rest);
    }

    env.get(expr)
}

/// Interpret a resolved value as a number. Accepts JSON numbers and
/// numeric strings (sequence authors quote sweep bounds surprisingly
/// often); anything else is `None`.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Walk a dotted path into a value, yielding `Null` at the first segment
/// that cannot be descended into.
fn walk(value: &Value, segments: &[&str]) -> Value {
    let mut current = value;
    for segment in segments {
        match current.as_object().and_then(|m| m.get(*segment)) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CalibrationStore {
        CalibrationStore::open(dir.path().join("cal.json"), Some("bench_test")).unwrap()
    }

    #[test]
    fn test_round_trip_through_environment() {
        let dir = TempDir::new().unwrap();
        let cal = store(&dir);
        let mut cache = Map::new();
        let mut env = Environment::new();
        env.set("a.b.c", json!(3.5));

        let out = resolve(&json!("${a.b.c}"), &env, &mut cache, &cal);
        assert_eq!(out, json!(3.5));
    }

    #[test]
    fn test_missing_path_is_null_not_error() {
        let dir = TempDir::new().unwrap();
        let cal = store(&dir);
        let mut cache = Map::new();
        let env = Environment::new();

        assert_eq!(resolve(&json!("${ghost.value}"), &env, &mut cache, &cal), Value::Null);
        assert_eq!(resolve(&json!("${cal.ghost}"), &env, &mut cache, &cal), Value::Null);
    }

    #[test]
    fn test_plain_strings_pass_through() {
        let dir = TempDir::new().unwrap();
        let cal = store(&dir);
        let mut cache = Map::new();
        let env = Environment::new();

        assert_eq!(resolve(&json!("dBm"), &env, &mut cache, &cal), json!("dBm"));
        // A placeholder must span the whole string to be substituted.
        assert_eq!(
            resolve(&json!("prefix ${a}"), &env, &mut cache, &cal),
            json!("prefix ${a}")
        );
    }

    #[test]
    fn test_structural_resolution() {
        let dir = TempDir::new().unwrap();
        let cal = store(&dir);
        let mut cache = Map::new();
        let mut env = Environment::new();
        env.set("p", json!(-25.0));

        let out = resolve(
            &json!({"power": "${p}", "points": ["${p}", 7]}),
            &env,
            &mut cache,
            &cal,
        );
        assert_eq!(out, json!({"power": -25.0, "points": [-25.0, 7]}));
    }

    #[test]
    fn test_cal_lookup_falls_back_to_store_and_caches() {
        let dir = TempDir::new().unwrap();
        let mut cal = store(&dir);
        cal.set("offset", json!({"lo": 1.5, "hi": 2.5})).unwrap();

        let mut cache = Map::new();
        let env = Environment::new();

        let out = resolve(&json!("${cal.offset.hi}"), &env, &mut cache, &cal);
        assert_eq!(out, json!(2.5));
        // The store hit is now cached under the calibration name.
        assert_eq!(cache.get("offset"), Some(&json!({"lo": 1.5, "hi": 2.5})));
    }

    #[test]
    fn test_as_number_coercions() {
        assert_eq!(as_number(&json!(-30)), Some(-30.0));
        assert_eq!(as_number(&json!(2.5)), Some(2.5));
        assert_eq!(as_number(&json!(" -20 ")), Some(-20.0));
        assert_eq!(as_number(&json!("watts")), None);
        assert_eq!(as_number(&Value::Null), None);
    }

    #[test]
    fn test_cal_cache_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let mut cal = store(&dir);
        cal.set("offset", json!(1.0)).unwrap();

        let mut cache = Map::new();
        cache.insert("offset".to_string(), json!(9.0));
        let env = Environment::new();

        assert_eq!(resolve(&json!("${cal.offset}"), &env, &mut cache, &cal), json!(9.0));
    }
}
