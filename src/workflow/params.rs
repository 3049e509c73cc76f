//! Workflow parameterisation.
//!
//! Placeholders of the form `{"$param": "name"}` anywhere inside a step's
//! `args` are replaced by the caller-supplied value at run initialisation.
//! A placeholder with no matching parameter is a validation failure; runs
//! never start with unresolved holes.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::WorkflowError;

/// Replace every `{"$param": name}` in `value` from `params`, in place.
pub fn substitute(
    value: &mut Value,
    params: &HashMap<String, Value>,
) -> Result<(), WorkflowError> {
    if let Some(name) = param_name(value) {
        let replacement = params.get(&name).cloned().ok_or_else(|| {
            WorkflowError::Validation(format!("missing workflow parameter {name:?}"))
        })?;
        *value = replacement;
        return Ok(());
    }
    match value {
        Value::Array(items) => {
            for item in items {
                substitute(item, params)?;
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute(item, params)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn param_name(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("$param")?.as_str().map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_nested_placeholders() {
        let mut value = json!({
            "url": {"$param": "start"},
            "inner": [{"deep": {"$param": "depth"}}, "literal"]
        });
        let params = HashMap::from([
            ("start".to_string(), json!("https://example.com")),
            ("depth".to_string(), json!(3)),
        ]);
        substitute(&mut value, &params).unwrap();
        assert_eq!(
            value,
            json!({"url": "https://example.com", "inner": [{"deep": 3}, "literal"]})
        );
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let mut value = json!({"$param": "absent"});
        let err = substitute(&mut value, &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn multi_key_objects_are_not_placeholders() {
        let mut value = json!({"$param": "x", "other": 1});
        substitute(&mut value, &HashMap::new()).unwrap();
        assert_eq!(value, json!({"$param": "x", "other": 1}));
    }
}
