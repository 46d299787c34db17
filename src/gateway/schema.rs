//! Layer 2: parameter schema validation.

use serde_json::Value;

use crate::error::ValidationLayer;
use crate::tools::validation::validate_arguments;
use crate::types::ValidationViolation;

/// Keys rejected anywhere in the argument tree.
const POLLUTION_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Reject prototype-pollution keys, then check the tool's declared schema.
pub fn check(args: &Value, schema: &Value) -> Result<(), ValidationViolation> {
    reject_pollution_keys("arguments", args)?;
    validate_arguments(args, schema).map_err(|reason| ValidationViolation::new(ValidationLayer::Schema, reason))
}

fn reject_pollution_keys(path: &str, value: &Value) -> Result<(), ValidationViolation> {
    match value {
        Value::Object(map) => map.iter().try_for_each(|(key, item)| {
            if POLLUTION_KEYS.contains(&key.as_str()) {
                return Err(ValidationViolation::new(
                    ValidationLayer::Schema,
                    format!("field '{path}.{key}' is not allowed"),
                ));
            }
            reject_pollution_keys(&format!("{path}.{key}"), item)
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| reject_pollution_keys(&format!("{path}[{i}]"), item)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolParameters;
    use serde_json::json;

    fn schema() -> Value {
        ToolParameters::object()
            .bounded_string("query", "q", 1, 20, true)
            .string_enum("mode", "m", &["react", "html"], false)
            .build()
            .schema
    }

    #[test]
    fn rejects_pollution_keys_even_when_nested() {
        let err = check(&json!({"query": "x", "__proto__": {"admin": true}}), &schema()).unwrap_err();
        assert!(err.reason.contains("__proto__"));

        let nested = json!({"query": [{"constructor": {}}]});
        assert!(check(&nested, &json!({"type": "object"})).is_err());
    }

    #[test]
    fn enforces_declared_shape() {
        assert!(check(&json!({"query": "ok", "mode": "react"}), &schema()).is_ok());

        let unknown = check(&json!({"query": "ok", "extra": 1}), &schema()).unwrap_err();
        assert_eq!(unknown.layer, ValidationLayer::Schema);

        assert!(check(&json!({"query": "ok", "mode": "flash"}), &schema()).is_err());
        assert!(check(&json!({"query": "this query is far too long to pass"}), &schema()).is_err());
        assert!(check(&json!({"query": 5}), &schema()).is_err());
        assert!(check(&json!({}), &schema()).is_err());
    }
}
