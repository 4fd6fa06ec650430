//! Input mapping expressions.
//!
//! `$.name` reads the flow attribute `name`, `$activity[task].out` reads
//! output `out` of an already evaluated task. Anything else is a literal
//! string.

use flowcore::{ActivityError, Value};
use std::collections::HashMap;

const ATTR_PREFIX: &str = "$.";
const ACTIVITY_PREFIX: &str = "$activity[";

/// Attribute name under which a task output is stored.
pub fn activity_attr(task_id: &str, output: &str) -> String {
    format!("_A.{}.{}", task_id, output)
}

pub fn resolve(expr: &str, attrs: &HashMap<String, Value>) -> Result<Value, ActivityError> {
    if let Some(name) = expr.strip_prefix(ATTR_PREFIX) {
        return Ok(attrs.get(name).cloned().unwrap_or(Value::Null));
    }

    if let Some(rest) = expr.strip_prefix(ACTIVITY_PREFIX) {
        let (task_id, output) = rest
            .split_once("].")
            .ok_or_else(|| ActivityError::Configuration(format!("malformed mapping: {}", expr)))?;
        return Ok(attrs
            .get(&activity_attr(task_id, output))
            .cloned()
            .unwrap_or(Value::Null));
    }

    Ok(Value::String(expr.to_string()))
}

/// Resolve every mapping of a task into its activity inputs.
pub fn resolve_inputs(
    mappings: &HashMap<String, String>,
    attrs: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>, ActivityError> {
    mappings
        .iter()
        .map(|(name, expr)| Ok((name.clone(), resolve(expr, attrs)?)))
        .collect()
}
