//! Conversions between replicated values and plain JSON / cell text.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use yrs::{Any, Array, Map as _, Out, ReadTxn};

/// Largest integer an f64 represents exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_991.0;

/// JSON → replicated scalar. Numbers are stored as doubles, like a browser
/// peer would store them.
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(Arc::from(items))
        }
        Value::Object(fields) => {
            let fields: HashMap<String, Any> = fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(fields))
        }
    }
}

/// Replicated scalar → JSON. Whole doubles come back as integers so column
/// metadata like `{"width": 120}` survives unchanged.
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => number_to_json(*n),
        Any::BigInt(n) => Value::from(*n),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INT {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Any replicated value → JSON, descending into nested maps and arrays.
pub fn out_to_json<T: ReadTxn>(txn: &T, out: Out) -> Value {
    match out {
        Out::Any(any) => any_to_json(&any),
        Out::YMap(map) => {
            let mut fields = Map::new();
            for (key, value) in map.iter(txn) {
                fields.insert(key.to_string(), out_to_json(txn, value));
            }
            Value::Object(fields)
        }
        Out::YArray(array) => {
            Value::Array(array.iter(txn).map(|item| out_to_json(txn, item)).collect())
        }
        _ => Value::Null,
    }
}

/// Render a scalar as cell text. Browser peers occasionally write numbers
/// or null into `value`; those read back as their display form.
pub fn any_to_cell_text(any: &Any) -> String {
    match any {
        Any::String(s) => s.to_string(),
        Any::Null | Any::Undefined => String::new(),
        Any::Bool(b) => b.to_string(),
        Any::Number(n) => match number_to_json(*n) {
            Value::Null => String::new(),
            v => v.to_string(),
        },
        Any::BigInt(n) => n.to_string(),
        other => any_to_json(other).to_string(),
    }
}
