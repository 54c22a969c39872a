//! # Marshaling
//!
//! Converts between script values and wire values.
//!
//! Plain data is copied. Anything that must keep its identity crosses as a
//! `{"$handle": ..}` marker: functions always, and lists or objects nested
//! deeper than `MAX_COPY_DEPTH` (which also cuts reference cycles).

use bridgescript::Value;
use serde_json::Map;
use serde_json::Number;

use crate::handle::Handle;
use crate::registry::Error;
use crate::registry::Registry;
use crate::registry::Result;

pub const MAX_COPY_DEPTH: usize = 32;

/// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Wire copy of `value`. Functions and over-deep containers are registered
/// in `registry` and replaced by their marker.
pub fn to_wire(value: &Value, registry: &Registry) -> serde_json::Value {
    copy_out(value, registry, 0)
}

fn copy_out(value: &Value, registry: &Registry, depth: usize) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number(*n),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Function(_) => registry.insert(value.clone()).marker(),
        _ if depth >= MAX_COPY_DEPTH => registry.insert(value.clone()).marker(),
        Value::List(list) => serde_json::Value::Array(
            list.to_vec()
                .iter()
                .map(|item| copy_out(item, registry, depth + 1))
                .collect(),
        ),
        Value::Object(object) => serde_json::Value::Object(
            object
                .entries()
                .into_iter()
                .map(|(k, v)| (k, copy_out(&v, registry, depth + 1)))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Script value for a wire value. Markers resolve to the live object they
/// name, so a marker for an unknown handle is an error.
pub fn from_wire(value: &serde_json::Value, registry: &Registry) -> Result<Value> {
    if let Some(id) = bridgewire::as_handle_marker(value) {
        let handle = Handle::parse(id).map_err(Error::from)?;
        return registry.get(&handle);
    }
    Ok(match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::list(
            items
                .iter()
                .map(|item| from_wire(item, registry))
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_json::Value::Object(map) => {
            let object = bridgescript::Object::new();
            for (k, v) in map {
                object.set(k.clone(), from_wire(v, registry)?);
            }
            Value::Object(object)
        }
    })
}
