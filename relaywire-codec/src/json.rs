//! Conversion to and from `serde_json` values.
//!
//! JSON objects become string maps and arrays become dense tables. The
//! reverse direction is lossy for kinds JSON has no notion of: structured
//! values are rendered as plain arrays or objects, timestamps as RFC 3339
//! strings, and non-finite floats as `null`.

use crate::value::{Table, Value};
use serde_json::{json, Map, Number};

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::array(items.into_iter().map(Value::from)),
            serde_json::Value::Object(map) => {
                Value::map(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

impl Value {
    /// Renders the value as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(x) => float(*x),
            Value::Str(s) | Value::PathRef(s) => json!(s),
            Value::Table(t) => table_to_json(t),
            Value::Vector3(v) => floats(&[v.x, v.y, v.z]),
            Value::Vector2(v) => floats(&[v.x, v.y]),
            Value::Color3(c) => floats(&[c.r, c.g, c.b]),
            Value::Dim2(d) => json!({
                "x": { "scale": float(d.x.scale as f64), "offset": d.x.offset },
                "y": { "scale": float(d.y.scale as f64), "offset": d.y.offset },
            }),
            Value::Transform(t) => json!({
                "position": floats(&[t.position.x, t.position.y, t.position.z]),
                "rotation": floats(&t.rotation),
            }),
            Value::Rect(r) => floats(&[r.min.x, r.min.y, r.max.x, r.max.y]),
            Value::Enum(e) => json!(format!("{}.{}", e.enum_type, e.name)),
            Value::Timestamp(t) => json!(t.to_rfc3339()),
            Value::Palette(n) => json!(n),
            Value::NumberSequence(points) => serde_json::Value::Array(
                points
                    .iter()
                    .map(|p| floats(&[p.time, p.value, p.envelope]))
                    .collect(),
            ),
            Value::ColorSequence(points) => serde_json::Value::Array(
                points
                    .iter()
                    .map(|p| floats(&[p.time, p.color.r, p.color.g, p.color.b]))
                    .collect(),
            ),
            Value::Blob(b) => json!(b.as_ref()),
        }
    }
}

fn float(x: f64) -> serde_json::Value {
    Number::from_f64(x)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn floats(values: &[f32]) -> serde_json::Value {
    serde_json::Value::Array(values.iter().map(|x| float(*x as f64)).collect())
}

fn table_to_json(table: &Table) -> serde_json::Value {
    if let Some(values) = table.dense_values() {
        return serde_json::Value::Array(values.into_iter().map(Value::to_json).collect());
    }
    let mut map = Map::with_capacity(table.len());
    for (key, value) in table.iter() {
        let key = match key {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        };
        map.insert(key, value.to_json());
    }
    serde_json::Value::Object(map)
}
