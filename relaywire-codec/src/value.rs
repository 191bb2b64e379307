//! Dynamic value model.
//!
//! [`Value`] is a closed sum type with one variant per value kind the wire
//! format can carry. Tables are insertion-ordered maps of unique keys and
//! are shared behind [`Arc`] so that the encoder can emit repeated tables as
//! back-references.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::{Equivalent, IndexMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color3 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color3 {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

/// One axis of a [`Dim2`]: a relative scale plus an absolute offset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScaleOffset {
    pub scale: f32,
    pub offset: i32,
}

/// 2D scale/offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Dim2 {
    pub x: ScaleOffset,
    pub y: ScaleOffset,
}

impl Dim2 {
    pub fn new(x_scale: f32, x_offset: i32, y_scale: f32, y_offset: i32) -> Self {
        Self {
            x: ScaleOffset {
                scale: x_scale,
                offset: x_offset,
            },
            y: ScaleOffset {
                scale: y_scale,
                offset: y_offset,
            },
        }
    }
}

/// 3D pose: position plus a row-major 3x3 rotation matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3 {
    pub position: Vector3,
    pub rotation: [f32; 9],
}

impl Transform3 {
    /// Identity rotation at the given position.
    pub fn at(position: Vector3) -> Self {
        Self {
            position,
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Default for Transform3 {
    fn default() -> Self {
        Self::at(Vector3::default())
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub min: Vector2,
    pub max: Vector2,
}

/// Named member of a named enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumItem {
    pub enum_type: String,
    pub name: String,
}

impl EnumItem {
    pub fn new(enum_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            enum_type: enum_type.into(),
            name: name.into(),
        }
    }
}

/// Keyframe of a numeric sequence.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NumberKeypoint {
    pub time: f32,
    pub value: f32,
    pub envelope: f32,
}

/// Keyframe of a color sequence.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorKeypoint {
    pub time: f32,
    pub color: Color3,
}

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Table(Arc<Table>),
    Vector3(Vector3),
    Vector2(Vector2),
    Color3(Color3),
    Dim2(Dim2),
    Transform(Transform3),
    Rect(Rect),
    Enum(EnumItem),
    /// Reference to an external object by path.
    PathRef(String),
    Timestamp(DateTime<Utc>),
    /// Index into a fixed color palette.
    Palette(u16),
    NumberSequence(Vec<NumberKeypoint>),
    ColorSequence(Vec<ColorKeypoint>),
    Blob(Bytes),
}

impl Value {
    /// Wraps a table.
    pub fn table(table: Table) -> Self {
        Value::Table(Arc::new(table))
    }

    /// Builds a dense array (keys `1..=n`).
    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Value::table(Table::from_array(values))
    }

    /// Builds a string-keyed map.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::table(
            pairs
                .into_iter()
                .map(|(k, v)| (Value::Str(k.into()), v))
                .collect(),
        )
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Bytes> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Returns a short name for the value's kind (for diagnostics).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Vector3(_) => "vector3",
            Value::Vector2(_) => "vector2",
            Value::Color3(_) => "color3",
            Value::Dim2(_) => "dim2",
            Value::Transform(_) => "transform",
            Value::Rect(_) => "rect",
            Value::Enum(_) => "enum",
            Value::PathRef(_) => "path_ref",
            Value::Timestamp(_) => "timestamp",
            Value::Palette(_) => "palette",
            Value::NumberSequence(_) => "number_sequence",
            Value::ColorSequence(_) => "color_sequence",
            Value::Blob(_) => "blob",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Table(t) => write!(f, "table({})", t.len()),
            Value::Vector3(v) => write!(f, "{}, {}, {}", v.x, v.y, v.z),
            Value::Vector2(v) => write!(f, "{}, {}", v.x, v.y),
            Value::Color3(c) => write!(f, "{}, {}, {}", c.r, c.g, c.b),
            Value::Dim2(d) => write!(
                f,
                "{{{}, {}}}, {{{}, {}}}",
                d.x.scale, d.x.offset, d.y.scale, d.y.offset
            ),
            Value::Transform(t) => write!(
                f,
                "{}, {}, {} @ {:?}",
                t.position.x, t.position.y, t.position.z, t.rotation
            ),
            Value::Rect(r) => write!(f, "{}, {}, {}, {}", r.min.x, r.min.y, r.max.x, r.max.y),
            Value::Enum(e) => write!(f, "{}.{}", e.enum_type, e.name),
            Value::PathRef(p) => write!(f, "{}", p),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Palette(n) => write!(f, "palette({})", n),
            Value::NumberSequence(k) => write!(f, "number_sequence({})", k.len()),
            Value::ColorSequence(k) => write!(f, "color_sequence({})", k.len()),
            Value::Blob(b) => write!(f, "blob({} bytes)", b.len()),
        }
    }
}

/// Hashing agrees with `==`: zeros of either sign hash alike and tables
/// hash by length only.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(x) => float_bits(*x).hash(state),
            Value::Str(s) | Value::PathRef(s) => s.hash(state),
            Value::Table(t) => t.len().hash(state),
            Value::Vector3(v) => hash_f32s(&[v.x, v.y, v.z], state),
            Value::Vector2(v) => hash_f32s(&[v.x, v.y], state),
            Value::Color3(c) => hash_f32s(&[c.r, c.g, c.b], state),
            Value::Dim2(d) => {
                hash_f32s(&[d.x.scale, d.y.scale], state);
                d.x.offset.hash(state);
                d.y.offset.hash(state);
            }
            Value::Transform(t) => {
                hash_f32s(&[t.position.x, t.position.y, t.position.z], state);
                hash_f32s(&t.rotation, state);
            }
            Value::Rect(r) => hash_f32s(&[r.min.x, r.min.y, r.max.x, r.max.y], state),
            Value::Enum(e) => e.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Palette(n) => n.hash(state),
            Value::NumberSequence(points) => {
                points.len().hash(state);
                for p in points {
                    hash_f32s(&[p.time, p.value, p.envelope], state);
                }
            }
            Value::ColorSequence(points) => {
                points.len().hash(state);
                for p in points {
                    hash_f32s(&[p.time, p.color.r, p.color.g, p.color.b], state);
                }
            }
            Value::Blob(b) => b.hash(state),
        }
    }
}

fn float_bits(x: f64) -> u64 {
    if x == 0.0 {
        0
    } else {
        x.to_bits()
    }
}

fn hash_f32s<H: Hasher>(values: &[f32], state: &mut H) {
    for x in values {
        let bits = if *x == 0.0 { 0 } else { x.to_bits() };
        bits.hash(state);
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Blob(b)
    }
}

macro_rules! impl_from_structured {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_structured! {
    Vector3 => Vector3,
    Vector2 => Vector2,
    Color3 => Color3,
    Dim2 => Dim2,
    Transform3 => Transform,
    Rect => Rect,
    EnumItem => Enum,
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::table(t)
    }
}

/// An ordered collection of unique key/value pairs.
///
/// Lookups go through a hash index, so insert and get are constant time per
/// key. Equality is structural and ignores insertion order.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: IndexMap<TableKey, Value>,
}

/// Key slot of a [`Table`].
///
/// NaN keys never compare equal, so each one keeps its own entry.
#[derive(Debug, Clone)]
struct TableKey(Value);

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Equivalent<TableKey> for Value {
    fn equivalent(&self, key: &TableKey) -> bool {
        *self == key.0
    }
}

/// Borrowed string key, hashed exactly like `Value::Str`.
struct StrKey<'a>(&'a str);

impl Hash for StrKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(&Value::Str(String::new())).hash(state);
        self.0.hash(state);
    }
}

impl Equivalent<TableKey> for StrKey<'_> {
    fn equivalent(&self, key: &TableKey) -> bool {
        key.0.as_str() == Some(self.0)
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Builds a table whose keys are `1..=n` in iteration order.
    pub fn from_array(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            entries: values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (TableKey(Value::Int(i as i64 + 1)), v))
                .collect(),
        }
    }

    /// Inserts a pair, returning the previous value for the key.
    ///
    /// A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(TableKey(key.into()), value.into())
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Looks up a string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries.get(&StrKey(key))
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (&k.0, v))
    }

    /// Returns the values ordered by key when the keys are exactly `1..=n`.
    pub fn dense_values(&self) -> Option<Vec<&Value>> {
        let n = self.entries.len();
        let mut slots: Vec<Option<&Value>> = vec![None; n];
        for (key, value) in self.iter() {
            let index = match key {
                Value::Int(i) if *i >= 1 && (*i as u64) <= n as u64 => (*i - 1) as usize,
                _ => return None,
            };
            if slots[index].replace(value).is_some() {
                return None;
            }
        }
        slots.into_iter().collect()
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl FromIterator<(Value, Value)> for Table {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut table = Table::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(value: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        assert_eq!(hash_of(&Value::Float(0.0)), hash_of(&Value::Float(-0.0)));
        assert_eq!(
            hash_of(&Value::Vector2(Vector2::new(-0.0, 1.0))),
            hash_of(&Value::Vector2(Vector2::new(0.0, 1.0)))
        );
        assert_eq!(
            hash_of(&Value::map(vec![("a", Value::Int(1)), ("b", Value::Int(2))])),
            hash_of(&Value::map(vec![("b", Value::Int(2)), ("a", Value::Int(1))]))
        );
        assert_ne!(hash_of(&Value::from("a")), hash_of(&Value::PathRef("a".into())));
    }

    #[test]
    fn test_table_insert_replaces() {
        let mut t = Table::new();
        assert!(t.insert("a", 1).is_none());
        assert_eq!(t.insert("a", 2), Some(Value::Int(1)));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get_str("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_table_equality_ignores_order() {
        let mut a = Table::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let mut b = Table::new();
        b.insert("y", 2);
        b.insert("x", 1);
        assert_eq!(a, b);

        b.insert("z", 3);
        assert_ne!(a, b);
    }

    #[test]
    fn test_table_key_lookup() {
        let mut t = Table::new();
        t.insert(Value::Float(0.0), "zero");
        t.insert(Value::Int(0), "int zero");
        t.insert(Value::PathRef("a".into()), "path");
        t.insert("a", "str");

        assert_eq!(t.len(), 4);
        assert_eq!(t.get(&Value::Float(-0.0)), Some(&Value::from("zero")));
        assert_eq!(t.get(&Value::Int(0)), Some(&Value::from("int zero")));
        assert_eq!(t.get_str("a"), Some(&Value::from("str")));
        assert_eq!(t.get(&Value::PathRef("a".into())), Some(&Value::from("path")));
        assert!(t.get_str("b").is_none());

        // replaced keys keep their position
        t.insert(Value::Float(0.0), "again");
        assert_eq!(t.iter().next(), Some((&Value::Float(0.0), &Value::from("again"))));
    }

    #[test]
    fn test_nan_keys_stay_distinct() {
        let mut t = Table::new();
        assert!(t.insert(Value::Float(f64::NAN), 1).is_none());
        assert!(t.insert(Value::Float(f64::NAN), 2).is_none());
        assert_eq!(t.len(), 2);
        assert!(t.get(&Value::Float(f64::NAN)).is_none());
    }

    #[test]
    fn test_large_table() {
        let n = 50_000;
        let forward: Table = (0..n)
            .map(|i| (Value::Str(format!("key{}", i)), Value::Int(i)))
            .collect();
        let backward: Table = (0..n)
            .rev()
            .map(|i| (Value::Str(format!("key{}", i)), Value::Int(i)))
            .collect();

        assert_eq!(forward.len(), n as usize);
        assert_eq!(forward.get_str("key49999"), Some(&Value::Int(49_999)));
        assert_eq!(forward, backward);

        let mut changed = backward.clone();
        changed.insert("key0", Value::Nil);
        assert_ne!(forward, changed);
    }

    #[test]
    fn test_dense_values() {
        let t = Table::from_array(vec![Value::from("a"), Value::from("b")]);
        let values = t.dense_values().unwrap();
        assert_eq!(values, vec![&Value::from("a"), &Value::from("b")]);

        let mut shuffled = Table::new();
        shuffled.insert(2, "b");
        shuffled.insert(1, "a");
        let values = shuffled.dense_values().unwrap();
        assert_eq!(values, vec![&Value::from("a"), &Value::from("b")]);

        let mut gap = Table::new();
        gap.insert(1, "a");
        gap.insert(3, "c");
        assert!(gap.dense_values().is_none());

        let mut zero = Table::new();
        zero.insert(0, "a");
        assert!(zero.dense_values().is_none());

        assert_eq!(Table::new().dense_values(), Some(vec![]));
    }

    #[test]
    fn test_nil_value_is_present() {
        let mut t = Table::new();
        t.insert("data", Value::Nil);
        assert!(t.contains_key(&Value::from("data")));
        assert_eq!(t.get_str("data"), Some(&Value::Nil));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(
            Value::Enum(EnumItem::new("Material", "Plastic")).to_string(),
            "Material.Plastic"
        );
        assert_eq!(Value::array(vec![Value::Int(1)]).to_string(), "table(1)");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(7i64).as_int(), Some(7));
        assert_eq!(Value::from("s").as_str(), Some("s"));
        assert!(Value::from(1.5).as_int().is_none());
        assert!(Value::Nil.is_nil());
        assert_eq!(Value::Blob(Bytes::from_static(b"x")).kind_name(), "blob");
    }
}
