//! Collection strategy selection.
//!
//! Before a table is written the encoder classifies it into one of four
//! layouts. Precedence (first match wins):
//!
//! 1. dense array: keys are exactly `1..=n`; additionally homogeneous when
//!    every element shares one shareable body tag
//! 2. string map: every key is a string
//! 3. homogeneous map: every value shares one shareable body tag
//! 4. mixed map

use crate::encode::EncodeOptions;
use crate::tag::Tag;
use crate::value::{Table, Value};

/// Minimum element count for the homogeneous layouts.
///
/// Below this the shared tag byte saves nothing.
pub const MIN_HOMOGENEOUS_LEN: usize = 2;

/// Layout chosen for a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy<'a> {
    /// Values in key order, each with its own tag.
    DenseArray(Vec<&'a Value>),
    /// Values in key order sharing one element tag.
    HomogeneousArray { values: Vec<&'a Value>, element: Tag },
    StringMap,
    HomogeneousMap { value_tag: Tag },
    MixedMap,
}

impl Strategy<'_> {
    /// Returns the tag that opens this layout on the wire.
    pub fn tag(&self) -> Tag {
        match self {
            Strategy::DenseArray(_) => Tag::ArrayStart,
            Strategy::HomogeneousArray { .. } => Tag::HomogeneousArray,
            Strategy::StringMap => Tag::StringMap,
            Strategy::HomogeneousMap { .. } => Tag::HomogeneousMap,
            Strategy::MixedMap => Tag::TableStart,
        }
    }
}

/// Classifies a table. Linear in the table size.
pub fn classify<'a>(table: &'a Table, opts: &EncodeOptions) -> Strategy<'a> {
    if let Some(values) = table.dense_values() {
        if values.len() >= MIN_HOMOGENEOUS_LEN {
            if let Some(element) = shared_tag(values.iter().copied(), opts) {
                return Strategy::HomogeneousArray { values, element };
            }
        }
        return Strategy::DenseArray(values);
    }

    if table
        .iter()
        .all(|(k, _)| matches!(k, Value::Str(s) if s.len() <= u16::MAX as usize))
    {
        return Strategy::StringMap;
    }

    if table.len() >= MIN_HOMOGENEOUS_LEN {
        if let Some(value_tag) = shared_tag(table.iter().map(|(_, v)| v), opts) {
            return Strategy::HomogeneousMap { value_tag };
        }
    }

    Strategy::MixedMap
}

/// Returns the narrowest signed-width tag for an integer.
pub fn int_tag(i: i64) -> Tag {
    if i8::try_from(i).is_ok() {
        Tag::Int8
    } else if i16::try_from(i).is_ok() {
        Tag::Int16
    } else if i32::try_from(i).is_ok() {
        Tag::Int32
    } else {
        Tag::Int64
    }
}

/// Returns `Float32` when the value survives single precision.
pub fn float_tag(x: f64, tolerance: f64) -> Tag {
    let narrowed = x as f32 as f64;
    let fits = if tolerance > 0.0 {
        (narrowed - x).abs() <= tolerance
    } else {
        narrowed == x
    };
    if fits {
        Tag::Float32
    } else {
        Tag::Float64
    }
}

/// Returns the string tag for a byte length.
pub fn str_tag(len: usize) -> Tag {
    if len <= crate::SHORT_STRING_MAX {
        Tag::ShortStr
    } else {
        Tag::LongStr
    }
}

/// Returns the tag under which `value` can be written as a bare body.
///
/// `None` for kinds that have no body (nil, booleans) and for tables.
pub fn body_tag(value: &Value, opts: &EncodeOptions) -> Option<Tag> {
    let tag = match value {
        Value::Nil | Value::Bool(_) | Value::Table(_) => return None,
        Value::Int(i) => int_tag(*i),
        Value::Float(x) => float_tag(*x, opts.float32_tolerance),
        Value::Str(s) => str_tag(s.len()),
        Value::Vector3(_) => Tag::Vector3,
        Value::Vector2(_) => Tag::Vector2,
        Value::Color3(_) => Tag::Color3,
        Value::Dim2(_) => Tag::Dim2,
        Value::Transform(_) => Tag::Transform,
        Value::Rect(_) => Tag::Rect,
        Value::Enum(_) => Tag::Enum,
        Value::PathRef(_) => Tag::PathRef,
        Value::Timestamp(_) => Tag::Timestamp,
        Value::Palette(_) => Tag::Palette,
        Value::NumberSequence(_) => Tag::NumberSequence,
        Value::ColorSequence(_) => Tag::ColorSequence,
        Value::Blob(_) => Tag::Blob,
    };
    Some(tag)
}

/// Widens two body tags of the same family to one that carries both.
fn unify(a: Tag, b: Tag) -> Option<Tag> {
    use Tag::*;
    match (a, b) {
        _ if a == b => Some(a),
        (Int8 | Int16 | Int32 | Int64, Int8 | Int16 | Int32 | Int64)
        | (Float32 | Float64, Float32 | Float64)
        | (ShortStr | LongStr, ShortStr | LongStr) => Some(if a.byte() > b.byte() { a } else { b }),
        _ => None,
    }
}

fn shared_tag<'a>(
    mut values: impl Iterator<Item = &'a Value>,
    opts: &EncodeOptions,
) -> Option<Tag> {
    let first = body_tag(values.next()?, opts)?;
    values.try_fold(first, |acc, v| unify(acc, body_tag(v, opts)?))
}
