//! Value encoder.
//!
//! Layout of each tag's body (integers and floats big-endian):
//!
//! ```text
//! Int8/16/32/64     signed integer of that width
//! Float32/64        IEEE-754 of that width
//! ShortStr          u8 len | bytes          (len <= 254)
//! LongStr           u32 len | bytes
//! Vector3 / Color3  3 x f32
//! Vector2           2 x f32
//! Dim2              f32 scale | i32 offset | f32 scale | i32 offset
//! Transform         3 x f32 position | 9 x f32 rotation (row-major)
//! Rect              4 x f32 (min.x, min.y, max.x, max.y)
//! Enum              u16 len | type bytes | u16 len | name bytes
//! PathRef           u32 len | bytes
//! Timestamp         i64 seconds since the Unix epoch | u32 nanoseconds
//! Palette           u16
//! NumberSequence    u16 count | count x (f32 time, f32 value, f32 envelope)
//! ColorSequence     u16 count | count x (f32 time, 3 x f32 color)
//! Blob              u32 len | bytes
//! BackRef           u32 reference index (1-based)
//!
//! ArrayStart        u32 count | count x value                         | ArrayEnd
//! HomogeneousArray  u32 count | tag | count x body                    | ArrayEnd
//! StringMap         u32 count | count x (u16 len, key bytes, value)   | TableEnd
//! HomogeneousMap    u32 count | tag | count x (tagged key, body)      | TableEnd
//! TableStart        u32 count | count x (key kind, key, KeyValueSep, value) | TableEnd
//! ```

use crate::error::CodecError;
use crate::strategy::{body_tag, classify, Strategy};
use crate::tag::{KeyKind, Tag, SMALL_INT_BASE, SMALL_INT_MAX};
use crate::value::{Table, Value};
use crate::DEFAULT_MAX_DEPTH;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;

/// Encoder options.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Maximum table nesting.
    pub max_depth: usize,
    /// Largest error accepted when narrowing a float to single precision.
    /// Zero requires an exact round-trip.
    pub float32_tolerance: f64,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            float32_tolerance: 0.0,
        }
    }
}

impl EncodeOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_float32_tolerance(mut self, tolerance: f64) -> Self {
        self.float32_tolerance = tolerance;
        self
    }
}

/// Encodes a value with default options.
pub fn encode(value: &Value) -> Result<Bytes, CodecError> {
    encode_with(value, &EncodeOptions::default())
}

/// Encodes a value.
pub fn encode_with(value: &Value, opts: &EncodeOptions) -> Result<Bytes, CodecError> {
    let mut encoder = Encoder {
        buf: BytesMut::with_capacity(64),
        opts,
        refs: HashMap::new(),
    };
    encoder.write_value(value, 0)?;
    Ok(encoder.buf.freeze())
}

struct Encoder<'o> {
    buf: BytesMut,
    opts: &'o EncodeOptions,
    /// Table address -> reference index, scoped to one encode call.
    refs: HashMap<usize, u32>,
}

impl Encoder<'_> {
    fn write_value(&mut self, value: &Value, depth: usize) -> Result<(), CodecError> {
        match value {
            Value::Nil => self.put_tag(Tag::Nil),
            Value::Bool(true) => self.put_tag(Tag::True),
            Value::Bool(false) => self.put_tag(Tag::False),
            Value::Int(i) if (0..=SMALL_INT_MAX).contains(i) => {
                self.buf.put_u8(SMALL_INT_BASE | *i as u8);
            }
            Value::Table(table) => return self.write_table(table, depth),
            _ => {
                if let Some(tag) = body_tag(value, self.opts) {
                    self.put_tag(tag);
                    self.write_body(tag, value)?;
                }
            }
        }
        Ok(())
    }

    fn write_body(&mut self, tag: Tag, value: &Value) -> Result<(), CodecError> {
        match (tag, value) {
            (Tag::Int8, Value::Int(i)) => self.buf.put_i8(*i as i8),
            (Tag::Int16, Value::Int(i)) => self.buf.put_i16(*i as i16),
            (Tag::Int32, Value::Int(i)) => self.buf.put_i32(*i as i32),
            (Tag::Int64, Value::Int(i)) => self.buf.put_i64(*i),
            (Tag::Float32, Value::Float(x)) => self.buf.put_f32(*x as f32),
            (Tag::Float64, Value::Float(x)) => self.buf.put_f64(*x),
            (Tag::ShortStr, Value::Str(s)) if s.len() <= crate::SHORT_STRING_MAX => {
                self.buf.put_u8(s.len() as u8);
                self.buf.put_slice(s.as_bytes());
            }
            (Tag::LongStr, Value::Str(s)) => self.put_str32(s.as_bytes())?,
            (Tag::Vector3, Value::Vector3(v)) => self.put_f32s(&[v.x, v.y, v.z]),
            (Tag::Vector2, Value::Vector2(v)) => self.put_f32s(&[v.x, v.y]),
            (Tag::Color3, Value::Color3(c)) => self.put_f32s(&[c.r, c.g, c.b]),
            (Tag::Dim2, Value::Dim2(d)) => {
                self.buf.put_f32(d.x.scale);
                self.buf.put_i32(d.x.offset);
                self.buf.put_f32(d.y.scale);
                self.buf.put_i32(d.y.offset);
            }
            (Tag::Transform, Value::Transform(t)) => {
                self.put_f32s(&[t.position.x, t.position.y, t.position.z]);
                self.put_f32s(&t.rotation);
            }
            (Tag::Rect, Value::Rect(r)) => self.put_f32s(&[r.min.x, r.min.y, r.max.x, r.max.y]),
            (Tag::Enum, Value::Enum(e)) => {
                self.put_str16(&e.enum_type)?;
                self.put_str16(&e.name)?;
            }
            (Tag::PathRef, Value::PathRef(p)) => self.put_str32(p.as_bytes())?,
            (Tag::Timestamp, Value::Timestamp(t)) => {
                self.buf.put_i64(t.timestamp());
                self.buf.put_u32(t.timestamp_subsec_nanos());
            }
            (Tag::Palette, Value::Palette(n)) => self.buf.put_u16(*n),
            (Tag::NumberSequence, Value::NumberSequence(points)) => {
                self.put_count16(points.len())?;
                for p in points {
                    self.put_f32s(&[p.time, p.value, p.envelope]);
                }
            }
            (Tag::ColorSequence, Value::ColorSequence(points)) => {
                self.put_count16(points.len())?;
                for p in points {
                    self.put_f32s(&[p.time, p.color.r, p.color.g, p.color.b]);
                }
            }
            (Tag::Blob, Value::Blob(b)) => self.put_str32(b)?,
            _ => {
                return Err(CodecError::KindMismatch {
                    tag: tag.byte(),
                    kind: value.kind_name(),
                })
            }
        }
        Ok(())
    }

    fn write_table(&mut self, table: &Arc<Table>, depth: usize) -> Result<(), CodecError> {
        let addr = Arc::as_ptr(table) as usize;
        if let Some(&index) = self.refs.get(&addr) {
            self.put_tag(Tag::BackRef);
            self.buf.put_u32(index);
            return Ok(());
        }

        if depth >= self.opts.max_depth {
            return Err(CodecError::RecursionLimit {
                max_depth: self.opts.max_depth,
            });
        }

        // Indices are assigned when a table starts, in emission order.
        let index = self.refs.len() as u32 + 1;
        self.refs.insert(addr, index);

        let strategy = classify(table, self.opts);
        self.put_tag(strategy.tag());
        self.put_count32(table.len())?;

        match strategy {
            Strategy::DenseArray(values) => {
                for value in values {
                    self.write_value(value, depth + 1)?;
                }
                self.put_tag(Tag::ArrayEnd);
            }
            Strategy::HomogeneousArray { values, element } => {
                self.put_tag(element);
                for value in values {
                    self.write_body(element, value)?;
                }
                self.put_tag(Tag::ArrayEnd);
            }
            Strategy::StringMap => {
                for (key, value) in table.iter() {
                    if let Value::Str(key) = key {
                        self.put_str16(key)?;
                    }
                    self.write_value(value, depth + 1)?;
                }
                self.put_tag(Tag::TableEnd);
            }
            Strategy::HomogeneousMap { value_tag } => {
                self.put_tag(value_tag);
                for (key, value) in table.iter() {
                    self.write_value(key, depth + 1)?;
                    self.write_body(value_tag, value)?;
                }
                self.put_tag(Tag::TableEnd);
            }
            Strategy::MixedMap => {
                for (key, value) in table.iter() {
                    self.write_mixed_key(key, depth + 1)?;
                    self.put_tag(Tag::KeyValueSep);
                    self.write_value(value, depth + 1)?;
                }
                self.put_tag(Tag::TableEnd);
            }
        }
        Ok(())
    }

    fn write_mixed_key(&mut self, key: &Value, depth: usize) -> Result<(), CodecError> {
        match key {
            Value::Int(i) if i32::try_from(*i).is_ok() => {
                self.buf.put_u8(KeyKind::Int as u8);
                self.buf.put_i32(*i as i32);
            }
            Value::Str(s) if s.len() <= u16::MAX as usize => {
                self.buf.put_u8(KeyKind::Str as u8);
                self.put_str16(s)?;
            }
            Value::Bool(b) => {
                self.buf.put_u8(KeyKind::Bool as u8);
                self.buf.put_u8(u8::from(*b));
            }
            _ => {
                self.buf.put_u8(KeyKind::Other as u8);
                self.write_value(key, depth)?;
            }
        }
        Ok(())
    }

    fn put_tag(&mut self, tag: Tag) {
        self.buf.put_u8(tag.byte());
    }

    fn put_f32s(&mut self, values: &[f32]) {
        for v in values {
            self.buf.put_f32(*v);
        }
    }

    fn put_count32(&mut self, n: usize) -> Result<(), CodecError> {
        let n = u32::try_from(n).map_err(|_| CodecError::TooLarge {
            size: n,
            max: u32::MAX as usize,
        })?;
        self.buf.put_u32(n);
        Ok(())
    }

    fn put_count16(&mut self, n: usize) -> Result<(), CodecError> {
        let n = u16::try_from(n).map_err(|_| CodecError::TooLarge {
            size: n,
            max: u16::MAX as usize,
        })?;
        self.buf.put_u16(n);
        Ok(())
    }

    fn put_str16(&mut self, s: &str) -> Result<(), CodecError> {
        self.put_count16(s.len())?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn put_str32(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.put_count32(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }
}
