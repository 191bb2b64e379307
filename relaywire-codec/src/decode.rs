//! Value decoder.
//!
//! Decoding is the exact inverse of [`crate::encode`]. Malformed input is
//! reported with the byte offset at which it was detected; the decoder
//! never panics on untrusted bytes.

use crate::error::CodecError;
use crate::tag::{KeyKind, Tag, SMALL_INT_BASE};
use crate::value::{
    Color3, ColorKeypoint, Dim2, EnumItem, NumberKeypoint, Rect, Table, Transform3, Value,
    Vector2, Vector3,
};
use crate::DEFAULT_MAX_DEPTH;
use bytes::Bytes;
use chrono::DateTime;
use std::sync::Arc;

/// Upper bound on the entries reserved up front for one table.
const MAX_PREALLOCATED_ENTRIES: usize = 1024;

/// Decoder options.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Maximum table nesting.
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DecodeOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Decodes a value with default options.
pub fn decode(data: &[u8]) -> Result<Value, CodecError> {
    decode_with(data, &DecodeOptions::default())
}

/// Decodes a value. The whole input must be consumed.
pub fn decode_with(data: &[u8], opts: &DecodeOptions) -> Result<Value, CodecError> {
    let mut decoder = Decoder {
        data,
        pos: 0,
        opts,
        refs: Vec::new(),
    };
    let value = decoder.read_value(0)?;
    if decoder.pos != data.len() {
        return Err(CodecError::TrailingBytes {
            offset: decoder.pos,
            remaining: data.len() - decoder.pos,
        });
    }
    Ok(value)
}

struct Decoder<'a, 'o> {
    data: &'a [u8],
    pos: usize,
    opts: &'o DecodeOptions,
    /// Reference slots in table start order; `None` until the table ends.
    refs: Vec<Option<Arc<Table>>>,
}

impl<'a> Decoder<'a, '_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    fn f32s<const N: usize>(&mut self) -> Result<[f32; N], CodecError> {
        let mut out = [0f32; N];
        for slot in out.iter_mut() {
            *slot = self.f32()?;
        }
        Ok(out)
    }

    fn tag(&mut self) -> Result<(usize, Tag), CodecError> {
        let offset = self.pos;
        let byte = self.u8()?;
        let tag = Tag::try_from(byte).map_err(|_| CodecError::UnknownTag { offset, tag: byte })?;
        Ok((offset, tag))
    }

    fn string(&mut self, len: usize) -> Result<String, CodecError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    fn str16(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        self.string(len)
    }

    fn str32(&mut self) -> Result<String, CodecError> {
        let len = self.u32()? as usize;
        self.string(len)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, CodecError> {
        let (offset, tag) = self.tag()?;
        match tag {
            Tag::Nil => Ok(Value::Nil),
            Tag::False => Ok(Value::Bool(false)),
            Tag::True => Ok(Value::Bool(true)),
            Tag::SmallInt => Ok(Value::Int((self.data[offset] - SMALL_INT_BASE) as i64)),
            Tag::BackRef => self.read_back_ref(),
            Tag::ArrayStart
            | Tag::HomogeneousArray
            | Tag::StringMap
            | Tag::HomogeneousMap
            | Tag::TableStart => self.read_table(tag, depth),
            Tag::TableEnd | Tag::ArrayEnd | Tag::KeyValueSep => Err(CodecError::UnexpectedTag {
                offset,
                tag: tag.byte(),
            }),
            _ => self.read_body(tag),
        }
    }

    fn read_body(&mut self, tag: Tag) -> Result<Value, CodecError> {
        let offset = self.pos;
        let value = match tag {
            Tag::Int8 => Value::Int(i8::from_be_bytes(self.array()?) as i64),
            Tag::Int16 => Value::Int(i16::from_be_bytes(self.array()?) as i64),
            Tag::Int32 => Value::Int(self.i32()? as i64),
            Tag::Int64 => Value::Int(i64::from_be_bytes(self.array()?)),
            Tag::Float32 => Value::Float(self.f32()? as f64),
            Tag::Float64 => Value::Float(f64::from_be_bytes(self.array()?)),
            Tag::ShortStr => {
                let len = self.u8()? as usize;
                Value::Str(self.string(len)?)
            }
            Tag::LongStr => Value::Str(self.str32()?),
            Tag::Vector3 => {
                let [x, y, z] = self.f32s()?;
                Value::Vector3(Vector3::new(x, y, z))
            }
            Tag::Vector2 => {
                let [x, y] = self.f32s()?;
                Value::Vector2(Vector2::new(x, y))
            }
            Tag::Color3 => {
                let [r, g, b] = self.f32s()?;
                Value::Color3(Color3::new(r, g, b))
            }
            Tag::Dim2 => {
                let x_scale = self.f32()?;
                let x_offset = self.i32()?;
                let y_scale = self.f32()?;
                let y_offset = self.i32()?;
                Value::Dim2(Dim2::new(x_scale, x_offset, y_scale, y_offset))
            }
            Tag::Transform => {
                let [x, y, z] = self.f32s()?;
                let rotation = self.f32s::<9>()?;
                Value::Transform(Transform3 {
                    position: Vector3::new(x, y, z),
                    rotation,
                })
            }
            Tag::Rect => {
                let [x0, y0, x1, y1] = self.f32s()?;
                Value::Rect(Rect {
                    min: Vector2::new(x0, y0),
                    max: Vector2::new(x1, y1),
                })
            }
            Tag::Enum => {
                let enum_type = self.str16()?;
                let name = self.str16()?;
                Value::Enum(EnumItem::new(enum_type, name))
            }
            Tag::PathRef => Value::PathRef(self.str32()?),
            Tag::Timestamp => {
                let secs = i64::from_be_bytes(self.array()?);
                let nanos = self.u32()?;
                let ts = DateTime::from_timestamp(secs, nanos).ok_or_else(|| {
                    CodecError::InvalidValue {
                        offset,
                        reason: format!("timestamp {}s {}ns out of range", secs, nanos),
                    }
                })?;
                Value::Timestamp(ts)
            }
            Tag::Palette => Value::Palette(self.u16()?),
            Tag::NumberSequence => {
                let count = self.u16()? as usize;
                self.ensure_available(count * 12)?;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    let [time, value, envelope] = self.f32s()?;
                    points.push(NumberKeypoint {
                        time,
                        value,
                        envelope,
                    });
                }
                Value::NumberSequence(points)
            }
            Tag::ColorSequence => {
                let count = self.u16()? as usize;
                self.ensure_available(count * 16)?;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    let [time, r, g, b] = self.f32s()?;
                    points.push(ColorKeypoint {
                        time,
                        color: Color3::new(r, g, b),
                    });
                }
                Value::ColorSequence(points)
            }
            Tag::Blob => {
                let len = self.u32()? as usize;
                Value::Blob(Bytes::copy_from_slice(self.take(len)?))
            }
            other => {
                return Err(CodecError::UnexpectedTag {
                    offset: offset.saturating_sub(1),
                    tag: other.byte(),
                })
            }
        };
        Ok(value)
    }

    fn ensure_available(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        Ok(())
    }

    fn read_back_ref(&mut self) -> Result<Value, CodecError> {
        let offset = self.pos;
        let index = self.u32()?;
        let slot = (index as usize)
            .checked_sub(1)
            .and_then(|i| self.refs.get(i))
            .and_then(|slot| slot.as_ref());
        match slot {
            Some(table) => Ok(Value::Table(Arc::clone(table))),
            None => Err(CodecError::DanglingReference { offset, index }),
        }
    }

    fn read_table(&mut self, tag: Tag, depth: usize) -> Result<Value, CodecError> {
        if depth >= self.opts.max_depth {
            return Err(CodecError::RecursionLimit {
                max_depth: self.opts.max_depth,
            });
        }
        let slot = self.refs.len();
        self.refs.push(None);

        let count_offset = self.pos;
        let count = self.u32()? as usize;
        // Every entry occupies at least one byte.
        if count > self.remaining() {
            return Err(CodecError::Truncated {
                offset: count_offset,
                needed: count - self.remaining(),
            });
        }
        // Nested headers can each claim the whole input, so the count only
        // sizes the first allocation up to a fixed bound.
        let capacity = count.min(MAX_PREALLOCATED_ENTRIES);

        let table = match tag {
            Tag::ArrayStart => {
                let mut table = Table::with_capacity(capacity);
                for i in 0..count {
                    let value = self.read_value(depth + 1)?;
                    table.insert(Value::Int(i as i64 + 1), value);
                }
                self.expect_end(Tag::ArrayEnd)?;
                table
            }
            Tag::HomogeneousArray => {
                let element = self.element_tag()?;
                let mut table = Table::with_capacity(capacity);
                for i in 0..count {
                    let value = self.read_body(element)?;
                    table.insert(Value::Int(i as i64 + 1), value);
                }
                self.expect_end(Tag::ArrayEnd)?;
                table
            }
            Tag::StringMap => {
                let mut table = Table::with_capacity(capacity);
                for _ in 0..count {
                    let key_offset = self.pos;
                    let key = self.str16()?;
                    let value = self.read_value(depth + 1)?;
                    insert_unique(&mut table, key_offset, Value::Str(key), value)?;
                }
                self.expect_end(Tag::TableEnd)?;
                table
            }
            Tag::HomogeneousMap => {
                let value_tag = self.element_tag()?;
                let mut table = Table::with_capacity(capacity);
                for _ in 0..count {
                    let key_offset = self.pos;
                    let key = self.read_value(depth + 1)?;
                    let value = self.read_body(value_tag)?;
                    insert_unique(&mut table, key_offset, key, value)?;
                }
                self.expect_end(Tag::TableEnd)?;
                table
            }
            _ => {
                let mut table = Table::with_capacity(capacity);
                for _ in 0..count {
                    let key_offset = self.pos;
                    let key = self.read_mixed_key(depth + 1)?;
                    let sep_offset = self.pos;
                    let sep = self.u8()?;
                    if sep != Tag::KeyValueSep.byte() {
                        return Err(CodecError::BadSeparator {
                            offset: sep_offset,
                            found: sep,
                        });
                    }
                    let value = self.read_value(depth + 1)?;
                    insert_unique(&mut table, key_offset, key, value)?;
                }
                self.expect_end(Tag::TableEnd)?;
                table
            }
        };

        let table = Arc::new(table);
        self.refs[slot] = Some(Arc::clone(&table));
        Ok(Value::Table(table))
    }

    fn element_tag(&mut self) -> Result<Tag, CodecError> {
        let (offset, tag) = self.tag()?;
        if !tag.has_shareable_body() {
            return Err(CodecError::UnexpectedTag {
                offset,
                tag: tag.byte(),
            });
        }
        Ok(tag)
    }

    fn read_mixed_key(&mut self, depth: usize) -> Result<Value, CodecError> {
        let offset = self.pos;
        let byte = self.u8()?;
        let kind = KeyKind::try_from(byte).map_err(|_| CodecError::InvalidValue {
            offset,
            reason: format!("unknown key kind {}", byte),
        })?;
        match kind {
            KeyKind::Int => Ok(Value::Int(self.i32()? as i64)),
            KeyKind::Str => Ok(Value::Str(self.str16()?)),
            KeyKind::Bool => match self.u8()? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                b => Err(CodecError::InvalidValue {
                    offset: offset + 1,
                    reason: format!("boolean key byte {}", b),
                }),
            },
            KeyKind::Other => self.read_value(depth),
        }
    }

    fn expect_end(&mut self, expected: Tag) -> Result<(), CodecError> {
        let offset = self.pos;
        let found = self.u8()?;
        if found != expected.byte() {
            return Err(CodecError::MissingEnd {
                offset,
                expected: expected.byte(),
                found,
            });
        }
        Ok(())
    }
}

/// Rejects a key the table already holds; the encoder never repeats one.
fn insert_unique(
    table: &mut Table,
    offset: usize,
    key: Value,
    value: Value,
) -> Result<(), CodecError> {
    match table.insert(key, value) {
        Some(_) => Err(CodecError::DuplicateKey { offset }),
        None => Ok(()),
    }
}
