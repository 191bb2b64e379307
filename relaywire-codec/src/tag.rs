//! Wire type tags.
//!
//! Every encoded value starts with one tag byte. The tag alone determines
//! the layout of the bytes that follow it. Tags `0xE0..=0xEF` form the
//! small-integer fast path: the low nibble is the value (0..=15) and no
//! body follows.

/// First byte of the small-integer fast-path range.
pub const SMALL_INT_BASE: u8 = 0xE0;

/// Largest integer carried by the fast path.
pub const SMALL_INT_MAX: i64 = 15;

/// Type tag of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Nil = 0x00,
    False = 0x01,
    True = 0x02,
    Int8 = 0x03,
    Int16 = 0x04,
    Int32 = 0x05,
    Int64 = 0x06,
    Float32 = 0x07,
    Float64 = 0x08,
    ShortStr = 0x09,
    LongStr = 0x0A,

    /// Mixed map (fallback strategy).
    TableStart = 0x10,
    TableEnd = 0x11,
    /// Dense array with per-element tags.
    ArrayStart = 0x12,
    ArrayEnd = 0x13,
    KeyValueSep = 0x14,
    BackRef = 0x15,
    StringMap = 0x16,
    HomogeneousMap = 0x17,
    HomogeneousArray = 0x18,

    Vector3 = 0x20,
    Vector2 = 0x21,
    Color3 = 0x22,
    Dim2 = 0x23,
    Transform = 0x24,
    Rect = 0x25,
    Enum = 0x26,
    PathRef = 0x27,
    Timestamp = 0x28,
    Palette = 0x29,
    NumberSequence = 0x2A,
    ColorSequence = 0x2B,
    Blob = 0x2C,

    /// Small integer; the value lives in the low nibble of the tag byte.
    SmallInt = SMALL_INT_BASE,
}

impl Tag {
    /// Returns the tag byte.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Returns whether this tag has a body that can be written without
    /// its tag inside a homogeneous container.
    pub fn has_shareable_body(self) -> bool {
        matches!(
            self,
            Tag::Int8
                | Tag::Int16
                | Tag::Int32
                | Tag::Int64
                | Tag::Float32
                | Tag::Float64
                | Tag::ShortStr
                | Tag::LongStr
                | Tag::Vector3
                | Tag::Vector2
                | Tag::Color3
                | Tag::Dim2
                | Tag::Transform
                | Tag::Rect
                | Tag::Enum
                | Tag::PathRef
                | Tag::Timestamp
                | Tag::Palette
                | Tag::NumberSequence
                | Tag::ColorSequence
                | Tag::Blob
        )
    }

    /// Returns whether this tag only appears as container punctuation.
    pub fn is_structural(self) -> bool {
        matches!(self, Tag::TableEnd | Tag::ArrayEnd | Tag::KeyValueSep)
    }
}

/// Unknown tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownTag(pub u8);

impl TryFrom<u8> for Tag {
    type Error = UnknownTag;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let tag = match value {
            0x00 => Tag::Nil,
            0x01 => Tag::False,
            0x02 => Tag::True,
            0x03 => Tag::Int8,
            0x04 => Tag::Int16,
            0x05 => Tag::Int32,
            0x06 => Tag::Int64,
            0x07 => Tag::Float32,
            0x08 => Tag::Float64,
            0x09 => Tag::ShortStr,
            0x0A => Tag::LongStr,
            0x10 => Tag::TableStart,
            0x11 => Tag::TableEnd,
            0x12 => Tag::ArrayStart,
            0x13 => Tag::ArrayEnd,
            0x14 => Tag::KeyValueSep,
            0x15 => Tag::BackRef,
            0x16 => Tag::StringMap,
            0x17 => Tag::HomogeneousMap,
            0x18 => Tag::HomogeneousArray,
            0x20 => Tag::Vector3,
            0x21 => Tag::Vector2,
            0x22 => Tag::Color3,
            0x23 => Tag::Dim2,
            0x24 => Tag::Transform,
            0x25 => Tag::Rect,
            0x26 => Tag::Enum,
            0x27 => Tag::PathRef,
            0x28 => Tag::Timestamp,
            0x29 => Tag::Palette,
            0x2A => Tag::NumberSequence,
            0x2B => Tag::ColorSequence,
            0x2C => Tag::Blob,
            b if b & 0xF0 == SMALL_INT_BASE => Tag::SmallInt,
            b => return Err(UnknownTag(b)),
        };
        Ok(tag)
    }
}

/// Kind byte preceding each key in a mixed map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyKind {
    /// 4-byte signed integer follows.
    Int = 1,
    /// u16 length and UTF-8 bytes follow.
    Str = 2,
    /// One byte, 0 or 1.
    Bool = 3,
    /// A fully tagged value follows.
    Other = 4,
}

impl TryFrom<u8> for KeyKind {
    type Error = UnknownTag;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(KeyKind::Int),
            2 => Ok(KeyKind::Str),
            3 => Ok(KeyKind::Bool),
            4 => Ok(KeyKind::Other),
            b => Err(UnknownTag(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_byte_roundtrip() {
        for byte in 0u8..=0xFF {
            if let Ok(tag) = Tag::try_from(byte) {
                if tag == Tag::SmallInt {
                    assert_eq!(byte & 0xF0, SMALL_INT_BASE);
                } else {
                    assert_eq!(tag.byte(), byte);
                }
            }
        }
    }

    #[test]
    fn test_small_int_range() {
        assert_eq!(Tag::try_from(0xE0).unwrap(), Tag::SmallInt);
        assert_eq!(Tag::try_from(0xEF).unwrap(), Tag::SmallInt);
        assert!(Tag::try_from(0xF0).is_err());
        assert!(Tag::try_from(0xDF).is_err());
    }

    #[test]
    fn test_unknown_tags() {
        assert_eq!(Tag::try_from(0x0B), Err(UnknownTag(0x0B)));
        assert_eq!(Tag::try_from(0x2D), Err(UnknownTag(0x2D)));
        assert_eq!(Tag::try_from(0xFF), Err(UnknownTag(0xFF)));
    }

    #[test]
    fn test_shareable_bodies() {
        assert!(Tag::Int8.has_shareable_body());
        assert!(Tag::Vector3.has_shareable_body());
        assert!(!Tag::True.has_shareable_body());
        assert!(!Tag::Nil.has_shareable_body());
        assert!(!Tag::TableStart.has_shareable_body());
        assert!(!Tag::SmallInt.has_shareable_body());
        assert!(!Tag::BackRef.has_shareable_body());
    }

    #[test]
    fn test_key_kind_conversion() {
        assert_eq!(KeyKind::try_from(1).unwrap(), KeyKind::Int);
        assert_eq!(KeyKind::try_from(2).unwrap(), KeyKind::Str);
        assert_eq!(KeyKind::try_from(3).unwrap(), KeyKind::Bool);
        assert_eq!(KeyKind::try_from(4).unwrap(), KeyKind::Other);
        assert!(KeyKind::try_from(0).is_err());
        assert!(KeyKind::try_from(5).is_err());
    }
}
