//! # relaywire-codec
//!
//! Type-tagged binary codec for relaywire.
//!
//! This crate provides:
//! - A closed [`Value`] model (primitives, tables, structured kinds)
//! - Collection strategy selection for tables (dense array, string map,
//!   homogeneous map, mixed map)
//! - A pure encoder and decoder with per-call back-reference tables
//! - Bridging to and from `serde_json` values

pub mod decode;
pub mod encode;
pub mod error;
pub mod json;
pub mod strategy;
pub mod tag;
pub mod value;

pub use decode::{decode, decode_with, DecodeOptions};
pub use encode::{encode, encode_with, EncodeOptions};
pub use error::CodecError;
pub use strategy::{classify, Strategy};
pub use tag::{KeyKind, Tag};
pub use value::{
    Color3, ColorKeypoint, Dim2, EnumItem, NumberKeypoint, Rect, ScaleOffset, Table, Transform3,
    Value, Vector2, Vector3,
};

/// Default maximum table nesting accepted by the encoder and decoder.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Longest string (in bytes) written with the short length prefix.
pub const SHORT_STRING_MAX: usize = 254;
