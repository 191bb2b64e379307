//! Transmission framing.
//!
//! A transmission is one marker byte followed by a codec-encoded value.
//! When the marker says "compressed", that value is a blob holding the LZ4
//! block of the real payload's encoding. When it says "batch", the real
//! payload is a dense array of individual messages.

use crate::compress::{compress, decompress};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::marker::Marker;
use bytes::{BufMut, Bytes, BytesMut};
use relaywire_codec::{decode_with, encode_with, Value};

/// Decoded transmission.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Single(Value),
    Batch(Vec<Value>),
}

impl Decoded {
    pub fn is_batch(&self) -> bool {
        matches!(self, Decoded::Batch(_))
    }

    /// Returns the carried messages in order.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Decoded::Single(value) => vec![value],
            Decoded::Batch(values) => values,
        }
    }
}

/// Builds a transmission for `payload`.
///
/// Compression is attempted when the encoded payload reaches the configured
/// threshold or `force_compress` is set, and kept only when the compressed
/// transmission is strictly smaller. A batch payload must be a dense array.
pub fn prepare(
    payload: &Value,
    is_batch: bool,
    force_compress: bool,
    config: &TransportConfig,
) -> Result<Bytes, TransportError> {
    if is_batch && payload.as_table().and_then(|t| t.dense_values()).is_none() {
        return Err(TransportError::ShapeMismatch {
            expected: "list",
            found: payload.kind_name(),
        });
    }

    let opts = config.encode_options();
    let plain = encode_with(payload, &opts)?;

    let attempted = force_compress || plain.len() >= config.compression_threshold;
    let mut body = plain.clone();
    let mut compressed = false;
    if attempted {
        let block = compress(&plain);
        let wrapped = encode_with(&Value::Blob(Bytes::from(block)), &opts)?;
        if wrapped.len() < plain.len() {
            body = wrapped;
            compressed = true;
        }
    }

    let marker = Marker::new(compressed, is_batch);
    let mut out = BytesMut::with_capacity(1 + body.len());
    out.put_u8(marker.byte());
    out.put_slice(&body);

    if config.debug {
        tracing::debug!(
            "prepared transmission marker={:?} plain={} sent={} attempted={}",
            marker,
            plain.len(),
            out.len(),
            attempted
        );
    }

    Ok(out.freeze())
}

/// Decodes a transmission produced by [`prepare`].
pub fn decode_transmission(
    data: &[u8],
    config: &TransportConfig,
) -> Result<Decoded, TransportError> {
    let (&first, rest) = data
        .split_first()
        .ok_or(TransportError::EmptyTransmission)?;
    let marker = Marker::try_from(first)?;
    let opts = config.decode_options();

    let mut value = decode_with(rest, &opts)?;
    if marker.is_compressed() {
        let block = match &value {
            Value::Blob(block) => decompress(block)?,
            other => {
                return Err(TransportError::ShapeMismatch {
                    expected: "blob",
                    found: other.kind_name(),
                })
            }
        };
        value = decode_with(&block, &opts)?;
    }

    if config.debug {
        tracing::debug!(
            "decoded transmission marker={:?} size={}",
            marker,
            data.len()
        );
    }

    if !marker.is_batch() {
        return Ok(Decoded::Single(value));
    }

    let items = value
        .as_table()
        .and_then(|t| t.dense_values())
        .map(|values| values.into_iter().cloned().collect())
        .ok_or(TransportError::ShapeMismatch {
            expected: "list",
            found: value.kind_name(),
        })?;
    Ok(Decoded::Batch(items))
}
