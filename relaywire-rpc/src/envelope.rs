//! Request and response envelopes.
//!
//! Both directions wrap their payload in the same table shape:
//!
//! ```text
//! { success = true,  data = <value>, compressed = <bool> }
//! { success = false, error = "<CODE>: <message>" }
//! ```
//!
//! A success envelope always carries `data` (possibly nil). A failure
//! envelope always carries `error` and never carries `data`.

use crate::error::RpcError;
use bytes::Bytes;
use relaywire_codec::{decode_with, encode_with, DecodeOptions, EncodeOptions, Table, Value};
use relaywire_transport::compress;

const SUCCESS: &str = "success";
const DATA: &str = "data";
const ERROR: &str = "error";
const COMPRESSED: &str = "compressed";

/// Logical envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Success { data: Value, compressed: bool },
    Failure { error: String },
}

impl Envelope {
    /// Success envelope with an uncompressed payload.
    pub fn success(data: Value) -> Self {
        Envelope::Success {
            data,
            compressed: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Envelope::Failure {
            error: error.into(),
        }
    }

    /// Failure envelope rendered from an error.
    pub fn from_error(err: &RpcError) -> Self {
        Envelope::failure(err.to_envelope_error())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    /// Builds the table sent on the wire.
    pub fn to_value(&self) -> Value {
        let mut table = Table::with_capacity(3);
        match self {
            Envelope::Success { data, compressed } => {
                table.insert(SUCCESS, true);
                table.insert(DATA, data.clone());
                table.insert(COMPRESSED, *compressed);
            }
            Envelope::Failure { error } => {
                table.insert(SUCCESS, false);
                table.insert(ERROR, error.as_str());
            }
        }
        Value::table(table)
    }

    /// Reads an envelope, rejecting any table that breaks the shape rules.
    pub fn from_value(value: &Value) -> Result<Self, RpcError> {
        let table = value.as_table().ok_or_else(|| {
            RpcError::MalformedEnvelope(format!("expected table, found {}", value.kind_name()))
        })?;

        let success = match table.get_str(SUCCESS) {
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(RpcError::MalformedEnvelope(format!(
                    "'success' must be boolean, found {}",
                    other.kind_name()
                )))
            }
            None => {
                return Err(RpcError::MalformedEnvelope(
                    "missing 'success' field".to_string(),
                ))
            }
        };

        let compressed = match table.get_str(COMPRESSED) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(RpcError::MalformedEnvelope(format!(
                    "'compressed' must be boolean, found {}",
                    other.kind_name()
                )))
            }
        };

        if success {
            let data = table.get_str(DATA).ok_or_else(|| {
                RpcError::MalformedEnvelope("success envelope without 'data'".to_string())
            })?;
            return Ok(Envelope::Success {
                data: data.clone(),
                compressed,
            });
        }

        if table.get_str(DATA).is_some() {
            return Err(RpcError::MalformedEnvelope(
                "failure envelope carries 'data'".to_string(),
            ));
        }
        match table.get_str(ERROR) {
            Some(Value::Str(error)) => Ok(Envelope::Failure {
                error: error.clone(),
            }),
            Some(other) => Err(RpcError::MalformedEnvelope(format!(
                "'error' must be string, found {}",
                other.kind_name()
            ))),
            None => Err(RpcError::MalformedEnvelope(
                "failure envelope without 'error'".to_string(),
            )),
        }
    }
}

/// Optionally compresses an envelope payload.
///
/// With `enabled`, payloads whose encoded size reaches `threshold` are
/// replaced by an LZ4 blob when that blob is strictly smaller. Returns the
/// payload to embed and its `compressed` flag.
pub fn pack_payload(
    data: Value,
    enabled: bool,
    threshold: usize,
    opts: &EncodeOptions,
) -> Result<(Value, bool), RpcError> {
    if !enabled {
        return Ok((data, false));
    }

    let plain = encode_with(&data, opts)?;
    if plain.len() < threshold {
        return Ok((data, false));
    }

    let packed = compress::compress(&plain);
    // A blob costs its tag plus a 4-byte length on top of the block.
    if packed.len() + 5 < plain.len() {
        Ok((Value::Blob(Bytes::from(packed)), true))
    } else {
        Ok((data, false))
    }
}

/// Reverses [`pack_payload`].
pub fn unpack_payload(
    data: Value,
    compressed: bool,
    opts: &DecodeOptions,
) -> Result<Value, RpcError> {
    if !compressed {
        return Ok(data);
    }
    let blob = data.as_blob().ok_or_else(|| {
        RpcError::MalformedEnvelope(format!(
            "compressed payload must be blob, found {}",
            data.kind_name()
        ))
    })?;
    let plain = compress::decompress(blob)?;
    Ok(decode_with(&plain, opts)?)
}
