//! Serving side of a request/response exchange.

use crate::config::RpcConfig;
use crate::envelope::{pack_payload, unpack_payload, Envelope};
use crate::error::{ErrorCode, RpcError};
use crate::policy::{Admission, Policy};
use bytes::Bytes;
use relaywire_codec::Value;
use relaywire_transport::{decode_transmission, prepare, Decoded, PeerId, TransportConfig};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Turns incoming request transmissions into reply transmissions.
///
/// Every failure between decoding the request and encoding the reply is
/// reported to the caller inside a `success = false` envelope.
#[derive(Clone)]
pub struct Responder {
    transport: TransportConfig,
    rpc: RpcConfig,
    policy: Policy,
}

impl Responder {
    pub fn new(transport: TransportConfig, rpc: RpcConfig) -> Self {
        Self {
            transport,
            rpc,
            policy: Policy::default(),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs `handler` on the request carried by `incoming` and returns the
    /// encoded reply.
    ///
    /// Returns `Err` only when not even the fixed internal error envelope can
    /// be encoded.
    pub fn serve<F>(
        &self,
        channel: &str,
        peer: Option<&PeerId>,
        incoming: &[u8],
        handler: F,
    ) -> Result<Bytes, RpcError>
    where
        F: FnOnce(Value) -> Result<Value, String>,
    {
        let envelope = match self.handle(channel, peer, incoming, handler) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("request on '{}' failed: {}", channel, e);
                Envelope::from_error(&e)
            }
        };

        match self.encode(&envelope) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::warn!("failed to encode reply on '{}': {}", channel, e);
                self.encode(&Envelope::failure(format!(
                    "{}: failed to serialize response",
                    ErrorCode::InternalError
                )))
            }
        }
    }

    fn handle<F>(
        &self,
        channel: &str,
        peer: Option<&PeerId>,
        incoming: &[u8],
        handler: F,
    ) -> Result<Envelope, RpcError>
    where
        F: FnOnce(Value) -> Result<Value, String>,
    {
        let request = match decode_transmission(incoming, &self.transport)? {
            Decoded::Single(value) => value,
            Decoded::Batch(values) => {
                return Err(RpcError::MalformedEnvelope(format!(
                    "request arrived as a batch of {}",
                    values.len()
                )))
            }
        };

        let data = match Envelope::from_value(&request)? {
            Envelope::Success { data, compressed } => {
                unpack_payload(data, compressed, &self.transport.decode_options())?
            }
            Envelope::Failure { .. } => {
                return Err(RpcError::MalformedEnvelope(
                    "request envelope must be a success envelope".to_string(),
                ))
            }
        };

        self.policy.validate_request(&data)?;

        let data = match self.policy.admit(channel, peer, data)? {
            Admission::Proceed(data) => data,
            Admission::Fallback(value) => return self.success(value),
        };

        let response = match catch_unwind(AssertUnwindSafe(|| handler(data))) {
            Ok(Ok(value)) => value,
            Ok(Err(message)) => return Err(RpcError::Internal(message)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!("handler on '{}' panicked: {}", channel, message);
                return Err(RpcError::Internal(message));
            }
        };

        self.policy.validate_response(&response)?;
        self.success(response)
    }

    fn success(&self, data: Value) -> Result<Envelope, RpcError> {
        let (data, compressed) = pack_payload(
            data,
            self.rpc.compress_payloads,
            self.transport.compression_threshold,
            &self.transport.encode_options(),
        )?;
        Ok(Envelope::Success { data, compressed })
    }

    fn encode(&self, envelope: &Envelope) -> Result<Bytes, RpcError> {
        Ok(prepare(
            &envelope.to_value(),
            false,
            self.transport.force_compress(false),
            &self.transport,
        )?)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
