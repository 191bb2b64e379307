//! Client side of a request/response exchange.
//!
//! Every call is a [`PendingCall`] that starts `Active` and moves exactly
//! once to `Resolved`, `Failed` or `TimedOut`. The exchange task and the
//! deadline task race for that transition through a compare-and-swap on the
//! call state; the loser's outcome is dropped.

use crate::config::RpcConfig;
use crate::envelope::{pack_payload, unpack_payload, Envelope};
use crate::error::{ErrorCode, RpcError};
use crate::policy::{Admission, Policy};
use bytes::Bytes;
use parking_lot::Mutex;
use relaywire_codec::Value;
use relaywire_transport::{
    decode_transmission, prepare, Decoded, PeerId, TransportConfig, TwoWayInvoker,
};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    Active = 0,
    Resolved = 1,
    Failed = 2,
    TimedOut = 3,
}

impl CallState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CallState::Active,
            1 => CallState::Resolved,
            2 => CallState::Failed,
            _ => CallState::TimedOut,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Active => write!(f, "active"),
            CallState::Resolved => write!(f, "resolved"),
            CallState::Failed => write!(f, "failed"),
            CallState::TimedOut => write!(f, "timed out"),
        }
    }
}

type Outcome = Result<Bytes, RpcError>;

/// One in-flight call.
pub(crate) struct PendingCall {
    id: String,
    state: AtomicU8,
    reply_tx: Mutex<Option<oneshot::Sender<Outcome>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    exchange: Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl PendingCall {
    fn new(pending: Arc<AtomicUsize>) -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        pending.fetch_add(1, Ordering::AcqRel);
        let call = Arc::new(Self {
            id: format!("call-{}", uuid::Uuid::new_v4()),
            state: AtomicU8::new(CallState::Active as u8),
            reply_tx: Mutex::new(Some(tx)),
            timer: Mutex::new(None),
            exchange: Mutex::new(None),
            pending,
        });
        (call, rx)
    }

    pub(crate) fn state(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves the call out of `Active`. Returns false if another outcome
    /// already settled it.
    pub(crate) fn finish(&self, to: CallState, outcome: Outcome) -> bool {
        if self
            .state
            .compare_exchange(
                CallState::Active as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::debug!(
                "{} already {}, discarding late {} outcome",
                self.id,
                self.state(),
                to
            );
            return false;
        }

        self.pending.fetch_sub(1, Ordering::AcqRel);

        let loser = match to {
            CallState::TimedOut => self.exchange.lock().take(),
            _ => self.timer.lock().take(),
        };
        if let Some(handle) = loser {
            handle.abort();
        }

        if let Some(tx) = self.reply_tx.lock().take() {
            // The caller may have stopped waiting.
            let _ = tx.send(outcome);
        }
        true
    }

    fn set_timer(&self, handle: JoinHandle<()>) {
        Self::store(&self.timer, handle, self.state());
    }

    fn set_exchange(&self, handle: JoinHandle<()>) {
        Self::store(&self.exchange, handle, self.state());
    }

    fn store(slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>, state: CallState) {
        if state == CallState::Active {
            *slot.lock() = Some(handle);
        } else {
            handle.abort();
        }
    }
}

/// Issues requests over a [`TwoWayInvoker`] and pairs each with its reply
/// or its deadline.
pub struct Correlator<I: TwoWayInvoker> {
    invoker: Arc<I>,
    transport: TransportConfig,
    rpc: RpcConfig,
    policy: Policy,
    pending: Arc<AtomicUsize>,
}

impl<I: TwoWayInvoker> Correlator<I> {
    pub fn new(invoker: Arc<I>, transport: TransportConfig, rpc: RpcConfig) -> Self {
        Self {
            invoker,
            transport,
            rpc,
            policy: Policy::default(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of calls that have not reached a terminal state.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Sends `data` to `peer` on `channel` using the configured timeout.
    pub async fn request(
        &self,
        channel: &str,
        peer: PeerId,
        data: Value,
    ) -> Result<Value, RpcError> {
        self.request_with_timeout(channel, peer, data, self.rpc.request_timeout())
            .await
    }

    /// Sends `data` to `peer` on `channel` and waits at most `timeout`.
    pub async fn request_with_timeout(
        &self,
        channel: &str,
        peer: PeerId,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let data = match self.policy.admit(channel, Some(&peer), data)? {
            Admission::Proceed(data) => data,
            Admission::Fallback(value) => return Ok(value),
        };

        let bytes = self.encode_request(data)?;
        let outcome = self.exchange(channel, peer, bytes, timeout).await;

        match &outcome {
            Ok(_) => self.policy.record_success(),
            Err(e) if matches!(e.code(), ErrorCode::NetworkError | ErrorCode::Timeout) => {
                self.policy.record_failure()
            }
            Err(_) => {}
        }

        self.decode_reply(&outcome?)
    }

    fn encode_request(&self, data: Value) -> Result<Bytes, RpcError> {
        let (data, compressed) = pack_payload(
            data,
            self.rpc.compress_payloads,
            self.transport.compression_threshold,
            &self.transport.encode_options(),
        )?;
        let envelope = Envelope::Success { data, compressed }.to_value();
        Ok(prepare(
            &envelope,
            false,
            self.transport.force_compress(false),
            &self.transport,
        )?)
    }

    async fn exchange(
        &self,
        channel: &str,
        peer: PeerId,
        bytes: Bytes,
        timeout: Duration,
    ) -> Outcome {
        let (call, rx) = PendingCall::new(Arc::clone(&self.pending));
        tracing::debug!(
            "{} to {} on '{}' ({} bytes, timeout {:?})",
            call.id,
            peer,
            channel,
            bytes.len(),
            timeout
        );

        let timer = {
            let call = Arc::clone(&call);
            let timeout_ms = timeout.as_millis() as u64;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if call.finish(CallState::TimedOut, Err(RpcError::Timeout { timeout_ms })) {
                    tracing::warn!("{} timed out after {}ms", call.id, timeout_ms);
                }
            })
        };
        call.set_timer(timer);

        let exchange = {
            let call = Arc::clone(&call);
            let invoker = Arc::clone(&self.invoker);
            let channel = channel.to_string();
            tokio::spawn(async move {
                match invoker.invoke_two_way(&channel, &peer, bytes).await {
                    Ok(reply) => call.finish(CallState::Resolved, Ok(reply)),
                    Err(e) => call.finish(CallState::Failed, Err(RpcError::Transport(e))),
                };
            })
        };
        call.set_exchange(exchange);

        rx.await
            .unwrap_or_else(|_| Err(RpcError::Internal(format!("{} abandoned", call.id))))
    }

    fn decode_reply(&self, bytes: &[u8]) -> Result<Value, RpcError> {
        let reply = match decode_transmission(bytes, &self.transport)? {
            Decoded::Single(value) => value,
            Decoded::Batch(values) => {
                return Err(RpcError::MalformedEnvelope(format!(
                    "reply arrived as a batch of {}",
                    values.len()
                )))
            }
        };

        match Envelope::from_value(&reply)? {
            Envelope::Success { data, compressed } => {
                let data = unpack_payload(data, compressed, &self.transport.decode_options())?;
                self.policy.validate_response(&data)?;
                Ok(data)
            }
            Envelope::Failure { error } => Err(RpcError::from_remote(&error)),
        }
    }
}
