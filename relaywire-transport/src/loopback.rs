//! In-process host transport.
//!
//! One-way sends land in an mpsc inbox; two-way calls are routed to a
//! responder registered for the channel, after an optional injected latency.

use crate::error::TransportError;
use crate::primitive::{Destination, OneWaySender, PeerId, TwoWayInvoker};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Message delivered through [`LoopbackHost::send_one_way`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: String,
    pub destination: Destination,
    pub bytes: Bytes,
}

type Responder = Arc<dyn Fn(&PeerId, Bytes) -> Result<Bytes, TransportError> + Send + Sync>;

/// Loopback implementation of both host primitives.
pub struct LoopbackHost {
    inbox: mpsc::UnboundedSender<Delivery>,
    responders: DashMap<String, Responder>,
    latency: Mutex<Duration>,
}

impl LoopbackHost {
    /// Creates a host and the receiving end of its inbox.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Self {
            inbox: tx,
            responders: DashMap::new(),
            latency: Mutex::new(Duration::ZERO),
        };
        (host, rx)
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Changes the delay applied before each two-way call is answered.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Registers the responder answering two-way calls on `channel`.
    pub fn register<F>(&self, channel: impl Into<String>, responder: F)
    where
        F: Fn(&PeerId, Bytes) -> Result<Bytes, TransportError> + Send + Sync + 'static,
    {
        self.responders.insert(channel.into(), Arc::new(responder));
    }

    pub fn unregister(&self, channel: &str) -> bool {
        self.responders.remove(channel).is_some()
    }
}

impl OneWaySender for LoopbackHost {
    fn send_one_way(
        &self,
        channel: &str,
        destination: &Destination,
        bytes: Bytes,
    ) -> Result<(), TransportError> {
        self.inbox
            .send(Delivery {
                channel: channel.to_string(),
                destination: *destination,
                bytes,
            })
            .map_err(|_| TransportError::Send {
                channel: channel.to_string(),
                reason: "inbox closed".to_string(),
            })
    }
}

impl TwoWayInvoker for LoopbackHost {
    fn invoke_two_way(
        &self,
        channel: &str,
        peer: &PeerId,
        bytes: Bytes,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send {
        let responder = self
            .responders
            .get(channel)
            .map(|r| Arc::clone(r.value()));
        let latency = *self.latency.lock();
        let channel = channel.to_string();
        let peer = *peer;

        async move {
            let responder = responder.ok_or(TransportError::Unreachable { channel })?;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            responder(&peer, bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_way_delivery() {
        let (host, mut inbox) = LoopbackHost::new();
        host.send_one_way("chat", &Destination::Broadcast, Bytes::from_static(b"hi"))
            .unwrap();
        let delivery = inbox.recv().await.unwrap();
        assert_eq!(delivery.channel, "chat");
        assert_eq!(delivery.destination, Destination::Broadcast);
        assert_eq!(delivery.bytes, Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_closed_inbox() {
        let (host, inbox) = LoopbackHost::new();
        drop(inbox);
        let err = host
            .send_one_way("chat", &Destination::Broadcast, Bytes::new())
            .unwrap_err();
        assert!(matches!(err, TransportError::Send { .. }));
    }

    #[tokio::test]
    async fn test_two_way_routing() {
        let (host, _inbox) = LoopbackHost::new();
        host.register("echo", |peer: &PeerId, bytes: Bytes| {
            let mut reply = peer.0.to_be_bytes().to_vec();
            reply.extend_from_slice(&bytes);
            Ok(Bytes::from(reply))
        });

        let reply = host
            .invoke_two_way("echo", &PeerId(2), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(&reply[..8], &2u64.to_be_bytes());
        assert_eq!(&reply[8..], b"x");

        let err = host
            .invoke_two_way("missing", &PeerId(2), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));

        assert!(host.unregister("echo"));
        assert!(!host.unregister("echo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_latency() {
        let (host, _inbox) = LoopbackHost::new();
        let host = host.with_latency(Duration::from_millis(250));
        host.register("echo", |_: &PeerId, bytes: Bytes| Ok(bytes));

        let start = tokio::time::Instant::now();
        host.invoke_two_way("echo", &PeerId(1), Bytes::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
