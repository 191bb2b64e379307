//! # relaywire-transport
//!
//! Adaptive transport for relaywire.
//!
//! This crate provides:
//! - The one-byte status marker and transmission framing
//! - Size-driven LZ4 compression that never grows a transmission
//! - Per-destination batching with flush timers and a max-wait sweeper
//! - The host primitive traits and an in-process loopback host

pub mod batch;
pub mod compress;
pub mod config;
mod dispatch;
pub mod error;
pub mod loopback;
pub mod marker;
pub mod prepare;
pub mod primitive;
pub mod stats;

pub use batch::{Batcher, QueueKey};
pub use config::{ConfigError, TransportConfig};
pub use error::TransportError;
pub use loopback::{Delivery, LoopbackHost};
pub use marker::Marker;
pub use prepare::{decode_transmission, prepare, Decoded};
pub use primitive::{Destination, OneWaySender, PeerId, TwoWayInvoker};
pub use stats::{StatsSnapshot, TransportStats};

use bytes::Bytes;
use dispatch::Dispatcher;
use relaywire_codec::Value;
use std::sync::Arc;

/// Outgoing message path: direct sends, batched sends, and decoding of
/// received transmissions.
pub struct AdaptiveTransport<S: OneWaySender> {
    config: TransportConfig,
    dispatcher: Dispatcher<S>,
    batcher: Batcher<S>,
    stats: Arc<TransportStats>,
}

impl<S: OneWaySender> AdaptiveTransport<S> {
    /// Creates a transport delivering through `sender`.
    pub fn new(sender: Arc<S>, config: TransportConfig) -> Self {
        let stats = Arc::new(TransportStats::new());
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&sender), config.clone(), Arc::clone(&stats)),
            batcher: Batcher::new(sender, config.clone(), Arc::clone(&stats)),
            config,
            stats,
        }
    }

    /// Sends one message now, bypassing the batcher.
    pub fn send(
        &self,
        channel: &str,
        destination: Destination,
        value: Value,
    ) -> Result<(), TransportError> {
        self.dispatcher.deliver(channel, &destination, vec![value])
    }

    /// Queues a message for batched delivery.
    pub fn enqueue(
        &self,
        channel: &str,
        destination: Destination,
        value: Value,
    ) -> Result<(), TransportError> {
        self.batcher.enqueue(channel, destination, value)
    }

    /// Flushes every batch queue now.
    pub fn flush_all(&self) -> usize {
        self.batcher.flush_all()
    }

    /// Decodes a received transmission into its messages, in order.
    pub fn receive(&self, data: &[u8]) -> Result<Vec<Value>, TransportError> {
        let values = decode_transmission(data, &self.config)?.into_values();
        self.stats.record_received(values.len());
        Ok(values)
    }

    /// Frames a payload with this transport's configuration.
    pub fn prepare(
        &self,
        payload: &Value,
        is_batch: bool,
        force_compress: bool,
    ) -> Result<Bytes, TransportError> {
        prepare(payload, is_batch, force_compress, &self.config)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Decoded, TransportError> {
        decode_transmission(data, &self.config)
    }

    /// Starts the background max-wait sweeper.
    pub fn start_sweeper(&self) {
        self.batcher.start_sweeper();
    }

    /// Flushes all queues and stops background work.
    pub fn shutdown(&self) -> usize {
        self.batcher.shutdown()
    }

    pub fn batcher(&self) -> &Batcher<S> {
        &self.batcher
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}
