//! Final step of a send: frame the messages and hand them to the host.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::marker::Marker;
use crate::prepare::prepare;
use crate::primitive::{Destination, OneWaySender};
use crate::stats::TransportStats;
use relaywire_codec::Value;
use std::sync::Arc;

/// Frames outgoing messages and delivers them through a [`OneWaySender`].
pub(crate) struct Dispatcher<S> {
    sender: Arc<S>,
    config: TransportConfig,
    stats: Arc<TransportStats>,
}

impl<S: OneWaySender> Dispatcher<S> {
    pub(crate) fn new(sender: Arc<S>, config: TransportConfig, stats: Arc<TransportStats>) -> Self {
        Self {
            sender,
            config,
            stats,
        }
    }

    pub(crate) fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends `items` as one transmission.
    ///
    /// A single item is sent as a plain message; two or more as a batch.
    pub(crate) fn deliver(
        &self,
        channel: &str,
        destination: &Destination,
        mut items: Vec<Value>,
    ) -> Result<(), TransportError> {
        let count = items.len();
        let (payload, is_batch) = match count {
            0 => return Ok(()),
            1 => (items.pop().unwrap_or(Value::Nil), false),
            _ => (Value::array(items), true),
        };

        let bytes = match prepare(
            &payload,
            is_batch,
            self.config.force_compress(is_batch),
            &self.config,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.record_failure();
                tracing::warn!(
                    "dropping {} message(s) for {} on '{}': {}",
                    count,
                    destination,
                    channel,
                    e
                );
                return Err(e);
            }
        };

        let compressed = Marker::try_from(bytes[0])
            .map(Marker::is_compressed)
            .unwrap_or(false);
        let size = bytes.len();

        if let Err(e) = self.sender.send_one_way(channel, destination, bytes) {
            self.stats.record_failure();
            tracing::warn!(
                "send of {} message(s) to {} on '{}' failed: {}",
                count,
                destination,
                channel,
                e
            );
            return Err(e);
        }

        self.stats.record_sent(count, size, is_batch, compressed);
        tracing::debug!(
            "sent {} message(s) to {} on '{}' ({} bytes, batch={}, compressed={})",
            count,
            destination,
            channel,
            size,
            is_batch,
            compressed
        );
        Ok(())
    }
}
