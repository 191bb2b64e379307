//! Per-destination message batching.
//!
//! Each `(channel, destination)` pair owns at most one queue. A queue moves
//! through `empty -> filling -> flushing -> empty`:
//!
//! - the first enqueue creates the queue, records its creation time and arms
//!   a flush timer for the batch interval
//! - later enqueues append in order
//! - the queue is drained when its timer fires, when it reaches the maximum
//!   batch size, on [`Batcher::flush_all`], or when the sweeper finds it older
//!   than the maximum batch wait
//!
//! Queue mutation happens under the map's shard lock, so a flush and a
//! concurrent enqueue never interleave on the same queue.

use crate::config::TransportConfig;
use crate::dispatch::Dispatcher;
use crate::error::TransportError;
use crate::primitive::{Destination, OneWaySender};
use crate::stats::TransportStats;
use dashmap::DashMap;
use parking_lot::Mutex;
use relaywire_codec::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Identifies one batch queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub channel: String,
    pub destination: Destination,
}

impl QueueKey {
    pub fn new(channel: impl Into<String>, destination: Destination) -> Self {
        Self {
            channel: channel.into(),
            destination,
        }
    }
}

/// Why a queue is being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushCause {
    /// The queue's own timer fired; carries the generation it was armed for.
    Timer(u64),
    Full,
    Explicit,
    Sweep,
}

struct BatchQueue {
    entries: Vec<Value>,
    created_at: Instant,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

struct BatcherInner<S> {
    dispatcher: Dispatcher<S>,
    queues: DashMap<QueueKey, BatchQueue>,
    next_generation: AtomicU64,
    shutdown: AtomicBool,
    notify: Notify,
}

/// Registry of batch queues and their timers.
///
/// Must be used from within a Tokio runtime. Dropping the batcher aborts its
/// timers and discards anything still queued; call [`Batcher::shutdown`]
/// first to deliver it.
pub struct Batcher<S: OneWaySender> {
    inner: Arc<BatcherInner<S>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<S: OneWaySender> Batcher<S> {
    /// Creates a batcher delivering through `sender`.
    pub fn new(sender: Arc<S>, config: TransportConfig, stats: Arc<TransportStats>) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                dispatcher: Dispatcher::new(sender, config, stats),
                queues: DashMap::new(),
                next_generation: AtomicU64::new(1),
                shutdown: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Appends a message to the queue for `(channel, destination)`.
    ///
    /// Flushes immediately when the queue reaches the maximum batch size; the
    /// result of that delivery is returned.
    pub fn enqueue(
        &self,
        channel: &str,
        destination: Destination,
        value: Value,
    ) -> Result<(), TransportError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let key = QueueKey::new(channel, destination);
        let max = self.inner.dispatcher.config().max_batch_size;
        let full = {
            let mut queue = self
                .inner
                .queues
                .entry(key.clone())
                .or_insert_with(|| self.inner.open_queue(&key));
            queue.entries.push(value);
            queue.entries.len() >= max
        };

        // A shutdown that started after the check above may already have
        // drained the map without seeing this queue.
        if self.inner.shutdown.load(Ordering::Acquire) {
            self.inner.flush_queue(&key, FlushCause::Explicit)?;
        } else if full {
            self.inner.flush_queue(&key, FlushCause::Full)?;
        }
        Ok(())
    }

    /// Flushes every queue now. Returns the number of queues flushed.
    pub fn flush_all(&self) -> usize {
        self.inner.flush_all()
    }

    /// Flushes queues older than the maximum batch wait.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Starts the background max-wait sweeper. No-op if already running.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *sweeper = Some(tokio::spawn(async move { inner.run_sweeper().await }));
    }

    /// Stops the sweeper, flushes everything and rejects further enqueues.
    ///
    /// Returns the number of queues flushed.
    pub fn shutdown(&self) -> usize {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.inner.notify.notify_one();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let flushed = self.inner.flush_all();
        tracing::info!("batcher shut down ({} queue(s) flushed)", flushed);
        flushed
    }

    /// Returns the number of messages waiting in all queues.
    pub fn pending(&self) -> usize {
        self.inner.queues.iter().map(|q| q.entries.len()).sum()
    }

    /// Returns the number of non-empty queues.
    pub fn queue_count(&self) -> usize {
        self.inner.queues.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl<S: OneWaySender> Drop for Batcher<S> {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let mut discarded = 0;
        for mut queue in self.inner.queues.iter_mut() {
            discarded += queue.entries.len();
            if let Some(timer) = queue.timer.take() {
                timer.abort();
            }
        }
        if discarded > 0 {
            tracing::warn!("batcher dropped with {} unsent message(s)", discarded);
        }
    }
}

impl<S: OneWaySender> BatcherInner<S> {
    /// Creates an empty queue and arms its flush timer.
    fn open_queue(self: &Arc<Self>, key: &QueueKey) -> BatchQueue {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let interval = self.dispatcher.config().batch_interval();
        let inner = Arc::clone(self);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // Errors are already logged and counted by the dispatcher.
            let _ = inner.flush_queue(&timer_key, FlushCause::Timer(generation));
        });

        BatchQueue {
            entries: Vec::new(),
            created_at: Instant::now(),
            timer: Some(timer),
            generation,
        }
    }

    /// Drains one queue and delivers its contents. Returns the number of
    /// messages delivered.
    fn flush_queue(&self, key: &QueueKey, cause: FlushCause) -> Result<usize, TransportError> {
        let removed = match cause {
            FlushCause::Timer(generation) => self
                .queues
                .remove_if(key, |_, queue| queue.generation == generation),
            _ => self.queues.remove(key),
        };
        let Some((key, queue)) = removed else {
            return Ok(0);
        };

        let BatchQueue {
            entries,
            created_at,
            timer,
            ..
        } = queue;
        // A firing timer is the current task and finishes on its own.
        if !matches!(cause, FlushCause::Timer(_)) {
            if let Some(timer) = timer {
                timer.abort();
            }
        }

        let count = entries.len();
        tracing::debug!(
            "flushing {} message(s) for {} on '{}' ({:?}, age {:?})",
            count,
            key.destination,
            key.channel,
            cause,
            created_at.elapsed()
        );
        self.dispatcher
            .deliver(&key.channel, &key.destination, entries)?;
        Ok(count)
    }

    fn flush_all(&self) -> usize {
        let keys: Vec<QueueKey> = self.queues.iter().map(|q| q.key().clone()).collect();
        keys.iter()
            .filter(|key| matches!(self.flush_queue(key, FlushCause::Explicit), Ok(n) if n > 0))
            .count()
    }

    fn sweep(&self) -> usize {
        let max_wait = self.dispatcher.config().max_batch_wait();
        let stale: Vec<QueueKey> = self
            .queues
            .iter()
            .filter(|q| q.created_at.elapsed() >= max_wait)
            .map(|q| q.key().clone())
            .collect();
        for key in &stale {
            let _ = self.flush_queue(key, FlushCause::Sweep);
        }
        stale.len()
    }

    async fn run_sweeper(&self) {
        let max_wait = self.dispatcher.config().max_batch_wait();
        let period = (max_wait / 2).max(Duration::from_millis(1));
        tracing::info!("batch sweeper started (max_wait={:?})", max_wait);

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(period) => {}
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let swept = self.sweep();
            if swept > 0 {
                tracing::debug!("sweeper force-flushed {} stale queue(s)", swept);
            }
        }

        tracing::info!("batch sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::Marker;
    use crate::prepare::{decode_transmission, Decoded};
    use crate::primitive::PeerId;
    use bytes::Bytes;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, Destination, Bytes)>>,
        fail: AtomicBool,
    }

    impl OneWaySender for RecordingSender {
        fn send_one_way(
            &self,
            channel: &str,
            destination: &Destination,
            bytes: Bytes,
        ) -> Result<(), TransportError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(TransportError::Send {
                    channel: channel.to_string(),
                    reason: "link down".to_string(),
                });
            }
            self.sent
                .lock()
                .push((channel.to_string(), *destination, bytes));
            Ok(())
        }
    }

    impl RecordingSender {
        fn count(&self) -> usize {
            self.sent.lock().len()
        }

        fn decoded(&self, index: usize) -> Decoded {
            let sent = self.sent.lock();
            decode_transmission(&sent[index].2, &TransportConfig::default()).unwrap()
        }
    }

    fn batcher(config: TransportConfig) -> (Batcher<RecordingSender>, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        let stats = Arc::new(TransportStats::new());
        (Batcher::new(Arc::clone(&sender), config, stats), sender)
    }

    const PEER: Destination = Destination::Peer(PeerId(1));

    #[tokio::test(start_paused = true)]
    async fn test_timer_flush_preserves_order() {
        let (batcher, sender) = batcher(TransportConfig::default());
        for name in ["a", "b", "c"] {
            batcher.enqueue("chat", PEER, Value::from(name)).unwrap();
        }
        assert_eq!(sender.count(), 0);
        assert_eq!(batcher.pending(), 3);

        tokio::time::sleep(Duration::from_millis(31)).await;

        assert_eq!(sender.count(), 1);
        assert_eq!(
            sender.decoded(0),
            Decoded::Batch(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
        assert_eq!(batcher.pending(), 0);
        assert_eq!(batcher.queue_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_entry_bypasses_batch_framing() {
        let (batcher, sender) = batcher(TransportConfig::default());
        batcher.enqueue("chat", PEER, Value::Int(42)).unwrap();
        tokio::time::sleep(Duration::from_millis(31)).await;

        assert_eq!(sender.count(), 1);
        assert_eq!(sender.sent.lock()[0].2[0], Marker::Single.byte());
        assert_eq!(sender.decoded(0), Decoded::Single(Value::Int(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_flushes_immediately() {
        let config = TransportConfig {
            max_batch_size: 3,
            ..Default::default()
        };
        let (batcher, sender) = batcher(config);
        batcher.enqueue("chat", PEER, Value::Int(1)).unwrap();
        batcher.enqueue("chat", PEER, Value::Int(2)).unwrap();
        assert_eq!(sender.count(), 0);
        batcher.enqueue("chat", PEER, Value::Int(3)).unwrap();
        assert_eq!(sender.count(), 1);
        assert_eq!(sender.decoded(0).into_values().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_timer_does_not_flush_next_queue() {
        let config = TransportConfig {
            max_batch_size: 2,
            ..Default::default()
        };
        let (batcher, sender) = batcher(config);
        batcher.enqueue("chat", PEER, Value::Int(1)).unwrap();
        batcher.enqueue("chat", PEER, Value::Int(2)).unwrap();
        assert_eq!(sender.count(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        batcher.enqueue("chat", PEER, Value::Int(3)).unwrap();

        // the first queue's timer would have fired at 30ms
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(sender.count(), 1);
        assert_eq!(batcher.pending(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sender.count(), 2);
        assert_eq!(sender.decoded(1), Decoded::Single(Value::Int(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destinations_have_separate_queues() {
        let (batcher, sender) = batcher(TransportConfig::default());
        batcher.enqueue("chat", PEER, Value::Int(1)).unwrap();
        batcher
            .enqueue("chat", Destination::Broadcast, Value::Int(2))
            .unwrap();
        batcher.enqueue("state", PEER, Value::Int(3)).unwrap();
        assert_eq!(batcher.queue_count(), 3);

        assert_eq!(batcher.flush_all(), 3);
        assert_eq!(sender.count(), 3);
        let broadcast = sender
            .sent
            .lock()
            .iter()
            .filter(|(_, dest, _)| *dest == Destination::Broadcast)
            .count();
        assert_eq!(broadcast, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_bounds_latency() {
        // timer far beyond the wait bound, so only the sweeper can flush
        let config = TransportConfig {
            batch_interval_ms: 10_000,
            max_batch_wait_ms: 100,
            ..Default::default()
        };
        let (batcher, sender) = batcher(config);
        batcher.start_sweeper();
        batcher.enqueue("chat", PEER, Value::Int(1)).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sender.count(), 0);

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert_eq!(sender.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_rejects() {
        let (batcher, sender) = batcher(TransportConfig::default());
        batcher.start_sweeper();
        batcher.enqueue("chat", PEER, Value::Int(1)).unwrap();
        batcher.enqueue("chat", PEER, Value::Int(2)).unwrap();

        assert_eq!(batcher.shutdown(), 1);
        assert_eq!(sender.count(), 1);
        assert!(batcher.is_shut_down());
        assert!(matches!(
            batcher.enqueue("chat", PEER, Value::Int(3)),
            Err(TransportError::Closed)
        ));
        assert_eq!(batcher.shutdown(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_racing_shutdown_is_delivered() {
        let (batcher, sender) = batcher(TransportConfig {
            max_batch_size: 10_000,
            batch_interval_ms: 60_000,
            ..Default::default()
        });
        let batcher = Arc::new(batcher);

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let batcher = Arc::clone(&batcher);
                tokio::task::spawn_blocking(move || {
                    let mut accepted = 0;
                    for i in 0..2_000 {
                        let channel = format!("c{}-{}", worker, i % 16);
                        match batcher.enqueue(&channel, PEER, Value::Int(i)) {
                            Ok(()) => accepted += 1,
                            Err(TransportError::Closed) => break,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    accepted
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(1)).await;
        batcher.shutdown();

        let mut accepted = 0;
        for worker in workers {
            accepted += worker.await.unwrap();
        }

        assert_eq!(batcher.queue_count(), 0);
        let delivered: usize = (0..sender.count())
            .map(|i| sender.decoded(i).into_values().len())
            .sum();
        assert_eq!(delivered, accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_counted() {
        let sender = Arc::new(RecordingSender::default());
        sender.fail.store(true, Ordering::Relaxed);
        let stats = Arc::new(TransportStats::new());
        let config = TransportConfig {
            max_batch_size: 1,
            ..Default::default()
        };
        let batcher = Batcher::new(Arc::clone(&sender), config, Arc::clone(&stats));

        let err = batcher.enqueue("chat", PEER, Value::Int(1)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stats.snapshot().send_failures, 1);
        assert_eq!(batcher.pending(), 0);
    }
}
