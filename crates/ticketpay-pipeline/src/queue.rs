//! Generic in-memory batch queue with retry and backoff.
//!
//! Items are buffered and handed to a [`BatchProcessor`] in batches of
//! `batch_size`. A batch is flushed as soon as the buffer holds a full batch,
//! and a periodic timer flushes whatever is left. Only one flush runs at a
//! time; a trigger that arrives while a flush is running is dropped and the
//! running flush keeps draining full batches before it exits.
//!
//! Failed items are re-submitted to the same buffer after
//! `min(base_delay * 2^(retry_count - 1), max_delay)`. Items that exceed
//! `max_retries` are dropped with an error log. The buffer is not durable:
//! callers that cannot lose items must persist them before enqueueing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::QueueConfig;
use crate::error::ProcessError;

/// An item owned by a [`BatchQueue`].
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    /// Queue-assigned id, unique within the queue.
    pub id: String,
    /// The caller's payload.
    pub payload: T,
    /// When the item was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub retry_count: u32,
}

/// Result of processing one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    /// Every item reached a terminal outcome.
    Complete,
    /// The items at these indexes failed transiently and should be retried.
    Partial {
        /// Indexes into the processed batch.
        retry: Vec<usize>,
    },
}

/// Consumes batches drained from a [`BatchQueue`].
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync + 'static {
    /// Process one batch.
    ///
    /// # Errors
    ///
    /// An error means the whole batch failed; every item is retried.
    async fn process(&self, batch: &[QueueItem<T>]) -> Result<BatchResult, ProcessError>;
}

/// Counters describing queue activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Batches handed to the processor.
    pub flush_cycles: u64,
    /// Items that reached a terminal outcome.
    pub processed: u64,
    /// Items scheduled for another attempt.
    pub retried: u64,
    /// Items dropped after exhausting their retries.
    pub dropped: u64,
}

/// Delay before retry number `retry_count` (1-based).
#[must_use]
pub fn backoff_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(31);
    match base.checked_mul(1_u32 << exponent) {
        Some(delay) => delay.min(cap),
        None => cap,
    }
}

/// A batching queue driving a [`BatchProcessor`].
pub struct BatchQueue<T, P> {
    shared: Arc<Shared<T, P>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T, P> {
    name: String,
    config: QueueConfig,
    processor: P,
    buffer: Mutex<VecDeque<QueueItem<T>>>,
    flushing: AtomicBool,
    flush_done: Notify,
    pending_retries: AtomicUsize,
    retry_landed: Notify,
    next_id: AtomicU64,
    flush_cycles: AtomicU64,
    processed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

/// Releases the single-flight flag even if the flush future is dropped.
struct FlushGuard<'a, T, P>(&'a Shared<T, P>);

impl<T, P> Drop for FlushGuard<'_, T, P> {
    fn drop(&mut self) {
        self.0.flushing.store(false, Ordering::Release);
        self.0.flush_done.notify_waiters();
    }
}

impl<T, P> BatchQueue<T, P>
where
    T: Send + Sync + 'static,
    P: BatchProcessor<T>,
{
    /// Create a queue. Call [`start`](Self::start) to enable the flush timer.
    ///
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(name: impl Into<String>, mut config: QueueConfig, processor: P) -> Self {
        config.batch_size = config.batch_size.max(1);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                processor,
                buffer: Mutex::new(VecDeque::new()),
                flushing: AtomicBool::new(false),
                flush_done: Notify::new(),
                pending_retries: AtomicUsize::new(0),
                retry_landed: Notify::new(),
                next_id: AtomicU64::new(1),
                flush_cycles: AtomicU64::new(0),
                processed: AtomicU64::new(0),
                retried: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            timer: Mutex::new(None),
        }
    }

    /// The processor this queue drives.
    #[must_use]
    pub fn processor(&self) -> &P {
        &self.shared.processor
    }

    /// Append an item and return its queue id. Never waits on the processor.
    ///
    /// Must be called from within a tokio runtime: reaching `batch_size`
    /// spawns the flush.
    pub fn enqueue(&self, payload: T) -> String {
        let id = format!(
            "{}-{}",
            self.shared.name,
            self.shared.next_id.fetch_add(1, Ordering::Relaxed)
        );
        self.shared.push(QueueItem {
            id: id.clone(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
        });
        id
    }

    /// Items currently buffered, excluding retries waiting on their backoff.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock_buffer().len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retries waiting on their backoff timer.
    #[must_use]
    pub fn pending_retries(&self) -> usize {
        self.shared.pending_retries.load(Ordering::Acquire)
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let shared = &self.shared;
        QueueStats {
            flush_cycles: shared.flush_cycles.load(Ordering::Relaxed),
            processed: shared.processed.load(Ordering::Relaxed),
            retried: shared.retried.load(Ordering::Relaxed),
            dropped: shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Start the periodic flush timer. Calling it twice has no effect.
    pub fn start(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let period = shared.config.flush_interval;
        *timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if !shared.lock_buffer().is_empty() {
                    Shared::trigger(&shared, false);
                }
            }
        }));

        tracing::info!(
            queue = %self.shared.name,
            batch_size = self.shared.config.batch_size,
            flush_interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Batch queue started"
        );
    }

    /// Stop the flush timer. Buffered items stay until the next `force_flush`.
    pub fn stop(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = timer {
            handle.abort();
        }
    }

    /// Stop the flush timer, then drain everything that is left.
    pub async fn shutdown(&self) {
        self.stop();
        self.force_flush().await;
        tracing::info!(queue = %self.shared.name, stats = ?self.stats(), "Batch queue stopped");
    }

    /// Drain the queue, waiting out any in-flight flush and pending retries.
    ///
    /// On return the buffer is empty and every item either completed or was
    /// dropped after `max_retries`.
    pub async fn force_flush(&self) {
        let shared = &self.shared;
        loop {
            shared.begin_flush_when_idle().await;
            {
                let _guard = FlushGuard(shared);
                shared.drain(false).await;
            }

            let landed = shared.retry_landed.notified();
            tokio::pin!(landed);
            landed.as_mut().enable();

            let buffered = !shared.lock_buffer().is_empty();
            let pending = shared.pending_retries.load(Ordering::Acquire);
            if !buffered && pending == 0 {
                break;
            }
            if !buffered {
                tracing::debug!(queue = %shared.name, pending, "Waiting for scheduled retries");
                landed.await;
            }
        }
    }
}

impl<T, P> Drop for BatchQueue<T, P> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl<T, P> Shared<T, P>
where
    T: Send + Sync + 'static,
    P: BatchProcessor<T>,
{
    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<QueueItem<T>>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_begin_flush(&self) -> bool {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn begin_flush_when_idle(&self) {
        loop {
            let done = self.flush_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();
            if self.try_begin_flush() {
                return;
            }
            done.await;
        }
    }

    fn has_full_batch(&self) -> bool {
        self.lock_buffer().len() >= self.config.batch_size
    }

    fn push(self: &Arc<Self>, item: QueueItem<T>) {
        let len = {
            let mut buffer = self.lock_buffer();
            buffer.push_back(item);
            buffer.len()
        };
        if len >= self.config.batch_size {
            Self::trigger(self, true);
        }
    }

    /// Spawn a flush unless one is already running.
    fn trigger(this: &Arc<Self>, full_batches_only: bool) {
        if !this.try_begin_flush() {
            return;
        }
        let shared = Arc::clone(this);
        tokio::spawn(async move {
            loop {
                {
                    let _guard = FlushGuard(&*shared);
                    shared.drain(full_batches_only).await;
                }
                // Items that crossed the threshold while the flag was still set
                // found the trigger closed; pick them up here.
                if !(shared.has_full_batch() && shared.try_begin_flush()) {
                    break;
                }
            }
        });
    }

    fn take_batch(&self, full_batches_only: bool) -> Option<Vec<QueueItem<T>>> {
        let mut buffer = self.lock_buffer();
        let size = self.config.batch_size;
        if buffer.is_empty() || (full_batches_only && buffer.len() < size) {
            return None;
        }
        let take = buffer.len().min(size);
        Some(buffer.drain(..take).collect())
    }

    async fn drain(self: &Arc<Self>, full_batches_only: bool) {
        while let Some(batch) = self.take_batch(full_batches_only) {
            self.process_batch(batch).await;
        }
    }

    async fn process_batch(self: &Arc<Self>, batch: Vec<QueueItem<T>>) {
        let cycle = self.flush_cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let size = batch.len();
        tracing::debug!(queue = %self.name, cycle, size, "Flushing batch");

        match self.processor.process(&batch).await {
            Ok(BatchResult::Complete) => {
                self.processed.fetch_add(size as u64, Ordering::Relaxed);
            }
            Ok(BatchResult::Partial { retry }) => {
                let mut retry_slots = vec![false; size];
                for index in retry {
                    if let Some(slot) = retry_slots.get_mut(index) {
                        *slot = true;
                    }
                }
                for (item, retry) in batch.into_iter().zip(retry_slots) {
                    if retry {
                        self.schedule_retry(item);
                    } else {
                        self.processed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    queue = %self.name,
                    cycle,
                    size,
                    error = %err,
                    "Batch failed, scheduling retries"
                );
                for item in batch {
                    self.schedule_retry(item);
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, mut item: QueueItem<T>) {
        item.retry_count += 1;

        if item.retry_count > self.config.max_retries {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                queue = %self.name,
                item_id = %item.id,
                retries = item.retry_count - 1,
                enqueued_at = %item.enqueued_at,
                "Item permanently failed after max retries, dropping"
            );
            return;
        }

        let delay = backoff_delay(
            item.retry_count,
            self.config.base_delay,
            self.config.max_delay,
        );
        self.retried.fetch_add(1, Ordering::Relaxed);
        self.pending_retries.fetch_add(1, Ordering::AcqRel);

        tracing::debug!(
            queue = %self.name,
            item_id = %item.id,
            retry = item.retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling retry"
        );

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.push(item);
            shared.pending_retries.fetch_sub(1, Ordering::AcqRel);
            shared.retry_landed.notify_waiters();
        });
    }
}
