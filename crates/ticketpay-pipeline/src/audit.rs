//! Batched audit log sink.
//!
//! Entries are buffered and bulk-inserted once `batch_size` entries are
//! waiting or when the flush timer fires. Audit writes never fail the
//! operation being audited: entries that cannot be written are logged and
//! discarded.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use ticketpay_core::AuditLogEntry;
use ticketpay_store::Store;

use crate::config::AuditConfig;

/// Buffers audit entries and writes them in bulk.
pub struct AuditBatcher {
    inner: Arc<Inner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: AuditConfig,
    store: Arc<dyn Store>,
    buffer: Mutex<Vec<AuditLogEntry>>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl AuditBatcher {
    /// Create a batcher writing to `store`.
    #[must_use]
    pub fn new(mut config: AuditConfig, store: Arc<dyn Store>) -> Self {
        config.batch_size = config.batch_size.max(1);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                buffer: Mutex::new(Vec::new()),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Buffer an entry. Reaching `batch_size` spawns a flush.
    pub fn add(&self, entry: AuditLogEntry) {
        let len = {
            let mut buffer = self.inner.lock_buffer();
            buffer.push(entry);
            buffer.len()
        };

        if len >= self.inner.config.batch_size {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.flush().await });
        }
    }

    /// Entries waiting to be written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock_buffer().len()
    }

    /// Whether no entries are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the periodic flush timer. Calling it twice has no effect.
    pub fn start(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.flush_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !inner.lock_buffer().is_empty() {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move { inner.flush().await });
                }
            }
        }));
    }

    /// Write every buffered entry before returning.
    pub async fn force_flush(&self) {
        self.inner.flush().await;
    }

    /// Stop the flush timer.
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

    /// Stop the timer and write what is left.
    pub async fn shutdown(&self) {
        self.stop();
        self.force_flush().await;
    }
}

impl Drop for AuditBatcher {
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

impl Inner {
    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, Vec<AuditLogEntry>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush(&self) {
        let _flushing = self.flush_lock.lock().await;
        let entries = std::mem::take(&mut *self.lock_buffer());
        if entries.is_empty() {
            return;
        }

        for chunk in entries.chunks(self.config.batch_size) {
            self.write_chunk(chunk).await;
        }
    }

    async fn write_chunk(&self, chunk: &[AuditLogEntry]) {
        let Err(err) = self.store.insert_audit_logs(chunk).await else {
            tracing::debug!(count = chunk.len(), "Audit entries written");
            return;
        };

        tracing::warn!(
            count = chunk.len(),
            error = %err,
            "Bulk audit insert failed, writing entries individually"
        );

        for entry in chunk {
            if let Err(err) = self
                .store
                .insert_audit_logs(std::slice::from_ref(entry))
                .await
            {
                tracing::error!(
                    audit_id = %entry.id,
                    action = %entry.action.as_str(),
                    error = %err,
                    "Failed to write audit entry"
                );
            }
        }
    }
}
