//! A same-process, in-memory [`QueueStore`]. Good enough to drive the
//! pipeline handlers end-to-end in tests without a live database, and
//! structurally honest about the two-tier blocking receive: a
//! [`tokio::sync::Notify`] per queue stands in for a change-stream
//! subscription, and [`InMemoryQueueStore::degraded`] lets a test force
//! the polling fallback path the same way a standalone (non-replica-set)
//! database would force it in production.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, timeout};

use crate::{MessageStatus, QueueError, QueueMessage, new_id};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Record {
    status: MessageStatus,
    created_at: chrono::DateTime<Utc>,
    processing_since: Option<Instant>,
    msg: serde_json::Value,
}

struct QueueState {
    records: HashMap<String, Record>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Oldest `pending` record, ties broken by id (I2, §4.2 "Ordering").
    fn oldest_pending(&self) -> Option<String> {
        self.records
            .iter()
            .filter(|(_, r)| r.status == MessageStatus::Pending)
            .min_by(|(id_a, a), (id_b, b)| {
                a.created_at.cmp(&b.created_at).then_with(|| id_a.cmp(id_b))
            })
            .map(|(id, _)| id.clone())
    }
}

/// In-memory reference [`QueueStore`] implementation.
pub struct InMemoryQueueStore {
    queues: StdMutex<HashMap<String, QueueState>>,
    notify: StdMutex<HashMap<String, std::sync::Arc<Notify>>>,
    /// When true, `recv_with_timeout` skips the notify-based wakeup and
    /// falls back to plain polling — simulating change streams being
    /// unavailable (spec §4.2 fallback path, §9 capability detection).
    degraded: std::sync::atomic::AtomicBool,
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self {
            queues: StdMutex::new(HashMap::new()),
            notify: StdMutex::new(HashMap::new()),
            degraded: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Force the polling fallback path regardless of notify activity —
    /// used by tests exercising §4.2's "poll every 500ms" branch.
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, std::sync::atomic::Ordering::SeqCst);
    }

    fn notifier(&self, queue: &str) -> std::sync::Arc<Notify> {
        self.notify
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_insert_with(|| std::sync::Arc::new(Notify::new()))
            .clone()
    }

    fn try_claim(&self, queue: &str) -> Option<QueueMessage> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_insert_with(QueueState::new);
        let id = state.oldest_pending()?;
        let record = state.records.get_mut(&id).unwrap();
        record.status = MessageStatus::Processing;
        record.processing_since = Some(Instant::now());
        Some(QueueMessage {
            id,
            status: MessageStatus::Processing,
            created_at: record.created_at,
            msg: record.msg.clone(),
        })
    }
}

#[async_trait]
impl crate::QueueStore for InMemoryQueueStore {
    async fn send(&self, queue: &str, payload: serde_json::Value) -> Result<String, QueueError> {
        let id = new_id();
        {
            let mut queues = self.queues.lock().unwrap();
            let state = queues.entry(queue.to_string()).or_insert_with(QueueState::new);
            state.records.insert(
                id.clone(),
                Record {
                    status: MessageStatus::Pending,
                    created_at: Utc::now(),
                    processing_since: None,
                    msg: payload,
                },
            );
        }
        self.notifier(queue).notify_waiters();
        Ok(id)
    }

    async fn recv(&self, queue: &str) -> Result<Option<QueueMessage>, QueueError> {
        Ok(self.try_claim(queue))
    }

    async fn recv_with_timeout(
        &self,
        queue: &str,
        deadline: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        if let Some(msg) = self.try_claim(queue) {
            return Ok(Some(msg));
        }

        let degraded = self.degraded.load(std::sync::atomic::Ordering::SeqCst);
        let start = Instant::now();

        if !degraded {
            let notify = self.notifier(queue);
            loop {
                let elapsed = start.elapsed();
                if elapsed >= deadline {
                    return Ok(None);
                }
                let remaining = deadline - elapsed;
                match timeout(remaining, notify.notified()).await {
                    Ok(()) => {
                        if let Some(msg) = self.try_claim(queue) {
                            return Ok(Some(msg));
                        }
                        // Spurious wakeup (another worker claimed first) —
                        // keep waiting out the remaining deadline.
                    }
                    Err(_elapsed) => return Ok(None),
                }
            }
        }

        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Ok(None);
            }
            let remaining = deadline - elapsed;
            sleep(remaining.min(POLL_INTERVAL)).await;
            if let Some(msg) = self.try_claim(queue) {
                return Ok(Some(msg));
            }
        }
    }

    async fn complete(
        &self,
        queue: &str,
        msg_id: &str,
        status: MessageStatus,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().unwrap();
        if let Some(state) = queues.get_mut(queue) {
            if let Some(record) = state.records.get_mut(msg_id) {
                record.status = status;
                record.processing_since = None;
            }
        }
        Ok(())
    }

    async fn recover_stuck(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<u64, QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let mut reset = 0u64;
        if let Some(state) = queues.get_mut(queue) {
            for record in state.records.values_mut() {
                if record.status == MessageStatus::Processing {
                    if let Some(since) = record.processing_since {
                        if since.elapsed() >= visibility_timeout {
                            record.status = MessageStatus::Pending;
                            record.processing_since = None;
                            reset += 1;
                        }
                    }
                }
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueStore;
    use serde_json::json;

    #[tokio::test]
    async fn send_then_recv_claims_in_fifo_order() {
        let store = InMemoryQueueStore::new();
        store.send("ocr", json!({"document_id": "a"})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.send("ocr", json!({"document_id": "b"})).await.unwrap();

        let first = store.recv("ocr").await.unwrap().unwrap();
        assert_eq!(first.msg["document_id"], "a");
        let second = store.recv("ocr").await.unwrap().unwrap();
        assert_eq!(second.msg["document_id"], "b");
        assert!(store.recv("ocr").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_receivers_never_claim_the_same_message() {
        let store = std::sync::Arc::new(InMemoryQueueStore::new());
        for i in 0..200 {
            store.send("q", json!({"i": i})).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(m) = store.recv("q").await.unwrap() {
                    claimed.push(m.id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().cloned().collect();
        assert_eq!(unique.len(), all.len(), "a message was claimed twice (I2 violated)");
        assert_eq!(all.len(), 200);
    }

    #[tokio::test]
    async fn recv_with_timeout_returns_promptly_on_late_send() {
        let store = std::sync::Arc::new(InMemoryQueueStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store.recv_with_timeout("q", Duration::from_secs(2)).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.send("q", json!({"document_id": "x"})).await.unwrap();

        let start = Instant::now();
        let result = waiter.await.unwrap();
        assert!(result.is_some());
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn recv_with_timeout_returns_null_without_partial_claim() {
        let store = InMemoryQueueStore::new();
        let start = Instant::now();
        let result = store
            .recv_with_timeout("q", Duration::from_millis(150))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn degraded_mode_still_finds_a_message_via_polling() {
        let store = std::sync::Arc::new(InMemoryQueueStore::new());
        store.set_degraded(true);
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store.recv_with_timeout("q", Duration::from_secs(2)).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.send("q", json!({"document_id": "x"})).await.unwrap();
        let result = waiter.await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn recover_stuck_resets_long_processing_messages() {
        let store = InMemoryQueueStore::new();
        store.send("q", json!({"a": 1})).await.unwrap();
        let claimed = store.recv("q").await.unwrap().unwrap();
        assert_eq!(claimed.status, MessageStatus::Processing);

        let reset = store
            .recover_stuck("q", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let reclaimed = store.recv("q").await.unwrap();
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let store = InMemoryQueueStore::new();
        let id = store.send("q", json!({})).await.unwrap();
        store.recv("q").await.unwrap();
        store.complete("q", &id, MessageStatus::Completed).await.unwrap();
        store.complete("q", &id, MessageStatus::Completed).await.unwrap();
    }
}
