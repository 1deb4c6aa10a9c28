//! The production [`QueueStore`]: one MongoDB collection per queue,
//! `queues.<name>` (spec §6), with the atomic claim expressed as a single
//! `find_one_and_update` and blocking receive backed by a change-stream
//! watch that falls back to polling when the deployment can't support one
//! (standalone server, missing permissions) — spec §4.2, §9.

use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{DateTime as BsonDateTime, doc};
use chrono::Utc;
use docflow_core::Reporter;
use futures::stream::StreamExt;
use mongodb::Database;
use mongodb::options::{
    ChangeStreamOptions, FindOneAndUpdateOptions, FullDocumentType, ReturnDocument,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::{Instant, sleep, timeout};

use crate::{MessageStatus, QueueError, QueueMessage, QueueStore};

/// Fallback poll interval used when [`MongoQueueStore::new`] is built
/// without an explicit override — matches the spec's constant 500 ms.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize, Deserialize)]
struct QueueDoc {
    #[serde(rename = "_id")]
    id: ObjectId,
    status: MessageStatus,
    created_at: chrono::DateTime<Utc>,
    msg: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    processing_since: Option<chrono::DateTime<Utc>>,
}

impl From<QueueDoc> for QueueMessage {
    fn from(doc: QueueDoc) -> Self {
        QueueMessage {
            id: doc.id.to_hex(),
            status: doc.status,
            created_at: doc.created_at,
            msg: doc.msg,
        }
    }
}

fn collection_name(queue: &str) -> String {
    format!("queues.{queue}")
}

fn to_transport_err(e: mongodb::error::Error) -> QueueError {
    QueueError::Transport(e.to_string())
}

/// The MongoDB-backed [`QueueStore`]. One instance serves every queue in
/// the shared database; `queues.<name>` collections are created lazily on
/// first `send`.
pub struct MongoQueueStore {
    db: Database,
    /// Change-stream capability, probed once per process and cached
    /// (spec §9: "Detect capability at startup... cache the result").
    change_streams_available: OnceCell<bool>,
    /// Fallback poll interval (spec §9 open question: tunable rather than
    /// a hardcoded constant — see `docflow-config`'s `poll_interval_ms`).
    poll_interval: Duration,
}

impl MongoQueueStore {
    pub fn new(db: Database) -> Self {
        Self::with_poll_interval(db, DEFAULT_POLL_INTERVAL)
    }

    /// As [`new`](Self::new), but with an explicit fallback poll interval
    /// (wired from `docflow-config`'s `queue.poll_interval_ms` by the
    /// worker host) instead of the 500 ms default.
    pub fn with_poll_interval(db: Database, poll_interval: Duration) -> Self {
        Self {
            db,
            change_streams_available: OnceCell::new(),
            poll_interval,
        }
    }

    fn collection<T>(&self, queue: &str) -> mongodb::Collection<T> {
        self.db.collection(&collection_name(queue))
    }

    /// Probe once, lazily, whether this deployment supports change
    /// streams. A probe failure is logged at warn (the only place a
    /// capability-probe error is allowed to be silent about *why*, per
    /// §9) and cached as `false` so every subsequent call takes the
    /// polling path without re-probing.
    async fn probe_change_streams(&self, queue: &str, reporter: &mut dyn Reporter) -> bool {
        *self
            .change_streams_available
            .get_or_init(|| async {
                match self.collection(queue).watch().await {
                    Ok(_) => true,
                    Err(e) => {
                        reporter.warn(&format!(
                            "change streams unavailable, falling back to polling: {e}"
                        ));
                        false
                    }
                }
            })
            .await
    }

    async fn try_claim(&self, queue: &str) -> Result<Option<QueueMessage>, QueueError> {
        let filter = doc! { "status": "pending" };
        let update = doc! {
            "$set": {
                "status": "processing",
                "processing_since": BsonDateTime::now(),
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "created_at": 1, "_id": 1 })
            .return_document(ReturnDocument::Before)
            .build();

        let before = self
            .collection(queue)
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .map_err(to_transport_err)?;

        Ok(before.map(QueueMessage::from))
    }

    /// As [`recv_with_timeout`](QueueStore::recv_with_timeout), but takes
    /// an explicit [`Reporter`] so the capability probe can log (the
    /// trait object doesn't carry one).
    pub async fn recv_with_timeout_reporting(
        &self,
        queue: &str,
        deadline: Duration,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<QueueMessage>, QueueError> {
        if let Some(msg) = self.try_claim(queue).await? {
            return Ok(Some(msg));
        }

        let start = Instant::now();
        if self.probe_change_streams(queue, reporter).await {
            self.wait_on_change_stream(queue, start, deadline, reporter).await
        } else {
            self.poll_until(queue, start, deadline).await
        }
    }

    async fn wait_on_change_stream(
        &self,
        queue: &str,
        start: Instant,
        deadline: Duration,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let pipeline = [doc! {
            "$match": {
                "operationType": { "$in": ["insert", "update", "replace"] },
                "fullDocument.status": "pending",
            }
        }];
        let options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .build();

        let mut stream = match self
            .collection::<QueueDoc>(queue)
            .watch()
            .pipeline(pipeline)
            .with_options(options)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                // Watch setup failed mid-run (not at the startup probe) —
                // fall back silently to polling for this call, per §4.2.
                reporter.warn(&format!("change stream watch failed: {e}"));
                return self.poll_until(queue, start, deadline).await;
            }
        };

        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Ok(None);
            }
            let remaining = deadline - elapsed;
            match timeout(remaining, stream.next()).await {
                Ok(Some(Ok(_event))) => {
                    if let Some(msg) = self.try_claim(queue).await? {
                        return Ok(Some(msg));
                    }
                    // Another worker won the race; keep watching.
                }
                Ok(Some(Err(e))) => return Err(to_transport_err(e)),
                Ok(None) => return self.poll_until(queue, start, deadline).await,
                Err(_elapsed) => return Ok(None),
            }
        }
    }

    async fn poll_until(
        &self,
        queue: &str,
        start: Instant,
        deadline: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Ok(None);
            }
            let remaining = deadline - elapsed;
            sleep(remaining.min(self.poll_interval)).await;
            if let Some(msg) = self.try_claim(queue).await? {
                return Ok(Some(msg));
            }
        }
    }
}

#[async_trait]
impl QueueStore for MongoQueueStore {
    async fn send(&self, queue: &str, payload: serde_json::Value) -> Result<String, QueueError> {
        let id = ObjectId::new();
        let doc = QueueDoc {
            id,
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            msg: payload,
            processing_since: None,
        };
        self.collection(queue)
            .insert_one(doc)
            .await
            .map_err(to_transport_err)?;
        Ok(id.to_hex())
    }

    async fn recv(&self, queue: &str) -> Result<Option<QueueMessage>, QueueError> {
        self.try_claim(queue).await
    }

    async fn recv_with_timeout(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        struct SilentReporter;
        impl Reporter for SilentReporter {
            fn info(&mut self, _msg: &str) {}
            fn warn(&mut self, _msg: &str) {}
            fn error(&mut self, _msg: &str) {}
        }
        // Trait-object callers (handlers behind `dyn QueueStore`) don't
        // thread a `Reporter` through; a worker host that cares about the
        // capability-probe log should call `recv_with_timeout_reporting`
        // directly instead.
        let mut silent = SilentReporter;
        self.recv_with_timeout_reporting(queue, timeout, &mut silent).await
    }

    async fn complete(
        &self,
        queue: &str,
        msg_id: &str,
        status: MessageStatus,
    ) -> Result<(), QueueError> {
        let oid = ObjectId::parse_str(msg_id)
            .map_err(|e| QueueError::Transport(format!("invalid message id {msg_id}: {e}")))?;
        self.collection::<QueueDoc>(queue)
            .update_one(doc! { "_id": oid }, doc! { "$set": { "status": status } })
            .await
            .map_err(to_transport_err)?;
        Ok(())
    }

    async fn recover_stuck(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let filter = doc! {
            "status": "processing",
            "processing_since": { "$lte": BsonDateTime::from_chrono(cutoff) },
        };
        let update = doc! { "$set": { "status": "pending" }, "$unset": { "processing_since": "" } };
        let result = self
            .collection::<QueueDoc>(queue)
            .update_many(filter, update)
            .await
            .map_err(to_transport_err)?;
        Ok(result.modified_count)
    }
}
