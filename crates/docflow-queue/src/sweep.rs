//! The recovery sweep (spec §4.2 "At-least-once"): not part of the hot
//! receive path, this is a periodic task a worker host runs to reset
//! messages stuck `processing` (handler crashed after claim) back to
//! `pending` so a future receiver picks them up again.

use std::sync::Arc;
use std::time::Duration;

use docflow_core::Reporter;

use crate::QueueStore;

/// Default visibility timeout: how long a message may sit `processing`
/// before the sweep considers its claimant dead and resets it (spec §9
/// open question — the source doesn't define one; this crate picks 10
/// minutes, comfortably above the slowest expected OCR/LLM call, and
/// documents the choice in `DESIGN.md`).
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(600);

/// Default interval between sweep passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run `recover_stuck` once for every queue in `queues`, logging how many
/// messages each queue reset.
pub async fn sweep_once(
    store: &dyn QueueStore,
    queues: &[&str],
    visibility_timeout: Duration,
    reporter: &mut dyn Reporter,
) {
    for queue in queues {
        match store.recover_stuck(queue, visibility_timeout).await {
            Ok(0) => {}
            Ok(n) => reporter.info(&format!("recovery sweep: reset {n} stuck message(s) on `{queue}`")),
            Err(e) => reporter.error(&format!("recovery sweep failed on `{queue}`: {e}")),
        }
    }
}

/// Run [`sweep_once`] on a fixed interval until `shutdown` fires. Intended
/// to run as its own cooperative task alongside the per-queue consumer
/// tasks (spec §10.5).
pub async fn run_sweep_loop(
    store: Arc<dyn QueueStore>,
    queues: Vec<String>,
    visibility_timeout: Duration,
    interval: Duration,
    mut reporter: Box<dyn Reporter + Send>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let refs: Vec<&str> = queues.iter().map(String::as_str).collect();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                sweep_once(store.as_ref(), &refs, visibility_timeout, reporter.as_mut()).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueueStore;
    use docflow_core::reporter::EprintlnReporter;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn sweep_resets_stuck_messages_across_queues() {
        let store = InMemoryQueueStore::new();
        store.send("ocr", json!({})).await.unwrap();
        store.send("llm", json!({})).await.unwrap();
        store.recv("ocr").await.unwrap();
        store.recv("llm").await.unwrap();

        let mut reporter = EprintlnReporter::new();
        sweep_once(
            &store,
            &["ocr", "llm"],
            StdDuration::from_millis(0),
            &mut reporter,
        )
        .await;

        assert!(store.recv("ocr").await.unwrap().is_some());
        assert!(store.recv("llm").await.unwrap().is_some());
    }
}
