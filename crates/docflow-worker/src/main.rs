//! The worker host (§10.5). Loads configuration, builds MongoDB-backed
//! adapters, wires a [`docflow_pipeline::Context`], spawns one
//! cooperative task per queue consumer (`ocr`, `llm`, `kb_index`,
//! `webhook`), and runs the recovery sweep (§4.2) and the webhook
//! due-delivery sweep (§4.5) on fixed intervals. Installs a shutdown
//! handler implementing §5's cancellation contract.

mod providers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use docflow_core::reporter::EprintlnReporter;
use docflow_core::Reporter;
use docflow_delivery::{DeliveryEngine, MongoDeliveryStore, MongoWebhookConfigStore};
use docflow_pipeline::artifacts::{BlobLlmResultStore, BlobOcrArtifactStore};
use docflow_pipeline::prompts::InMemoryPromptResolver;
use docflow_pipeline::{Context, HANDLED_QUEUES};
use docflow_queue::mongo::MongoQueueStore;
use docflow_queue::{sweep, MessageStatus, QueueMessage, QueueStore};
use docflow_store::document::MongoDocumentStore;
use docflow_store::blob::MongoBlobStore;
use docflow_store::{BlobStore, DocumentStore};
use docflow_types::{KbIndexMsg, LlmMsg, OcrMsg, WebhookMsg};
use tokio::sync::watch;

use providers::{UnimplementedLlmProvider, UnimplementedOcrProvider};

#[derive(Parser, Debug)]
#[command(name = "docflow-worker", version)]
#[command(about = "Runs the docflow pipeline queue consumers and recovery sweeps")]
struct Cli {
    /// Directory to look for `.docflow.toml` in (default: current directory).
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Poll timeout each consumer task blocks for per `recv_with_timeout` call.
    #[arg(long, default_value_t = 5)]
    poll_timeout_secs: u64,

    /// Shutdown grace period: how long currently-processing messages get
    /// to finish after a shutdown signal (spec §5 "Cancellation").
    #[arg(long, default_value_t = 30)]
    shutdown_grace_secs: u64,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker host: spawn queue consumers and sweeps until shutdown.
    Run,
    /// Run the recovery sweep and the webhook due-delivery sweep once, then exit.
    Sweep,
    /// Print configuration and connectivity diagnostics without running anything.
    Doctor,
}

struct Adapters {
    queue: Arc<dyn QueueStore>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    delivery: Arc<DeliveryEngine>,
    visibility_timeout: Duration,
    sweep_interval: Duration,
}

async fn build_adapters(config: &docflow_config::Config) -> Result<Adapters> {
    let master_secret = config
        .require_master_secret()
        .context("worker host refuses to start without a master secret")?
        .to_string();

    let client = mongodb::Client::with_uri_str(&config.database.uri)
        .await
        .with_context(|| format!("failed to connect to {}", config.database.uri))?;
    let db = client.database(&config.database.database_name);

    let queue: Arc<dyn QueueStore> = Arc::new(MongoQueueStore::with_poll_interval(
        db.clone(),
        Duration::from_millis(config.queue.poll_interval_ms),
    ));
    let documents: Arc<dyn DocumentStore> = Arc::new(MongoDocumentStore::new(db.clone()));
    let blobs: Arc<dyn BlobStore> = Arc::new(MongoBlobStore::new(db.clone()));
    let configs = Arc::new(MongoWebhookConfigStore::new(db.clone()));
    let deliveries = Arc::new(MongoDeliveryStore::new(db.clone()));
    let delivery = Arc::new(
        DeliveryEngine::new(configs, deliveries, queue.clone(), master_secret)?
            .with_max_attempts(config.webhook.max_attempts),
    );

    Ok(Adapters {
        queue,
        documents,
        blobs,
        delivery,
        visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
        sweep_interval: Duration::from_secs(config.queue.recovery_sweep_interval_secs),
    })
}

fn build_context(adapters: &Adapters) -> Context {
    let blobs = adapters.blobs.clone();
    Context::new(
        adapters.queue.clone(),
        adapters.documents.clone(),
        blobs.clone(),
        Arc::new(BlobOcrArtifactStore::new(blobs.clone())),
        Arc::new(BlobLlmResultStore::new(blobs)),
        // OCR/LLM provider integration is out of scope (spec §1); these
        // stand in for the seam until an embedder wires a real adapter
        // (see DESIGN.md).
        Arc::new(UnimplementedOcrProvider),
        Arc::new(UnimplementedLlmProvider),
        Arc::new(InMemoryPromptResolver::new()),
        adapters.delivery.clone(),
    )
}

/// Dispatch one claimed message to the handler for its queue, matching
/// the registry spec §4.4.4 calls out: `ocr`, `llm`, `kb_index`, `webhook`.
async fn dispatch(queue: &str, ctx: &Context, msg: &QueueMessage, reporter: &mut dyn Reporter) {
    match queue {
        "ocr" => match serde_json::from_value::<OcrMsg>(msg.msg.clone()) {
            Ok(payload) => {
                docflow_pipeline::handle_ocr_message(ctx, &payload, reporter).await;
            }
            Err(e) => reporter.error(&format!("unrecognized ocr payload: {e}")),
        },
        "llm" => match serde_json::from_value::<LlmMsg>(msg.msg.clone()) {
            Ok(payload) => {
                docflow_pipeline::handle_llm_message(ctx, &payload, reporter).await;
            }
            Err(e) => reporter.error(&format!("unrecognized llm payload: {e}")),
        },
        "kb_index" => match serde_json::from_value::<KbIndexMsg>(msg.msg.clone()) {
            Ok(payload) => {
                docflow_pipeline::handle_kb_index_message(ctx, &payload, reporter).await;
            }
            Err(e) => reporter.error(&format!("unrecognized kb_index payload: {e}")),
        },
        "webhook" => match serde_json::from_value::<WebhookMsg>(msg.msg.clone()) {
            Ok(payload) => {
                docflow_pipeline::handle_webhook_message(ctx, &payload, reporter).await;
            }
            Err(e) => reporter.error(&format!("unrecognized webhook payload: {e}")),
        },
        other => reporter.warn(&format!("no handler registered for queue `{other}`")),
    }
}

/// One consumer task's whole life: block on `recv_with_timeout`, dispatch
/// a claimed message, complete the queue message unconditionally (spec
/// §4.4's "a handler exception never propagates past the message
/// boundary... the message is marked completed"), repeat until shutdown.
async fn run_consumer(
    queue_name: &'static str,
    ctx: Context,
    store: Arc<dyn QueueStore>,
    poll_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reporter = EprintlnReporter::with_prefix(queue_name);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            received = store.recv_with_timeout(queue_name, poll_timeout) => {
                match received {
                    Ok(Some(msg)) => {
                        dispatch(queue_name, &ctx, &msg, &mut reporter).await;
                        if let Err(e) = store.complete(queue_name, &msg.id, MessageStatus::Completed).await {
                            reporter.error(&format!("failed to mark message `{}` completed: {e}", msg.id));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => reporter.error(&format!("recv_with_timeout failed: {e}")),
                }
            }
        }
    }
}

/// The webhook due-delivery sweep (spec §4.5 "Retry enqueue"): re-enqueues
/// `webhook` messages for deliveries whose `next_attempt_at` has come due,
/// running alongside the queue recovery sweep on its own interval.
async fn run_webhook_sweep_loop(
    delivery: Arc<DeliveryEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reporter = EprintlnReporter::with_prefix("webhook-sweep");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = delivery.sweep_due(500, &mut reporter).await {
                    reporter.error(&format!("webhook sweep failed: {e}"));
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn wait_for_shutdown_signal(reporter: &mut dyn Reporter) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                reporter.warn(&format!("failed to install SIGTERM handler: {e}"));
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => reporter.info("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => reporter.info("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        reporter.info("received ctrl-c");
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let mut config = docflow_config::load_config(&cli.config_dir)?;
    config.apply_env_overrides();
    let adapters = build_adapters(&config).await?;
    let ctx = build_context(&adapters);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_timeout = Duration::from_secs(cli.poll_timeout_secs);

    let mut handles = Vec::new();
    for queue in HANDLED_QUEUES {
        let ctx = ctx.clone();
        let store = adapters.queue.clone();
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(run_consumer(queue, ctx, store, poll_timeout, rx)));
    }

    handles.push(tokio::spawn(sweep::run_sweep_loop(
        adapters.queue.clone(),
        HANDLED_QUEUES.iter().map(|s| s.to_string()).collect(),
        adapters.visibility_timeout,
        adapters.sweep_interval,
        Box::new(EprintlnReporter::with_prefix("recovery-sweep")),
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(run_webhook_sweep_loop(
        adapters.delivery.clone(),
        adapters.sweep_interval,
        shutdown_rx.clone(),
    )));

    let mut reporter = EprintlnReporter::with_prefix("worker");
    reporter.info("worker host started");
    wait_for_shutdown_signal(&mut reporter).await;

    // Stop accepting new claims, give in-flight work a grace period, never
    // mark an in-flight message failed solely due to shutdown (spec §5).
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(cli.shutdown_grace_secs);
    let joined = tokio::time::timeout(grace, futures_join_all(handles)).await;
    if joined.is_err() {
        reporter.warn("shutdown grace period elapsed; remaining tasks left mid-flight for the recovery sweep");
    } else {
        reporter.info("worker host stopped cleanly");
    }

    Ok(())
}

async fn futures_join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn sweep_once(cli: &Cli) -> Result<()> {
    let mut config = docflow_config::load_config(&cli.config_dir)?;
    config.apply_env_overrides();
    let adapters = build_adapters(&config).await?;
    let mut reporter = EprintlnReporter::with_prefix("sweep");

    let queues: Vec<&str> = HANDLED_QUEUES.to_vec();
    sweep::sweep_once(adapters.queue.as_ref(), &queues, adapters.visibility_timeout, &mut reporter).await;
    adapters.delivery.sweep_due(1000, &mut reporter).await?;
    Ok(())
}

fn doctor(cli: &Cli) -> Result<()> {
    let mut config = docflow_config::load_config(&cli.config_dir)?;
    config.apply_env_overrides();

    println!("docflow-worker doctor");
    println!("  config_dir:        {}", cli.config_dir.display());
    println!("  database.uri:      {}", config.database.uri);
    println!("  database.name:     {}", config.database.database_name);
    println!("  queue.poll_ms:     {}", config.queue.poll_interval_ms);
    println!("  queue.visibility:  {}s", config.queue.visibility_timeout_secs);
    println!("  webhook.attempts:  {}", config.webhook.max_attempts);
    match config.require_master_secret() {
        Ok(_) => println!("  master_secret:     present"),
        Err(e) => println!("  master_secret:     MISSING ({e})"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match cli.cmd {
        Commands::Run => runtime.block_on(run(&cli)),
        Commands::Sweep => runtime.block_on(sweep_once(&cli)),
        Commands::Doctor => doctor(&cli),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_default_run_invocation() {
        let cli = Cli::parse_from(["docflow-worker", "run"]);
        assert!(matches!(cli.cmd, Commands::Run));
        assert_eq!(cli.poll_timeout_secs, 5);
        assert_eq!(cli.shutdown_grace_secs, 30);
    }

    #[test]
    fn cli_parses_doctor_with_custom_config_dir() {
        let cli = Cli::parse_from(["docflow-worker", "--config-dir", "/tmp/cfg", "doctor"]);
        assert!(matches!(cli.cmd, Commands::Doctor));
        assert_eq!(cli.config_dir, PathBuf::from("/tmp/cfg"));
    }

    struct NoopOcrProvider;

    #[async_trait::async_trait]
    impl docflow_pipeline::OcrProvider for NoopOcrProvider {
        async fn run(&self, _pdf_bytes: &[u8]) -> anyhow::Result<docflow_pipeline::OcrOutput> {
            Err(anyhow::anyhow!("not wired in this test"))
        }
    }

    struct NoopLlmProvider;

    #[async_trait::async_trait]
    impl docflow_pipeline::LlmProvider for NoopLlmProvider {
        async fn complete(&self, _prompt: &str, _document_text: &str) -> anyhow::Result<serde_json::Value> {
            Err(anyhow::anyhow!("not wired in this test"))
        }
    }

    #[tokio::test]
    async fn dispatch_reports_unrecognized_payload_without_panicking() {
        use docflow_delivery::{DeliveryEngine, InMemoryDeliveryStore, InMemoryWebhookConfigStore};
        use docflow_pipeline::prompts::InMemoryPromptResolver;
        use docflow_queue::memory::InMemoryQueueStore;
        use docflow_store::blob::FileBlobStore;
        use docflow_store::document::InMemoryDocumentStore;

        let queue = Arc::new(InMemoryQueueStore::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let dir = std::env::temp_dir().join(format!("docflow-worker-test-{}", std::process::id()));
        let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(dir));
        let configs = Arc::new(InMemoryWebhookConfigStore::new());
        let deliveries = Arc::new(InMemoryDeliveryStore::new());
        let delivery = Arc::new(DeliveryEngine::new(configs, deliveries, queue.clone(), "master").unwrap());

        let ctx = Context::new(
            queue,
            documents,
            blobs,
            Arc::new(BlobOcrArtifactStore::new(Arc::new(FileBlobStore::new(
                std::env::temp_dir().join("docflow-worker-artifacts"),
            )))),
            Arc::new(BlobLlmResultStore::new(Arc::new(FileBlobStore::new(
                std::env::temp_dir().join("docflow-worker-llm-results"),
            )))),
            Arc::new(NoopOcrProvider),
            Arc::new(NoopLlmProvider),
            Arc::new(InMemoryPromptResolver::new()),
            delivery,
        );
        let mut reporter = EprintlnReporter::new();
        let bogus = QueueMessage {
            id: "id-1".to_string(),
            status: MessageStatus::Processing,
            created_at: chrono::Utc::now(),
            msg: serde_json::json!({ "not": "a recognized shape" }),
        };
        // document_id is a required field on OcrMsg — missing it is a
        // deserialize error, exercised here to confirm dispatch logs
        // rather than panicking.
        dispatch("ocr", &ctx, &bogus, &mut reporter).await;
    }
}
