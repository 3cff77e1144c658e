mod cli;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crackmill_core::{
    JobDetails, JobRecord, MemoryStore, Queue, RecordStore, ensure_config,
};
use crackmill_engine::{HashcatEngine, JobOutcome, WebhookNotifier, Worker};

use crate::cli::Cli;
use crate::shutdown::{ShutdownController, spawn_ctrl_c_handler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => crackmill_core::config_path()?,
    };
    let config = ensure_config(&config_path)?;

    let req = cli.to_request()?;
    let session = req.session.clone();

    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let engine = Arc::new(HashcatEngine::new(&cli.hashcat, &config.files.log_dir));
    let notifier = match &config.notify {
        Some(settings) => WebhookNotifier::new(settings.endpoint.clone(), settings.source.clone()),
        None => WebhookNotifier::new(String::new(), String::new()),
    };
    let worker = Worker::new(store.clone(), engine, Arc::new(notifier), config);

    // Seed the record this invocation will supervise. A shared broker
    // backend would find it already present; the in-memory store starts
    // empty every run.
    if store.fetch(Queue::Jobs, &session).await?.is_none() {
        let details = JobDetails {
            name: None,
            hash_mode: req.hash_mode,
            attack_mode: req.attack_mode,
            mask: req.mask.clone(),
            wordlist: req.wordlist.as_ref().map(|p| p.display().to_string()),
            wordlist2: req.wordlist2.as_ref().map(|p| p.display().to_string()),
            rules: req.rules.iter().map(|p| p.display().to_string()).collect(),
        };
        store
            .save(Queue::Jobs, &JobRecord::new(session.clone(), details))
            .await?;
    }

    let shutdown = Arc::new(ShutdownController::new());
    spawn_ctrl_c_handler(shutdown, store.clone(), session.clone());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        session = %session,
        "crackmill starting"
    );

    if cli.speed_check {
        worker.run_speed_check(req).await?;
        tracing::info!(session = %session, "speed check complete");
        return Ok(());
    }

    let outcome = worker.run_job(req).await?;
    match outcome {
        JobOutcome::Exhausted => tracing::info!(session = %session, "keyspace exhausted"),
        JobOutcome::Cracked => tracing::info!(session = %session, "all hashes cracked"),
        JobOutcome::Stopped => tracing::info!(session = %session, "job stopped"),
        JobOutcome::Deleted => tracing::info!(session = %session, "job deleted"),
        JobOutcome::Benchmarked => tracing::info!(session = %session, "benchmark complete"),
    }
    Ok(())
}
