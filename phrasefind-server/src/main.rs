//! PhraseFind service entry point
//!
//! Wires the database, the worker pool, the stream registry, and the HTTP
//! surface together, then runs until interrupted.

use clap::Parser;
use phrasefind_common::config::{resolve_root_folder, ServiceConfig};
use phrasefind_server::adapters::{
    ToolAdapters, WhisperTranscriber, YtDlpCatalog, YtDlpDownloader,
};
use phrasefind_server::pipeline::{JobContext, WorkerPool};
use phrasefind_server::quota::{
    HttpSubscriptionProvider, NoSubscriptions, SubscriptionChecker, SubscriptionProvider,
};
use phrasefind_server::server::{self, AppState};
use phrasefind_server::streams::{AnalysisProvider, OpenAiCompatProvider, StreamRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// PhraseFind - clip search and sentence analysis service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root folder path (overrides environment variable and config file)
    #[arg(short, long, value_name = "PATH")]
    root_folder: Option<PathBuf>,

    /// Host address to bind to
    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(short, long, value_name = "PORT", default_value_t = 5780)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "phrasefind_server={},phrasefind_common={}",
                    log_level, log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("PhraseFind starting...");

    // Resolve root folder and scratch space
    let root_folder = resolve_root_folder(
        args.root_folder.as_deref().and_then(|p| p.to_str()),
        "PHRASEFIND_ROOT",
    )?;
    std::fs::create_dir_all(&root_folder)?;
    let temp_dir = root_folder.join("temp");
    std::fs::create_dir_all(&temp_dir)?;
    info!("Root folder: {}", root_folder.display());

    // Initialize database
    let db_path = root_folder.join("phrasefind.db");
    let db = phrasefind_common::db::init_database(&db_path).await?;
    let config = ServiceConfig::load(&db).await?;

    // Upstream AI provider
    let provider: Arc<dyn AnalysisProvider> = Arc::new(OpenAiCompatProvider::from_env()?);

    // Entitlement provider (free tier only when unconfigured)
    let subscription_provider: Arc<dyn SubscriptionProvider> =
        match HttpSubscriptionProvider::from_env()? {
            Some(provider) => Arc::new(provider),
            None => {
                warn!("PHRASEFIND_ENTITLEMENT_URL not set; all users on free tier");
                Arc::new(NoSubscriptions)
            }
        };
    let subscriptions = SubscriptionChecker::new(
        subscription_provider,
        config.subscription_cache_minutes,
    );

    // Stream registry
    let registry = StreamRegistry::new(db.clone(), Arc::clone(&provider), config.stream_capacity);

    // Worker pool over the external tool adapters
    let adapters = ToolAdapters {
        catalog: Arc::new(YtDlpCatalog),
        downloader: Arc::new(YtDlpDownloader),
        transcriber: Arc::new(WhisperTranscriber::default()),
    };
    let pool = WorkerPool::spawn(JobContext {
        db: db.clone(),
        adapters,
        config: config.clone(),
        temp_dir,
    });

    let state = Arc::new(AppState {
        db,
        config,
        registry,
        subscriptions,
        provider,
    });

    let bind_addr = format!("{}:{}", args.host, args.port);
    info!("Starting HTTP server on {}...", bind_addr);

    server::start(&bind_addr, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    // Let in-flight jobs finish before exit
    pool.shutdown();
    pool.wait().await;
    info!("PhraseFind stopped");

    Ok(())
}
