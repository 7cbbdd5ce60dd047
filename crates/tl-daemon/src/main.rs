// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tl_config::{DaemonConfig, SearchTuning, ServiceConfig, load_daemon_config, validate_tuning};
use tl_context::ContextAssembler;
use tl_daemon::{AppState, build_app};
use tl_embed::Embedder;
use tl_ingest::{FileJobStore, Orchestrator};
use tl_llm::{LlmRouter, TextGenerator};
use tl_platform::{AdapterCredentials, create_adapter};
use tl_query::QueryAnalyzer;
use tl_search::{HttpCrossEncoder, LexicalReranker, Reranker, SearchEngine};
use tl_summarize::{Summarizer, TemplateStore};
use tl_vector::{MemoryStore, QdrantHttpStore, VectorGateway, VectorStore};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tl-daemon", version, about = "Ticketlens service daemon")]
struct Args {
    /// Bind address (overrides the config file).
    #[arg(long)]
    bind: Option<String>,

    /// Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prompt template directory; falls back to the built-in templates
    /// when the directory is missing.
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Directory for the file-backed job store.
    #[arg(long)]
    job_dir: Option<PathBuf>,

    /// Platform API base URL for the ingest adapter.
    #[arg(long, env = "FRESHDESK_BASE_URL")]
    platform_url: Option<String>,

    /// Platform API key for the ingest adapter.
    #[arg(long, env = "FRESHDESK_API_KEY")]
    platform_key: Option<String>,

    /// Cross-encoder scoring endpoint; lexical rerank when absent.
    #[arg(long, env = "RERANKER_URL")]
    reranker_url: Option<String>,

    /// Dense vector dimensionality for collection creation.
    #[arg(long, default_value_t = 1536)]
    embedding_dims: usize,

    /// Run against the in-memory vector store (no Qdrant required).
    #[arg(long)]
    offline: bool,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("tl=debug,tl_daemon=debug,tower_http=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tl=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut daemon_config: DaemonConfig =
        load_daemon_config(args.config.as_deref()).context("load daemon config")?;
    if let Some(bind) = args.bind {
        daemon_config.bind = bind;
    }
    if let Some(dir) = args.template_dir {
        daemon_config.template_dir = dir.display().to_string();
    }
    if let Some(dir) = args.job_dir {
        daemon_config.job_dir = dir.display().to_string();
    }

    let service_config = ServiceConfig::from_env();
    let tuning = SearchTuning::from_env();
    validate_tuning(&tuning).context("validate search tuning")?;

    // Templates: prefer the configured directory, keep the built-ins as
    // the fallback so a bare checkout still starts.
    let template_path = PathBuf::from(&daemon_config.template_dir);
    let templates = match TemplateStore::load_dir(&template_path) {
        Ok(store) => {
            info!(dir = %template_path.display(), templates = store.len(), "templates loaded");
            store
        }
        Err(err) => {
            info!(error = %err, "using built-in templates");
            TemplateStore::builtin()
        }
    };

    // LLM router doubles as generator and embedding transport.
    let router = Arc::new(LlmRouter::from_env().context("build llm router")?);
    let generator: Arc<dyn TextGenerator> = router.clone();
    let embedder = Arc::new(Embedder::new(
        router.clone(),
        service_config.embedding_model.clone(),
    ));

    // Vector store.
    let (store, vector_db_label): (Arc<dyn VectorStore>, String) = if args.offline {
        (Arc::new(MemoryStore::new()), "memory".to_string())
    } else {
        let store = QdrantHttpStore::new(
            service_config.qdrant_url.clone(),
            service_config.qdrant_api_key.clone(),
        )
        .context("build vector store client")?;
        (Arc::new(store), service_config.qdrant_url.clone())
    };
    let gateway = VectorGateway::new(store);
    gateway
        .ensure_collection(args.embedding_dims)
        .await
        .context("ensure vector collection")?;

    // Platform adapter.
    let adapter = create_adapter(
        "freshdesk",
        AdapterCredentials {
            base_url: args
                .platform_url
                .unwrap_or_else(|| "https://example.freshdesk.com".into()),
            api_key: args.platform_key.unwrap_or_default(),
        },
    )
    .context("build platform adapter")?;
    let adapter: Arc<dyn tl_platform::PlatformAdapter> = Arc::from(adapter);

    // Cores.
    let summarizer = Arc::new(Summarizer::new(generator.clone(), templates));
    let reranker: Arc<dyn Reranker> = match &args.reranker_url {
        Some(url) => Arc::new(HttpCrossEncoder::new(url.clone()).context("build reranker client")?),
        None => Arc::new(LexicalReranker),
    };
    let engine = Arc::new(SearchEngine::new(
        gateway.clone(),
        embedder.clone(),
        Some(generator.clone()),
        reranker,
        tuning,
    ));
    let analyzer = Arc::new(QueryAnalyzer::new(generator.clone()));
    let assembler = Arc::new(ContextAssembler::new(
        adapter.clone(),
        summarizer.clone(),
        engine.clone(),
    ));

    let job_store = Arc::new(
        FileJobStore::open(&daemon_config.job_dir)
            .await
            .context("open job store")?,
    );
    let orchestrator = Arc::new(Orchestrator::new(
        job_store,
        adapter,
        summarizer,
        embedder,
        gateway,
    ));

    // Reclaim jobs an earlier crashed process left running.
    let reclaimed = orchestrator.recover_stale().await.context("recover stale jobs")?;
    if !reclaimed.is_empty() {
        info!(count = reclaimed.len(), "reclaimed stale ingest jobs");
    }

    let state = Arc::new(AppState {
        assembler,
        analyzer,
        engine,
        orchestrator,
        generator,
        default_tenant_domain: service_config.tenant_domain.clone(),
        vector_db_label,
    });

    let mut app = build_app(state);
    if !daemon_config.cors_origins.is_empty() {
        // Origins are operator-configured; exact-origin parsing failures
        // should stop startup rather than silently widen CORS.
        let origins = daemon_config
            .cors_origins
            .iter()
            .map(|o| o.parse::<axum::http::HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .context("parse cors origins")?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let listener = tokio::net::TcpListener::bind(&daemon_config.bind)
        .await
        .with_context(|| format!("bind {}", daemon_config.bind))?;
    info!(bind = %daemon_config.bind, "tl-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serve")
}
