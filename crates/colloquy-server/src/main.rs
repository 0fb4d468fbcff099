mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use colloquy_api::cleanup;
use colloquy_api::entitlements::Entitlements;
use colloquy_api::hub::StreamHub;
use colloquy_api::orchestrator::{TurnOrchestrator, TurnSettings};
use colloquy_api::store::SqliteStore;
use colloquy_api::{AppState, AppStateInner};
use colloquy_llm::openai::OpenAiProvider;
use colloquy_llm::smooth::Smoothing;
use colloquy_llm::title::TitleGenerator;
use colloquy_llm::tools::{GetInformation, RetrievalClient, UnderstandQuery};
use colloquy_llm::{LanguageModel, ModelAdapter, ToolSet};

use crate::config::Config;

/// How often finished streams are checked for pruning.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "colloquy=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("FATAL: {:#}", e);
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = colloquy_db::Database::open(&config.db_path)?;
    let store = Arc::new(SqliteStore::new(db));

    let http = reqwest::Client::builder().build()?;
    let chat_model: Arc<dyn LanguageModel> = Arc::new(OpenAiProvider::new(
        http.clone(),
        &config.openai_base_url,
        &config.openai_api_key,
        &config.chat_model,
    ));
    let title_model: Arc<dyn LanguageModel> = Arc::new(OpenAiProvider::new(
        http.clone(),
        &config.openai_base_url,
        &config.openai_api_key,
        &config.title_model,
    ));

    let tools = ToolSet::new()
        .with(Arc::new(GetInformation::new(RetrievalClient::new(
            http.clone(),
            &config.retrieval_url,
        ))))
        .with(Arc::new(UnderstandQuery::new(chat_model.clone())));
    info!(available = ?tools.names(), enabled = ?config.enabled_tools, "tools registered");

    let hub = StreamHub::new();
    tokio::spawn(cleanup::run_cleanup_loop(
        hub.clone(),
        config.stream_retention,
        CLEANUP_INTERVAL,
    ));

    let orchestrator = TurnOrchestrator::new(
        store,
        ModelAdapter::new(chat_model, Smoothing { delay: config.smooth_delay }),
        TitleGenerator::new(title_model),
        tools,
        config.entitlements,
        hub,
        TurnSettings {
            max_steps: config.max_steps,
            enabled_tools: config.enabled_tools.clone(),
            ..TurnSettings::default()
        },
    );
    log_limits(&config.entitlements);

    let state: AppState = Arc::new(AppStateInner {
        orchestrator,
        jwt_secret: config.jwt_secret.clone(),
        max_duration: config.max_duration,
    });

    // The timeout bounds the response head; streamed bodies are cut by the
    // handlers at the same ceiling.
    let app = colloquy_api::router(state)
        .layer(TimeoutLayer::new(config.max_duration))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Colloquy server listening on {}", addr);
    info!("Models: chat={} title={}", config.chat_model, config.title_model);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn log_limits(limits: &Entitlements) {
    info!(
        "Daily message limits: guest={} regular={}",
        limits.guest_max_messages_per_day, limits.regular_max_messages_per_day
    );
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
