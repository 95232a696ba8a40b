use std::sync::Arc;

use anyhow::Context;

use todo_chat::agent::{ConversationalAgent, TurnOrchestrator};
use todo_chat::auth::StaticTokenVerifier;
use todo_chat::chat::{MessageLog, RateLimiter};
use todo_chat::config::AppConfig;
use todo_chat::llm::create_provider;
use todo_chat::server::{AppState, app};
use todo_chat::store::{Database, LibSqlBackend};
use todo_chat::tasks::TaskService;
use todo_chat::tools::ToolExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    eprintln!("Todo Chat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({})", config.llm.model, config.llm.backend.provider_name());
    eprintln!("   Database: {}", config.server.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/api", config.server.port);
    if config.server.api_tokens.is_empty() {
        eprintln!("   Warning: TODO_CHAT_API_TOKENS is empty, every /api request will be rejected");
    }

    let state = build_state(&config)
        .await
        .context("failed to initialize services")?;
    let router = app(state, &config.server.cors_origins);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.server.port))?;
    tracing::info!(port = config.server.port, "Server started");
    axum::serve(listener, router).await?;

    Ok(())
}

async fn build_state(config: &AppConfig) -> todo_chat::error::Result<AppState> {
    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.server.db_path).await?);

    // ── Agent ───────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let tasks = TaskService::new(Arc::clone(&db));
    let log = MessageLog::new(Arc::clone(&db));
    let orchestrator = TurnOrchestrator::new(
        log.clone(),
        ConversationalAgent::new(llm, config.agent.clone()),
        ToolExecutor::new(tasks.clone()),
        config.agent.clone(),
    );

    // ── HTTP ────────────────────────────────────────────────────────────
    Ok(AppState {
        tasks,
        log,
        orchestrator: Arc::new(orchestrator),
        verifier: Arc::new(StaticTokenVerifier::new(config.server.api_tokens.clone())),
        rate_limiter: Arc::new(RateLimiter::per_minute(config.server.rate_limit_per_minute)),
    })
}
