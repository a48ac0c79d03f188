use reef_chat::{
    api::{build_router, AppState},
    auth::{ConnectionAuthenticator, TokenVerifier},
    chat::{cleanup_task, ChatState},
    config::Config,
    state::create_store,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first; logging setup reads it
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    init_tracing(&config);

    tracing::info!("Starting Reef Chat v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        reef_chat::metrics::init_metrics();
        tracing::info!("✅ Prometheus metrics initialized");
    } else {
        tracing::info!("⚠️  Prometheus metrics disabled in configuration");
    }

    // Initialize storage backend
    tracing::info!("Storage backend: {:?}", config.state.backend);
    let store = create_store(&config.state)?;
    tracing::info!("✅ Storage backend initialized");

    // Token verification for both websocket surfaces and the REST API
    let verifier = TokenVerifier::new(&config.auth.secret(), config.auth.token_ttl_secs);
    let authenticator = ConnectionAuthenticator::new(verifier);
    tracing::info!("✅ Connection authenticator initialized");

    let chat = Arc::new(ChatState::new(config.chat.clone(), store, authenticator));
    tracing::info!("✅ Chat state initialized");

    // Spawn session cleanup task
    let cleanup_chat = chat.clone();
    tokio::spawn(async move {
        cleanup_task(cleanup_chat).await;
    });
    tracing::info!("✅ Session cleanup task started");

    // Build HTTP router with both websocket surfaces
    let app_state = AppState::new(chat);
    let app = build_router(app_state);

    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("🚀 Chat server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Community chat: ws://{}/ws/chat", http_addr);
    tracing::info!("   Private chat: ws://{}/ws/private", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // ConnectInfo gives the handlers each peer's remote address
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            http_listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "reef_chat={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
