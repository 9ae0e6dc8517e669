mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use orbit_api::{AppState, AppStateInner};
use orbit_conversation::{ConversationService, ConversationSettings, HttpGenerator};
use orbit_db::{ChatStore, Database};
use orbit_gateway::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "orbit=debug,orbit_api=debug,orbit_gateway=debug,orbit_conversation=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    let store: Arc<dyn ChatStore> = db.clone();

    if config.generation_url.is_none() {
        warn!("ORBIT_GENERATION_URL not set; every reply will be the apology message");
    }
    let generator = HttpGenerator::new(
        config.generation_url.clone(),
        config.generation_api_key.clone(),
        config.generation_timeout,
    )?;

    // Shared state
    let dispatcher = Dispatcher::new(config.ack_timeout);
    let conversation = ConversationService::new(
        store.clone(),
        Arc::new(generator),
        dispatcher.clone(),
        ConversationSettings {
            chatbot_name: config.chatbot_name.clone(),
            history_window: config.history_window,
        },
    );
    let state: AppState = Arc::new(AppStateInner {
        store,
        conversation,
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
    });

    let app = orbit_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Orbit server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close()?;
    info!("Orbit server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
