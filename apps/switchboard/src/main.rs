use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::config::Config;
use switchboard::gateway::bridge::{self, PubSubBus, RedisBus};
use switchboard::gateway::{server, Hub, Router};
use switchboard::{actions, AppState};

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // Broadcasts stay local unless a Redis bus is configured.
    let hub = match &config.redis_url {
        Some(url) => {
            let bus: Arc<dyn PubSubBus> = match RedisBus::connect(url).await {
                Ok(bus) => Arc::new(bus),
                Err(err) => {
                    tracing::error!(%err, "failed to connect to redis");
                    std::process::exit(1);
                }
            };
            match bridge::connect(bus, config.bridge()).await {
                Ok((hub, _listener)) => hub,
                Err(err) => {
                    tracing::error!(%err, "failed to subscribe to redis");
                    std::process::exit(1);
                }
            }
        }
        None => Arc::new(Hub::new()),
    };

    let router = Router::new(Vec::new()).register(actions::routes());

    tracing::info!(
        socket_path = %config.socket_path,
        bridged = config.redis_url.is_some(),
        "switchboard configured"
    );

    let app = server::router(&config.socket_path)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(hub, router, config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "switchboard listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
