use std::net::SocketAddr;
use tokio::net::TcpListener;

use chat_relay::config::{generate_config_template, Config};
use chat_relay::gateway::create_gateway;
use chat_relay::routes;
use chat_relay::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chat_relay=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Chat relay v{} starting", env!("CARGO_PKG_VERSION"));

    let backend = config.storage_backend()?;
    let gateway = create_gateway(backend, &config.data_dir)?;
    tracing::info!(storage = backend.as_str(), "Persistence gateway ready");

    let broadcast_offline = config.broadcast_offline();
    if broadcast_offline {
        tracing::info!("Offline presence transitions will be broadcast");
    }

    let app_state = AppState::new(gateway, broadcast_offline).with_heartbeat(config.heartbeat());
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
