use mock_broker::{BrokerMode, Settings};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let defaults = Settings::default();
    let mode = match std::env::var("BROKER_MODE") {
        Ok(raw) => BrokerMode::parse(&raw).unwrap_or_else(|| {
            tracing::warn!(%raw, "unrecognised BROKER_MODE, falling back to sync");
            BrokerMode::Sync
        }),
        Err(_) => defaults.mode,
    };
    let settings = Settings {
        username: std::env::var("BROKER_USERNAME").unwrap_or(defaults.username),
        password: std::env::var("BROKER_PASSWORD").unwrap_or(defaults.password),
        mode,
        omit_operation_token: std::env::var("BROKER_OMIT_OPERATION_TOKEN").is_ok(),
    };

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, ?mode, "mock broker listening");
    mock_broker::run(listener, settings).await
}
