use empire_mock::MockConfig;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let mut config = MockConfig::default();
    if let Ok(app_key) = std::env::var("EMPIRE_APP_KEY") {
        config.app_key = app_key;
    }
    if let Some(polls) = std::env::var("EMPIRE_PENDING_POLLS").ok().and_then(|p| p.parse().ok()) {
        config.pending_polls = polls;
    }

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, app_key = %config.app_key, "listening");
    empire_mock::run(listener, config).await
}
