use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use statesman::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "statesman",
        "statesman starting: RUST_LOG='{}', http_addr={}, backend={:?}, data_dir='{}', max_versions={}",
        rust_log,
        config.http_addr,
        config.backend,
        config.data_dir.display(),
        config.store.max_versions
    );

    statesman::server::run(config).await
}
