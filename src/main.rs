use resource_query::config::AppConfig;
use resource_query::run_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Info by default, sqlx limited to warnings; RUST_LOG overrides both
    use env_logger::{Builder, Env};
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_env(Env::default())
        .init();

    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{}, backend={:?}, default_limit={}",
        config.server.host,
        config.server.port,
        config.database.backend,
        config.query.default_limit
    );

    run_server(config).await
}
