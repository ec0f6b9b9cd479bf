use anyhow::Context;
use std::sync::Arc;

use wallet_service::gateway::{self, AppState};
use wallet_service::{
    AppConfig, BalanceCache, Database, EventPublisher, Repository, WalletService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. config
    let config_path =
        std::env::var("WALLET_CONFIG").unwrap_or_else(|_| "config/wallet.yaml".to_string());
    let config = AppConfig::load(&config_path)?;

    // 2. logging
    let _guard = wallet_service::logging::init_logging("wallet-server", &config.log);

    // 3. postgres + migrations
    let db = Database::connect(&config.postgres)
        .await
        .context("open postgres")?;
    db.migrate().await.context("run migrations")?;

    // 4. redis
    let cache = BalanceCache::connect(&config.redis).context("open redis")?;
    cache.ping().await.context("redis ping")?;

    // 5. kafka producer
    let bus = EventPublisher::connect(&config.kafka).context("create kafka producer")?;

    // 6. repository + service
    let repo = Arc::new(Repository::new(db, cache, bus));
    let service = Arc::new(WalletService::new(repo.clone()));

    // 7. serve
    gateway::run_server(
        config.server.port,
        &config.ratelimit,
        AppState { service, repo },
    )
    .await
}
