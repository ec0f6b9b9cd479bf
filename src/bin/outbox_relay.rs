use anyhow::Context;
use std::sync::Arc;

use wallet_service::{
    AppConfig, BalanceCache, Database, EventPublisher, OutboxRelay, Repository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("WALLET_CONFIG").unwrap_or_else(|_| "config/wallet.yaml".to_string());
    let config = AppConfig::load(&config_path)?;

    let _guard = wallet_service::logging::init_logging("outbox-relay", &config.log);

    let db = Database::connect(&config.postgres)
        .await
        .context("open postgres")?;

    let cache = BalanceCache::connect(&config.redis).context("open redis")?;
    cache.ping().await.context("redis ping")?;

    let bus = EventPublisher::connect(&config.kafka).context("create kafka producer")?;

    let repo = Arc::new(Repository::new(db, cache, bus));

    OutboxRelay::new(repo).run().await;
    Ok(())
}
