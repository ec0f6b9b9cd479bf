//! Read-through balance cache backed by Redis.
//!
//! The cache is advisory: writers refresh it best-effort after commit and
//! readers fall back to the store on any miss or error.

use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::config::RedisConfig;
use crate::models::dec_str;

const BALANCE_TTL_SECS: u64 = 300;

fn balance_key(wallet_id: u64) -> String {
    format!("balance:{}", wallet_id)
}

#[derive(Clone)]
pub struct BalanceCache {
    client: redis::Client,
}

impl BalanceCache {
    pub fn connect(config: &RedisConfig) -> Result<Self, redis::RedisError> {
        let url = if config.password.is_empty() {
            format!("redis://{}/{}", config.addr, config.db)
        } else {
            format!("redis://:{}@{}/{}", config.password, config.addr, config.db)
        };
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    /// Round-trip to verify the cache is reachable at startup.
    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn set_balance(
        &self,
        wallet_id: u64,
        balance: Decimal,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn
            .set_ex(balance_key(wallet_id), dec_str(balance), BALANCE_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Ok(None) is a miss. A value that fails to parse is treated as a miss
    /// so the reader falls through to the store and overwrites it.
    pub async fn get_balance(&self, wallet_id: u64) -> Result<Option<Decimal>, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(balance_key(wallet_id)).await?;
        match value {
            Some(s) => match Decimal::from_str(&s) {
                Ok(d) => Ok(Some(d)),
                Err(e) => {
                    tracing::warn!(wallet_id, value = %s, "unparseable cached balance: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_key_format() {
        assert_eq!(balance_key(1), "balance:1");
        assert_eq!(balance_key(42_000), "balance:42000");
    }
}
