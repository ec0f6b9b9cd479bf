//! Data access layer over the authoritative store, the balance cache and the
//! message bus. Encapsulates the SQL patterns; business logic lives in the
//! service layer.
//!
//! Mutating store operations take an executor so they run inside the caller's
//! transaction; poll/mark/read helpers run directly against the pool.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use thiserror::Error;

use crate::bus::{BusError, EventPublisher};
use crate::cache::BalanceCache;
use crate::db::Database;
use crate::models::{NewOutboxEvent, NewTxRecord, OutboxEvent, TxRecord, TxType, Wallet,
    AGGREGATE_WALLET};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// CAS update matched no row: the stored version moved underneath us.
    #[error("optimistic lock conflict")]
    OptimisticConflict,
    /// The `(wallet_id, idempotency_key, type)` uniqueness constraint fired.
    #[error("duplicate idempotency key")]
    DuplicateIdempotency,
    /// Insert hit an existing primary key.
    #[error("row already exists")]
    Conflict,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct Repository {
    db: Database,
    cache: BalanceCache,
    bus: EventPublisher,
}

impl Repository {
    pub fn new(db: Database, cache: BalanceCache, bus: EventPublisher) -> Self {
        Self { db, cache, bus }
    }

    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        self.db.health_check().await
    }

    /// Open a store transaction. All mutating operations must run on it.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.db.pool().begin().await?)
    }

    /// Read a wallet row holding its row lock until commit/rollback.
    pub async fn get_wallet_for_update(
        &self,
        exec: impl PgExecutor<'_>,
        wallet_id: u64,
    ) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(
            "SELECT id, balance, version, updated_at FROM wallet WHERE id = $1 FOR UPDATE",
        )
        .bind(wallet_id as i64)
        .fetch_optional(exec)
        .await?;

        Ok(row.map(|r| wallet_from_row(&r)))
    }

    /// Plain read, no lock. Used by the balance read-through path.
    pub async fn get_wallet(&self, wallet_id: u64) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query("SELECT id, balance, version, updated_at FROM wallet WHERE id = $1")
            .bind(wallet_id as i64)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|r| wallet_from_row(&r)))
    }

    pub async fn create_wallet(
        &self,
        exec: impl PgExecutor<'_>,
        wallet: &Wallet,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO wallet (id, balance, version) VALUES ($1, $2, $3)")
            .bind(wallet.id as i64)
            .bind(wallet.balance)
            .bind(wallet.version as i64)
            .execute(exec)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict
                } else {
                    StoreError::Sqlx(e)
                }
            })?;
        Ok(())
    }

    /// CAS update: only succeeds while the stored version still equals
    /// `expected_version`; bumps the version by exactly one.
    pub async fn update_wallet(
        &self,
        exec: impl PgExecutor<'_>,
        wallet_id: u64,
        new_balance: Decimal,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE wallet SET balance = $1, version = version + 1, updated_at = now() \
             WHERE id = $2 AND version = $3",
        )
        .bind(new_balance)
        .bind(wallet_id as i64)
        .bind(expected_version as i64)
        .execute(exec)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OptimisticConflict);
        }
        Ok(())
    }

    pub async fn create_transaction(
        &self,
        exec: impl PgExecutor<'_>,
        tx: &NewTxRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transaction \
                 (wallet_id, type, amount, balance_before, balance_after, \
                  related_wallet_id, idempotency_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(tx.wallet_id as i64)
        .bind(tx.tx_type.as_str())
        .bind(tx.amount)
        .bind(tx.balance_before)
        .bind(tx.balance_after)
        .bind(tx.related_wallet_id.map(|id| id as i64))
        .bind(tx.idempotency_key.as_deref())
        .execute(exec)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateIdempotency
            } else {
                StoreError::Sqlx(e)
            }
        })?;
        Ok(())
    }

    /// Look up the committed ledger row of an idempotent operation.
    /// An empty key never matches anything.
    pub async fn tx_exists(
        &self,
        exec: impl PgExecutor<'_>,
        wallet_id: u64,
        idem_key: &str,
        tx_type: TxType,
    ) -> Result<Option<TxRecord>, StoreError> {
        if idem_key.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(
            "SELECT id, wallet_id, type, amount, balance_before, balance_after, \
                    related_wallet_id, idempotency_key, created_at \
             FROM transaction \
             WHERE wallet_id = $1 AND idempotency_key = $2 AND type = $3",
        )
        .bind(wallet_id as i64)
        .bind(idem_key)
        .bind(tx_type.as_str())
        .fetch_optional(exec)
        .await?;

        row.map(|r| tx_record_from_row(&r)).transpose()
    }

    pub async fn list_transactions(
        &self,
        wallet_id: u64,
        limit: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<TxRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, wallet_id, type, amount, balance_before, balance_after, \
                    related_wallet_id, idempotency_key, created_at \
             FROM transaction \
             WHERE wallet_id = $1 AND created_at >= $2 \
             ORDER BY created_at ASC, id ASC \
             LIMIT $3",
        )
        .bind(wallet_id as i64)
        .bind(since)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(tx_record_from_row).collect()
    }

    pub async fn create_outbox(
        &self,
        exec: impl PgExecutor<'_>,
        event: &NewOutboxEvent,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO event_outbox (aggregate, aggregate_id, event_type, payload) \
             VALUES ($1, $2, $3, $4::jsonb)",
        )
        .bind(AGGREGATE_WALLET)
        .bind(event.aggregate_id as i64)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .execute(exec)
        .await?;
        Ok(())
    }

    /// Unprocessed events in commit order. Runs outside any engine transaction.
    pub async fn poll_outbox(&self, limit: i64) -> Result<Vec<OutboxEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, aggregate, aggregate_id, event_type, payload::text AS payload, \
                    created_at, processed, processed_at \
             FROM event_outbox \
             WHERE processed = FALSE \
             ORDER BY created_at ASC, id ASC \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(outbox_from_row).collect())
    }

    /// Idempotent: re-marking an already processed event is a no-op.
    pub async fn mark_outbox_processed(&self, event_id: u64) -> Result<(), StoreError> {
        sqlx::query("UPDATE event_outbox SET processed = TRUE, processed_at = now() WHERE id = $1")
            .bind(event_id as i64)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Append one event to the bus, keyed by its outbox id.
    pub async fn publish_event(&self, event: &OutboxEvent) -> Result<(), BusError> {
        self.bus.publish(&event.id.to_string(), &event.payload).await
    }

    pub async fn cache_balance(
        &self,
        wallet_id: u64,
        balance: Decimal,
    ) -> Result<(), redis::RedisError> {
        self.cache.set_balance(wallet_id, balance).await
    }

    pub async fn get_cached_balance(
        &self,
        wallet_id: u64,
    ) -> Result<Option<Decimal>, redis::RedisError> {
        self.cache.get_balance(wallet_id).await
    }
}

fn wallet_from_row(row: &PgRow) -> Wallet {
    Wallet {
        id: row.get::<i64, _>("id") as u64,
        balance: row.get("balance"),
        version: row.get::<i64, _>("version") as u64,
        updated_at: row.get("updated_at"),
    }
}

fn tx_record_from_row(row: &PgRow) -> Result<TxRecord, StoreError> {
    let type_str: String = row.get("type");
    let tx_type = TxType::parse(&type_str).ok_or_else(|| {
        StoreError::Sqlx(sqlx::Error::Decode(
            format!("unknown transaction type: {}", type_str).into(),
        ))
    })?;

    Ok(TxRecord {
        id: row.get::<i64, _>("id") as u64,
        wallet_id: row.get::<i64, _>("wallet_id") as u64,
        tx_type,
        amount: row.get("amount"),
        balance_before: row.get("balance_before"),
        balance_after: row.get("balance_after"),
        related_wallet_id: row.get::<Option<i64>, _>("related_wallet_id").map(|id| id as u64),
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
    })
}

fn outbox_from_row(row: &PgRow) -> OutboxEvent {
    OutboxEvent {
        id: row.get::<i64, _>("id") as u64,
        aggregate: row.get("aggregate"),
        aggregate_id: row.get::<i64, _>("aggregate_id") as u64,
        event_type: row.get("event_type"),
        payload: row.get("payload"),
        created_at: row.get("created_at"),
        processed: row.get("processed"),
        processed_at: row.get("processed_at"),
    }
}
