//! Transactional wallet operations.
//!
//! Every mutating operation runs inside a single store transaction:
//! idempotency check, pessimistic row lock (ascending wallet-id order for
//! transfers), balance computation with exact decimal arithmetic, CAS wallet
//! update, ledger row(s) and exactly one outbox row. The balance cache is
//! refreshed best-effort after commit.

mod error;

pub use error::WalletError;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use std::sync::Arc;

use crate::models::{dec_str, EventType, NewOutboxEvent, NewTxRecord, TxRecord, TxType, Wallet};
use crate::repository::{Repository, StoreError};

pub struct WalletService {
    repo: Arc<Repository>,
}

impl WalletService {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Add money to a wallet, creating the wallet on first touch.
    /// Returns the freshly computed balance.
    pub async fn deposit(
        &self,
        wallet_id: u64,
        amount: Decimal,
        idem_key: &str,
    ) -> Result<Decimal, WalletError> {
        validate_amount(amount)?;
        match self.deposit_once(wallet_id, amount, idem_key).await {
            // Retry once on a version conflict; the second attempt re-reads
            // under the row lock.
            Err(WalletError::OptimisticConflict) => {
                self.deposit_once(wallet_id, amount, idem_key).await
            }
            other => other,
        }
    }

    async fn deposit_once(
        &self,
        wallet_id: u64,
        amount: Decimal,
        idem_key: &str,
    ) -> Result<Decimal, WalletError> {
        let mut tx = self.repo.begin().await?;

        // 1. Idempotency: a replayed request returns the recorded result.
        if let Some(prior) = self
            .repo
            .tx_exists(&mut *tx, wallet_id, idem_key, TxType::Deposit)
            .await?
        {
            tx.commit().await.map_err(WalletError::Store)?;
            return Ok(prior.balance_after);
        }

        // 2. Lock (auto-provisioning on first deposit).
        let wallet = self.lock_or_create(&mut tx, wallet_id).await?;

        // 3. Compute and persist.
        let new_balance = wallet.balance + amount;
        self.repo
            .update_wallet(&mut *tx, wallet_id, new_balance, wallet.version)
            .await?;

        let ledger = NewTxRecord {
            wallet_id,
            tx_type: TxType::Deposit,
            amount,
            balance_before: wallet.balance,
            balance_after: new_balance,
            related_wallet_id: None,
            idempotency_key: non_empty(idem_key),
        };
        if let Err(e) = self.repo.create_transaction(&mut *tx, &ledger).await {
            return match e {
                // A concurrent identical request won the insert; hand back
                // its committed result.
                StoreError::DuplicateIdempotency => {
                    let _ = tx.rollback().await;
                    self.replay_committed(wallet_id, idem_key, TxType::Deposit).await
                }
                other => Err(other.into()),
            };
        }

        self.repo
            .create_outbox(
                &mut *tx,
                &NewOutboxEvent {
                    aggregate_id: wallet_id,
                    event_type: EventType::Deposit,
                    payload: balance_change_payload(wallet_id, amount, new_balance),
                },
            )
            .await?;

        tx.commit().await.map_err(WalletError::Store)?;

        self.refresh_cache(wallet_id, new_balance).await;
        Ok(new_balance)
    }

    /// Subtract money from a wallet. A missing wallet cannot cover any
    /// amount, so it maps to `InsufficientFunds`.
    pub async fn withdraw(
        &self,
        wallet_id: u64,
        amount: Decimal,
        idem_key: &str,
    ) -> Result<Decimal, WalletError> {
        validate_amount(amount)?;
        match self.withdraw_once(wallet_id, amount, idem_key).await {
            Err(WalletError::OptimisticConflict) => {
                self.withdraw_once(wallet_id, amount, idem_key).await
            }
            other => other,
        }
    }

    async fn withdraw_once(
        &self,
        wallet_id: u64,
        amount: Decimal,
        idem_key: &str,
    ) -> Result<Decimal, WalletError> {
        let mut tx = self.repo.begin().await?;

        if let Some(prior) = self
            .repo
            .tx_exists(&mut *tx, wallet_id, idem_key, TxType::Withdraw)
            .await?
        {
            tx.commit().await.map_err(WalletError::Store)?;
            return Ok(prior.balance_after);
        }

        let wallet = match self.repo.get_wallet_for_update(&mut *tx, wallet_id).await? {
            Some(w) => w,
            None => return Err(WalletError::InsufficientFunds),
        };
        if wallet.balance < amount {
            return Err(WalletError::InsufficientFunds);
        }

        let new_balance = wallet.balance - amount;
        self.repo
            .update_wallet(&mut *tx, wallet_id, new_balance, wallet.version)
            .await?;

        let ledger = NewTxRecord {
            wallet_id,
            tx_type: TxType::Withdraw,
            amount,
            balance_before: wallet.balance,
            balance_after: new_balance,
            related_wallet_id: None,
            idempotency_key: non_empty(idem_key),
        };
        if let Err(e) = self.repo.create_transaction(&mut *tx, &ledger).await {
            return match e {
                StoreError::DuplicateIdempotency => {
                    let _ = tx.rollback().await;
                    self.replay_committed(wallet_id, idem_key, TxType::Withdraw).await
                }
                other => Err(other.into()),
            };
        }

        self.repo
            .create_outbox(
                &mut *tx,
                &NewOutboxEvent {
                    aggregate_id: wallet_id,
                    event_type: EventType::Withdraw,
                    payload: balance_change_payload(wallet_id, amount, new_balance),
                },
            )
            .await?;

        tx.commit().await.map_err(WalletError::Store)?;

        self.refresh_cache(wallet_id, new_balance).await;
        Ok(new_balance)
    }

    /// Move money between two wallets in one store transaction. Both ledger
    /// legs share the idempotency key; a single outbox row is keyed by the
    /// source wallet. Returns (source balance, destination balance).
    pub async fn transfer(
        &self,
        from_id: u64,
        to_id: u64,
        amount: Decimal,
        idem_key: &str,
    ) -> Result<(Decimal, Decimal), WalletError> {
        validate_amount(amount)?;
        if from_id == to_id {
            return Err(WalletError::SelfTransfer);
        }
        match self.transfer_once(from_id, to_id, amount, idem_key).await {
            Err(WalletError::OptimisticConflict) => {
                self.transfer_once(from_id, to_id, amount, idem_key).await
            }
            other => other,
        }
    }

    async fn transfer_once(
        &self,
        from_id: u64,
        to_id: u64,
        amount: Decimal,
        idem_key: &str,
    ) -> Result<(Decimal, Decimal), WalletError> {
        let mut tx = self.repo.begin().await?;

        if let Some(out_row) = self
            .repo
            .tx_exists(&mut *tx, from_id, idem_key, TxType::TransferOut)
            .await?
        {
            let to_balance = self
                .repo
                .tx_exists(&mut *tx, to_id, idem_key, TxType::TransferIn)
                .await?
                .map(|r| r.balance_after)
                .unwrap_or(Decimal::ZERO);
            tx.commit().await.map_err(WalletError::Store)?;
            return Ok((out_row.balance_after, to_balance));
        }

        // Ascending-id lock order is the deadlock discipline for
        // multi-wallet operations.
        let (first_id, second_id) = lock_order(from_id, to_id);
        let first = self.lock_or_create(&mut tx, first_id).await?;
        let second = self.lock_or_create(&mut tx, second_id).await?;
        let (from, to) = if first_id == from_id {
            (first, second)
        } else {
            (second, first)
        };

        if from.balance < amount {
            return Err(WalletError::InsufficientFunds);
        }

        let new_from = from.balance - amount;
        let new_to = to.balance + amount;
        self.repo
            .update_wallet(&mut *tx, from_id, new_from, from.version)
            .await?;
        self.repo
            .update_wallet(&mut *tx, to_id, new_to, to.version)
            .await?;

        let out_leg = NewTxRecord {
            wallet_id: from_id,
            tx_type: TxType::TransferOut,
            amount,
            balance_before: from.balance,
            balance_after: new_from,
            related_wallet_id: Some(to_id),
            idempotency_key: non_empty(idem_key),
        };
        let in_leg = NewTxRecord {
            wallet_id: to_id,
            tx_type: TxType::TransferIn,
            amount,
            balance_before: to.balance,
            balance_after: new_to,
            related_wallet_id: Some(from_id),
            idempotency_key: non_empty(idem_key),
        };
        if let Err(e) = self.repo.create_transaction(&mut *tx, &out_leg).await {
            return match e {
                StoreError::DuplicateIdempotency => {
                    let _ = tx.rollback().await;
                    self.replay_transfer(from_id, to_id, idem_key).await
                }
                other => Err(other.into()),
            };
        }
        self.repo.create_transaction(&mut *tx, &in_leg).await?;

        self.repo
            .create_outbox(
                &mut *tx,
                &NewOutboxEvent {
                    aggregate_id: from_id,
                    event_type: EventType::Transfer,
                    payload: transfer_payload(from_id, to_id, amount),
                },
            )
            .await?;

        tx.commit().await.map_err(WalletError::Store)?;

        self.refresh_cache(from_id, new_from).await;
        self.refresh_cache(to_id, new_to).await;
        Ok((new_from, new_to))
    }

    /// Read-through balance lookup: cache first, store on miss, cache
    /// refreshed best-effort.
    pub async fn get_balance(&self, wallet_id: u64) -> Result<Decimal, WalletError> {
        match self.repo.get_cached_balance(wallet_id).await {
            Ok(Some(balance)) => return Ok(balance),
            Ok(None) => {}
            Err(e) => tracing::warn!(wallet_id, "balance cache read failed: {}", e),
        }

        let wallet = self
            .repo
            .get_wallet(wallet_id)
            .await?
            .ok_or(WalletError::WalletNotFound)?;

        self.refresh_cache(wallet_id, wallet.balance).await;
        Ok(wallet.balance)
    }

    /// Ledger rows for a wallet since the given instant, oldest first.
    pub async fn get_history(
        &self,
        wallet_id: u64,
        limit: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<TxRecord>, WalletError> {
        if self.repo.get_wallet(wallet_id).await?.is_none() {
            return Err(WalletError::WalletNotFound);
        }
        Ok(self.repo.list_transactions(wallet_id, limit, since).await?)
    }

    /// Lock a wallet row, inserting it at zero balance if absent. A freshly
    /// inserted row is exclusively held by this transaction, which serves as
    /// the lock.
    async fn lock_or_create(
        &self,
        conn: &mut PgConnection,
        wallet_id: u64,
    ) -> Result<Wallet, WalletError> {
        if let Some(wallet) = self.repo.get_wallet_for_update(&mut *conn, wallet_id).await? {
            return Ok(wallet);
        }
        let wallet = Wallet {
            id: wallet_id,
            balance: Decimal::ZERO,
            version: 0,
            updated_at: Utc::now(),
        };
        match self.repo.create_wallet(&mut *conn, &wallet).await {
            Ok(()) => Ok(wallet),
            // Lost a create race; the retry locks the committed row.
            Err(StoreError::Conflict) => Err(WalletError::OptimisticConflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn replay_committed(
        &self,
        wallet_id: u64,
        idem_key: &str,
        tx_type: TxType,
    ) -> Result<Decimal, WalletError> {
        match self
            .repo
            .tx_exists(self.repo.pool(), wallet_id, idem_key, tx_type)
            .await?
        {
            Some(row) => Ok(row.balance_after),
            None => Err(WalletError::OptimisticConflict),
        }
    }

    async fn replay_transfer(
        &self,
        from_id: u64,
        to_id: u64,
        idem_key: &str,
    ) -> Result<(Decimal, Decimal), WalletError> {
        let out_row = self
            .repo
            .tx_exists(self.repo.pool(), from_id, idem_key, TxType::TransferOut)
            .await?;
        match out_row {
            Some(out) => {
                let to_balance = self
                    .repo
                    .tx_exists(self.repo.pool(), to_id, idem_key, TxType::TransferIn)
                    .await?
                    .map(|r| r.balance_after)
                    .unwrap_or(Decimal::ZERO);
                Ok((out.balance_after, to_balance))
            }
            None => Err(WalletError::OptimisticConflict),
        }
    }

    async fn refresh_cache(&self, wallet_id: u64, balance: Decimal) {
        if let Err(e) = self.repo.cache_balance(wallet_id, balance).await {
            tracing::warn!(wallet_id, "balance cache refresh failed: {}", e);
        }
    }
}

fn validate_amount(amount: Decimal) -> Result<(), WalletError> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount);
    }
    Ok(())
}

fn non_empty(idem_key: &str) -> Option<String> {
    if idem_key.is_empty() {
        None
    } else {
        Some(idem_key.to_string())
    }
}

fn lock_order(a: u64, b: u64) -> (u64, u64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn balance_change_payload(wallet_id: u64, amount: Decimal, balance: Decimal) -> String {
    serde_json::json!({
        "wallet_id": wallet_id,
        "amount": dec_str(amount),
        "balance": dec_str(balance),
    })
    .to_string()
}

fn transfer_payload(from_id: u64, to_id: u64, amount: Decimal) -> String {
    serde_json::json!({
        "from": from_id,
        "to": to_id,
        "amount": dec_str(amount),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(Decimal::from(1)).is_ok());
        assert!(validate_amount(Decimal::from_str("0.00000001").unwrap()).is_ok());
        assert!(matches!(
            validate_amount(Decimal::ZERO),
            Err(WalletError::InvalidAmount)
        ));
        assert!(matches!(
            validate_amount(Decimal::from(-5)),
            Err(WalletError::InvalidAmount)
        ));
    }

    #[test]
    fn test_lock_order_ascending() {
        assert_eq!(lock_order(1, 2), (1, 2));
        assert_eq!(lock_order(2, 1), (1, 2));
        assert_eq!(lock_order(7, 7), (7, 7));
    }

    #[test]
    fn test_non_empty_key() {
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty("k1"), Some("k1".to_string()));
    }

    #[test]
    fn test_balance_change_payload_shape() {
        let payload = balance_change_payload(1, Decimal::from(100), Decimal::from(100));
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"wallet_id": 1, "amount": "100", "balance": "100"})
        );
    }

    #[test]
    fn test_transfer_payload_has_no_balance() {
        let payload = transfer_payload(1, 2, Decimal::from_str("30.00000000").unwrap());
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value, serde_json::json!({"from": 1, "to": 2, "amount": "30"}));
        assert!(value.get("balance").is_none());
    }
}
