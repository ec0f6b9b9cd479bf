use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Aggregate name recorded on every outbox row.
pub const AGGREGATE_WALLET: &str = "Wallet";

/// Authoritative balance record.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub id: u64,
    pub balance: Decimal,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Ledger entry type. Stored as text in the `transaction` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "DEPOSIT",
            TxType::Withdraw => "WITHDRAW",
            TxType::TransferOut => "TRANSFER_OUT",
            TxType::TransferIn => "TRANSFER_IN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TxType::Deposit),
            "WITHDRAW" => Some(TxType::Withdraw),
            "TRANSFER_OUT" => Some(TxType::TransferOut),
            "TRANSFER_IN" => Some(TxType::TransferIn),
            _ => None,
        }
    }
}

/// Committed ledger row. Append-only; never updated or deleted.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub id: u64,
    pub wallet_id: u64,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub related_wallet_id: Option<u64>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Ledger row to be inserted inside the current store transaction.
#[derive(Debug, Clone)]
pub struct NewTxRecord {
    pub wallet_id: u64,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub related_wallet_id: Option<u64>,
    pub idempotency_key: Option<String>,
}

/// Business event kind shipped through the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Deposit,
    Withdraw,
    Transfer,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Deposit => "Deposit",
            EventType::Withdraw => "Withdraw",
            EventType::Transfer => "Transfer",
        }
    }
}

/// Durable pending event, polled and published by the relay.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: u64,
    pub aggregate: String,
    pub aggregate_id: u64,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Outbox row inserted atomically with the business mutation.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: u64,
    pub event_type: EventType,
    pub payload: String,
}

/// Canonical base-10 form: trailing fractional zeros stripped, so a
/// NUMERIC(20,8) read of 100.00000000 renders as "100".
pub fn dec_str(d: Decimal) -> String {
    d.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tx_type_round_trip() {
        for t in [
            TxType::Deposit,
            TxType::Withdraw,
            TxType::TransferOut,
            TxType::TransferIn,
        ] {
            assert_eq!(TxType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TxType::parse("REFUND"), None);
    }

    #[test]
    fn test_dec_str_strips_trailing_zeros() {
        assert_eq!(dec_str(Decimal::from_str("100.00000000").unwrap()), "100");
        assert_eq!(dec_str(Decimal::from_str("1.50000000").unwrap()), "1.5");
        assert_eq!(dec_str(Decimal::from_str("0.00000001").unwrap()), "0.00000001");
        assert_eq!(dec_str(Decimal::ZERO), "0");
    }
}
