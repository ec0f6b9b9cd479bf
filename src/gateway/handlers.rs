use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AppState;
use crate::models::{dec_str, TxRecord, TxType};
use crate::service::WalletError;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;
const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ErrorBody>);

fn bad_request(msg: impl Into<String>) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: msg.into() }),
    )
}

fn wallet_error(err: WalletError) -> HandlerError {
    let status = match err {
        WalletError::InvalidAmount
        | WalletError::SelfTransfer
        | WalletError::InsufficientFunds
        | WalletError::WalletNotFound => StatusCode::BAD_REQUEST,
        WalletError::OptimisticConflict => StatusCode::CONFLICT,
        WalletError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("wallet operation failed: {}", err);
    }
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

// --- Requests ---

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_id: Option<String>,
    pub amount: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub since: Option<String>,
}

// --- Responses ---

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: String,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub from_balance: String,
    pub to_balance: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub wallet_id: u64,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub amount: String,
    pub balance_before: String,
    pub balance_after: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_wallet_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<TxRecord> for HistoryEntry {
    fn from(tx: TxRecord) -> Self {
        Self {
            id: tx.id,
            wallet_id: tx.wallet_id,
            tx_type: tx.tx_type,
            amount: dec_str(tx.amount),
            balance_before: dec_str(tx.balance_before),
            balance_after: dec_str(tx.balance_after),
            related_wallet_id: tx.related_wallet_id,
            idempotency_key: tx.idempotency_key,
            created_at: tx.created_at,
        }
    }
}

fn parse_amount(raw: Option<&str>) -> Result<Decimal, HandlerError> {
    let raw = raw.ok_or_else(|| bad_request("amount is required"))?;
    Decimal::from_str(raw).map_err(|_| bad_request("invalid amount"))
}

fn parse_idem_key(raw: Option<String>) -> Result<String, HandlerError> {
    let key = raw.unwrap_or_default();
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(bad_request("idempotency key too long"));
    }
    Ok(key)
}

// --- Handlers ---

/// POST /v1/wallets/{id}/deposit
pub async fn deposit(
    State(state): State<AppState>,
    Path(wallet_id): Path<u64>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, HandlerError> {
    let amount = parse_amount(req.amount.as_deref())?;
    let idem_key = parse_idem_key(req.idempotency_key)?;

    let balance = state
        .service
        .deposit(wallet_id, amount, &idem_key)
        .await
        .map_err(wallet_error)?;

    Ok(Json(BalanceResponse {
        balance: dec_str(balance),
    }))
}

/// POST /v1/wallets/{id}/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    Path(wallet_id): Path<u64>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<BalanceResponse>, HandlerError> {
    let amount = parse_amount(req.amount.as_deref())?;
    let idem_key = parse_idem_key(req.idempotency_key)?;

    let balance = state
        .service
        .withdraw(wallet_id, amount, &idem_key)
        .await
        .map_err(wallet_error)?;

    Ok(Json(BalanceResponse {
        balance: dec_str(balance),
    }))
}

/// POST /v1/wallets/{id}/transfer
pub async fn transfer(
    State(state): State<AppState>,
    Path(from_id): Path<u64>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, HandlerError> {
    let to_id = req
        .to_id
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| bad_request("invalid to_id"))?;
    let amount = parse_amount(req.amount.as_deref())?;
    let idem_key = parse_idem_key(req.idempotency_key)?;

    let (from_balance, to_balance) = state
        .service
        .transfer(from_id, to_id, amount, &idem_key)
        .await
        .map_err(wallet_error)?;

    Ok(Json(TransferResponse {
        from_balance: dec_str(from_balance),
        to_balance: dec_str(to_balance),
    }))
}

/// GET /v1/wallets/{id}/balance
pub async fn balance(
    State(state): State<AppState>,
    Path(wallet_id): Path<u64>,
) -> Result<Json<BalanceResponse>, HandlerError> {
    let balance = state
        .service
        .get_balance(wallet_id)
        .await
        .map_err(wallet_error)?;

    Ok(Json(BalanceResponse {
        balance: dec_str(balance),
    }))
}

/// GET /v1/wallets/{id}/history?limit=&since=
pub async fn history(
    State(state): State<AppState>,
    Path(wallet_id): Path<u64>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, HandlerError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 1000);
    let since = match params.since.as_deref() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|_| bad_request("invalid since"))?
            .with_timezone(&Utc),
        None => Utc::now() - Duration::hours(24),
    };

    let records = state
        .service
        .get_history(wallet_id, limit, since)
        .await
        .map_err(wallet_error)?;

    Ok(Json(records.into_iter().map(HistoryEntry::from).collect()))
}

/// GET /healthz
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    state.repo.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: format!("store unreachable: {}", e),
            }),
        )
    })?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(Some("100")).unwrap(), Decimal::from(100));
        assert!(parse_amount(Some("abc")).is_err());
        assert!(parse_amount(None).is_err());
    }

    #[test]
    fn test_parse_idem_key_caps_length() {
        assert_eq!(parse_idem_key(None).unwrap(), "");
        assert_eq!(parse_idem_key(Some("k".to_string())).unwrap(), "k");
        assert!(parse_idem_key(Some("x".repeat(65))).is_err());
    }

    #[test]
    fn test_history_entry_serialization() {
        let entry = HistoryEntry {
            id: 7,
            wallet_id: 1,
            tx_type: TxType::TransferOut,
            amount: "30".to_string(),
            balance_before: "100".to_string(),
            balance_after: "70".to_string(),
            related_wallet_id: Some(2),
            idempotency_key: Some("tx1".to_string()),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "TRANSFER_OUT");
        assert_eq!(value["amount"], "30");
        assert_eq!(value["related_wallet_id"], 2);
    }
}
