//! wallet-service - Transactional wallet engine
//!
//! Per-wallet balances with strict correctness under concurrent access:
//! pessimistic row locks plus optimistic versioning, client-retry
//! deduplication via idempotency keys, and a transactional outbox drained by
//! a separate relay process.
//!
//! # Modules
//!
//! - [`config`] - YAML configuration with env overrides
//! - [`db`] - PostgreSQL pool and migrations
//! - [`models`] - Wallet, ledger and outbox types
//! - [`repository`] - Data access over store, cache and bus
//! - [`cache`] - Redis balance cache
//! - [`bus`] - Kafka event publisher
//! - [`service`] - Wallet business operations
//! - [`relay`] - Outbox relay loop
//! - [`gateway`] - HTTP transport

pub mod bus;
pub mod cache;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod relay;
pub mod repository;
pub mod service;

pub use bus::EventPublisher;
pub use cache::BalanceCache;
pub use config::AppConfig;
pub use db::Database;
pub use models::{OutboxEvent, TxRecord, TxType, Wallet};
pub use relay::OutboxRelay;
pub use repository::Repository;
pub use service::{WalletError, WalletService};
