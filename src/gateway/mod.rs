//! HTTP transport: thin request validation mapped onto the wallet service.

pub mod handlers;
pub mod rate_limit;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::RateLimitConfig;
use crate::repository::Repository;
use crate::service::WalletService;
use rate_limit::IpRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WalletService>,
    pub repo: Arc<Repository>,
}

pub fn router(state: AppState, limiter: IpRateLimiter) -> Router {
    let v1 = Router::new()
        .route("/wallets/{id}/deposit", post(handlers::deposit))
        .route("/wallets/{id}/withdraw", post(handlers::withdraw))
        .route("/wallets/{id}/transfer", post(handlers::transfer))
        .route("/wallets/{id}/balance", get(handlers::balance))
        .route("/wallets/{id}/history", get(handlers::history));

    Router::new()
        .route("/healthz", get(handlers::health_check))
        .nest("/v1", v1)
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(
    port: u16,
    ratelimit: &RateLimitConfig,
    state: AppState,
) -> anyhow::Result<()> {
    let limiter = IpRateLimiter::new(ratelimit);
    let app = router(state, limiter);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("wallet server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
