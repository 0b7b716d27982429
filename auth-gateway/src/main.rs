// auth-gateway/src/main.rs
mod api;
mod chat;
mod error;
mod policy;
mod rate_limiter;
mod signature;
mod stake;

use actix_web::{web, App, HttpServer};
use chrono::Utc;
use common::{setup_tracing, Config};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{AppState, StakeCookieSettings};
use crate::chat::CompletionClient;
use crate::policy::AuthorizationPolicy;
use crate::signature::JsonRpcContractVerifier;
use crate::stake::StakeGate;

#[actix_web::main]
async fn main() -> io::Result<()> {
    setup_tracing();

    let config = Config::from_env().map_err(|e| {
        tracing::error!("Refusing to start: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    config.log_warnings();

    let stake = StakeGate::from_config(&config.stake).map_err(|e| {
        tracing::error!("Invalid stake configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let contract_wallets = JsonRpcContractVerifier::from_config(&config.chain).map_err(|e| {
        tracing::error!("Failed to set up contract-wallet verification: {}", e);
        io::Error::new(io::ErrorKind::Other, e.to_string())
    })?;
    let chat = CompletionClient::from_config(&config.upstream).map_err(|e| {
        tracing::error!("Failed to set up chat backend: {}", e);
        io::Error::new(io::ErrorKind::Other, e.to_string())
    })?;

    let policy = AuthorizationPolicy::new(&config, Arc::from(contract_wallets), Arc::new(stake));
    let state = web::Data::new(AppState {
        policy,
        chat,
        cookies: StakeCookieSettings::from_config(&config.session),
        trust_forwarded_headers: config.trust_forwarded_headers,
    });

    tracing::info!(
        "Rate limits: {} per {}s per wallet, {} per {}s per anonymous client, {} auth attempts per {}s per client",
        config.rate_limit.wallet_limit,
        config.rate_limit.wallet_window_secs,
        config.rate_limit.anonymous_limit,
        config.rate_limit.anonymous_window_secs,
        config.rate_limit.auth_limit,
        config.rate_limit.auth_window_secs
    );

    spawn_rate_limit_cleanup(
        state.clone(),
        Duration::from_secs(config.rate_limit.cleanup_interval_secs.max(1)),
    );

    let server_addr = config.server_addr.clone();
    tracing::info!("Starting auth gateway on {}", server_addr);

    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind(&server_addr)?
        .run()
        .await
}

/// Periodically drop expired rate-limit counters so idle keys don't accumulate
fn spawn_rate_limit_cleanup(state: web::Data<AppState>, every: Duration) {
    actix_web::rt::spawn(async move {
        let mut ticker = actix_web::rt::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = state.policy.purge_rate_limits(Utc::now());
            if removed > 0 {
                tracing::debug!(
                    "Purged {} expired rate-limit counters, {} still tracked",
                    removed,
                    state.policy.tracked_rate_limit_keys()
                );
            }
        }
    });
}
