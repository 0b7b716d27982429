// auth-gateway/src/stake/mod.rs
//! Stake lookups used to gate access.
//!
//! A [`StakeProvider`] reports how many tokens an address has staked; [`StakeGate`]
//! turns that into a decision against the configured minimum and the allow-list.
//! Every failure is reported as [`StakeStatus::Unavailable`] and never grants access.

pub mod dune;
pub mod indexer;

use async_trait::async_trait;
use common::models::WalletAddress;
use common::{StakeConfig, StakeProviderKind};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

pub use dune::DuneProvider;
pub use indexer::IndexerProvider;

#[derive(Debug, Error)]
pub enum StakeError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("stake API returned {0}")]
    Api(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for StakeError {
    fn from(e: reqwest::Error) -> Self {
        StakeError::Http(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeStatus {
    Staked,
    NotStaked,
    /// The provider could not answer; treated as not staked
    Unavailable,
}

impl StakeStatus {
    pub fn is_staked(self) -> bool {
        self == StakeStatus::Staked
    }
}

#[async_trait]
pub trait StakeVerifier: Send + Sync {
    async fn stake_status(&self, address: &WalletAddress) -> StakeStatus;

    async fn is_staked(&self, address: &WalletAddress) -> bool {
        self.stake_status(address).await.is_staked()
    }
}

/// Source of staked-token balances
#[async_trait]
pub trait StakeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Staked amount in whole tokens (already scaled by the token's decimals)
    async fn staked_tokens(&self, address: &WalletAddress) -> Result<f64, StakeError>;
}

pub struct StakeGate {
    provider: Box<dyn StakeProvider>,
    min_stake: f64,
    allow_list: HashSet<WalletAddress>,
}

impl StakeGate {
    pub fn new(
        provider: Box<dyn StakeProvider>,
        min_stake: f64,
        allow_list: HashSet<WalletAddress>,
    ) -> Self {
        Self {
            provider,
            min_stake,
            allow_list,
        }
    }

    pub fn from_config(config: &StakeConfig) -> Result<Self, StakeError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let provider: Box<dyn StakeProvider> = match config.provider {
            StakeProviderKind::Dune => Box::new(DuneProvider::new(
                config.api_url.clone(),
                config.api_key.clone(),
                config.query_id,
                config.subnet_id.clone(),
                timeout,
            )?),
            StakeProviderKind::Indexer => Box::new(IndexerProvider::new(
                config.api_url.clone(),
                config.api_key.clone(),
                config.subnet_id.clone(),
                config.amount_pointer.clone(),
                config.decimals,
                timeout,
            )?),
        };

        let allow_list = parse_allow_list(&config.allow_list)?;
        tracing::info!(
            "Stake gate using {} provider, minimum {} tokens, {} allow-listed address(es)",
            provider.name(),
            config.min_stake,
            allow_list.len()
        );

        Ok(Self::new(provider, config.min_stake, allow_list))
    }
}

#[async_trait]
impl StakeVerifier for StakeGate {
    async fn stake_status(&self, address: &WalletAddress) -> StakeStatus {
        if self.allow_list.contains(address) {
            tracing::info!("{} is on the stake allow-list; live stake check bypassed", address);
            return StakeStatus::Staked;
        }

        match self.provider.staked_tokens(address).await {
            Ok(amount) if amount.is_finite() && amount >= self.min_stake => {
                tracing::debug!("{} has {} tokens staked", address, amount);
                StakeStatus::Staked
            }
            Ok(amount) => {
                tracing::info!(
                    "{} has {} tokens staked, below the minimum of {}",
                    address,
                    amount,
                    self.min_stake
                );
                StakeStatus::NotStaked
            }
            Err(e) => {
                tracing::error!(
                    "Staking verification for {} via {} failed: {}",
                    address,
                    self.provider.name(),
                    e
                );
                StakeStatus::Unavailable
            }
        }
    }
}

fn parse_allow_list(entries: &[String]) -> Result<HashSet<WalletAddress>, StakeError> {
    entries
        .iter()
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            entry
                .parse::<WalletAddress>()
                .map_err(|e| StakeError::Config(format!("allow-list entry {:?}: {}", entry, e)))
        })
        .collect()
}

/// Convert an integer amount in base units to whole tokens.
///
/// Splits into whole and fractional parts before going to floating point so large
/// balances keep their integer precision.
pub fn scale_base_units(raw: &str, decimals: u32) -> Option<f64> {
    let units: u128 = raw.trim().parse().ok()?;
    let scale = 10u128.checked_pow(decimals)?;

    let whole = units / scale;
    let fraction = units % scale;
    Some(whole as f64 + fraction as f64 / scale as f64)
}
