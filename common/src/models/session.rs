// common/src/models/session.rs
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::WalletAddress;

/// Audience claim carried by session tokens.
pub const SESSION_AUDIENCE: &str = "wallet-session";
/// Audience claim carried by stake-status cookies.
pub const STAKE_AUDIENCE: &str = "stake-status";

/// JWT body of a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,       // wallet address
    pub aud: String,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// JWT body of a stake-status cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeClaims {
    pub wallet: String,
    pub staked: bool,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// A verified session token: proof that `address` authenticated within the token lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub address: WalletAddress,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A verified stake-status cookie.
///
/// Only ever records a positive decision. It is a hint that the live stake check
/// will probably pass, never a standing grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeCookie {
    pub address: WalletAddress,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StakeCookie {
    /// Age of the cookie at `now`, in seconds (never negative).
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.issued_at).num_seconds().max(0)
    }
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
