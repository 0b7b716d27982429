// auth-gateway/src/policy.rs
//! Request authorization: one decision per request, combining identity, stake and rate limits.
//!
//! ```text
//! token present      -> valid: AUTHENTICATED   invalid: REJECT(INVALID_SESSION)
//! wallet+sig+message -> recovered & matches claim: AUTHENTICATED
//!                       otherwise EIP-1271 on the claimed address, else REJECT(INVALID_SIGNATURE)
//! nothing            -> ANONYMOUS
//! AUTHENTICATED      -> stake (cookie hint, revalidated) -> STAKED | UNSTAKED
//! ANONYMOUS          -> per-network-address limit
//! UNSTAKED           -> per-wallet limit
//! STAKED             -> allowed, no limit, elevated features unlocked
//! ```

use chrono::{DateTime, Duration, Utc};
use common::models::WalletAddress;
use common::{redact, Config, MismatchPolicy, TokenError, TokenManager, WalletCredentials};
use std::sync::Arc;

use crate::error::{AuthError, RateLimitScope};
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::signature::recovery::is_recognised_encoding;
use crate::signature::{recover, ContractWalletVerifier, RecoveryOutcome, RecoveryStage};
use crate::stake::{StakeStatus, StakeVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    SessionToken,
    Signature(RecoveryStage),
    ContractWallet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Authenticated {
        address: WalletAddress,
        method: AuthMethod,
    },
    Anonymous,
}

/// What the response should do with the client's stake cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieDirective {
    Keep,
    Set(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeDecision {
    pub status: StakeStatus,
    pub cookie: CookieDirective,
}

/// Everything the policy reads from one request
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub credentials: &'a WalletCredentials,
    pub stake_cookie: Option<&'a str>,
    /// Client network address, used for anonymous rate limiting
    pub client_addr: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub identity: Identity,
    pub stake: StakeStatus,
    pub cookie: CookieDirective,
    /// Fresh session token, issued when the request authenticated by signature
    pub session_token: Option<String>,
}

impl Authorization {
    pub fn address(&self) -> Option<WalletAddress> {
        match self.identity {
            Identity::Authenticated { address, .. } => Some(address),
            Identity::Anonymous => None,
        }
    }

    /// Gate for features reserved to staked wallets
    pub fn require_elevated(&self) -> Result<(), AuthError> {
        match self.stake {
            StakeStatus::Staked => Ok(()),
            StakeStatus::Unavailable => Err(AuthError::StakeCheckUnavailable),
            StakeStatus::NotStaked => Err(AuthError::StakeRequired),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub error: AuthError,
    pub cookie: CookieDirective,
}

impl From<AuthError> for Rejection {
    fn from(error: AuthError) -> Self {
        Self {
            error,
            cookie: CookieDirective::Keep,
        }
    }
}

pub struct AuthorizationPolicy {
    tokens: TokenManager,
    contract_wallets: Arc<dyn ContractWalletVerifier>,
    stake: Arc<dyn StakeVerifier>,
    wallet_limiter: RateLimiter,
    anonymous_limiter: RateLimiter,
    auth_limiter: RateLimiter,
    mismatch_policy: MismatchPolicy,
    stake_revalidate_after: Duration,
}

impl AuthorizationPolicy {
    pub fn new(
        config: &Config,
        contract_wallets: Arc<dyn ContractWalletVerifier>,
        stake: Arc<dyn StakeVerifier>,
    ) -> Self {
        let tokens = TokenManager::new(
            config.session.secret.as_bytes(),
            Duration::seconds(config.session.token_ttl_secs),
            Duration::seconds(config.session.stake_cookie_ttl_secs),
        );
        let limits = &config.rate_limit;

        Self {
            tokens,
            contract_wallets,
            stake,
            wallet_limiter: RateLimiter::new(
                limits.wallet_limit,
                Duration::seconds(limits.wallet_window_secs),
            ),
            anonymous_limiter: RateLimiter::new(
                limits.anonymous_limit,
                Duration::seconds(limits.anonymous_window_secs),
            ),
            auth_limiter: RateLimiter::new(
                limits.auth_limit,
                Duration::seconds(limits.auth_window_secs),
            ),
            mismatch_policy: config.signature.mismatch_policy,
            stake_revalidate_after: Duration::seconds(config.session.stake_revalidate_after_secs),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Count one `POST /auth` attempt from `client_addr`; separate from chat quota
    pub fn check_auth_attempt(&self, client_addr: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        match self.auth_limiter.check(&format!("auth_{}", client_addr), now) {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Denied { retry_after } => Err(AuthError::RateLimitExceeded {
                scope: RateLimitScope::Authentication,
                retry_after_secs: retry_after.num_seconds(),
            }),
        }
    }

    /// Establish who is making the request
    pub async fn authenticate(&self, credentials: &WalletCredentials) -> Result<Identity, AuthError> {
        if let Some(token) = non_blank(&credentials.token) {
            return match self.tokens.verify_session(token) {
                Ok(session) => Ok(Identity::Authenticated {
                    address: session.address,
                    method: AuthMethod::SessionToken,
                }),
                Err(TokenError::Expired) => {
                    tracing::warn!("Rejected expired session token");
                    Err(AuthError::SessionExpiredOrForged)
                }
                Err(e) => {
                    tracing::warn!("Rejected session token {}: {}", redact(token), e);
                    Err(AuthError::SessionExpiredOrForged)
                }
            };
        }

        match (
            non_blank(&credentials.wallet_address),
            non_blank(&credentials.signature),
            non_blank(&credentials.message),
        ) {
            (Some(claimed), Some(signature), Some(message)) => {
                self.authenticate_signature(claimed, message, signature).await
            }
            (None, None, None) => Ok(Identity::Anonymous),
            _ => {
                tracing::warn!("Incomplete wallet credentials supplied");
                Err(AuthError::InvalidCredentialFormat)
            }
        }
    }

    async fn authenticate_signature(
        &self,
        claimed: &str,
        message: &str,
        signature: &str,
    ) -> Result<Identity, AuthError> {
        let claimed_address = claimed.parse::<WalletAddress>().ok();

        match recover(claimed, message, signature) {
            RecoveryOutcome::Recovered(signer) if signer.matches_claim => {
                return Ok(Identity::Authenticated {
                    address: signer.address,
                    method: AuthMethod::Signature(signer.stage),
                });
            }
            RecoveryOutcome::Recovered(signer) if self.mismatch_policy == MismatchPolicy::Permissive => {
                tracing::warn!(
                    "Permissive mismatch policy: authenticating recovered address {} instead of claimed {} (reduced security)",
                    signer.address,
                    claimed
                );
                return Ok(Identity::Authenticated {
                    address: signer.address,
                    method: AuthMethod::Signature(signer.stage),
                });
            }
            // a contract wallet's owner signature recovers to the owner, so fall through
            RecoveryOutcome::Recovered(_) | RecoveryOutcome::NotRecovered => {}
        }

        let Some(claimed_address) = claimed_address else {
            tracing::warn!("Claimed wallet address is malformed");
            return Err(AuthError::InvalidCredentialFormat);
        };

        if self
            .contract_wallets
            .verify_contract_wallet(&claimed_address, message, signature)
            .await
        {
            return Ok(Identity::Authenticated {
                address: claimed_address,
                method: AuthMethod::ContractWallet,
            });
        }

        tracing::warn!("Signature invalid for {}", claimed_address);
        if is_recognised_encoding(signature) {
            Err(AuthError::SignatureMismatch)
        } else {
            Err(AuthError::InvalidCredentialFormat)
        }
    }

    /// Decide stake status for an authenticated address, using the cookie only as a hint
    pub async fn resolve_stake(
        &self,
        address: &WalletAddress,
        stake_cookie: Option<&str>,
        now: DateTime<Utc>,
    ) -> StakeDecision {
        let had_cookie = match stake_cookie.map(|raw| self.tokens.verify_stake_cookie(raw)) {
            Some(Ok(cookie)) if cookie.address == *address => {
                let reuse_window = self.stake_revalidate_after;
                if reuse_window > Duration::zero()
                    && cookie.age_seconds(now) < reuse_window.num_seconds()
                {
                    tracing::debug!("Stake cookie for {} inside reuse window", address);
                    return StakeDecision {
                        status: StakeStatus::Staked,
                        cookie: CookieDirective::Keep,
                    };
                }

                let status = self.stake.stake_status(address).await;
                if status.is_staked() {
                    return StakeDecision {
                        status,
                        cookie: CookieDirective::Keep,
                    };
                }

                tracing::warn!(
                    "Stake cookie for {} no longer backed by live stake ({:?}); clearing",
                    address,
                    status
                );
                return StakeDecision {
                    status,
                    cookie: CookieDirective::Clear,
                };
            }
            Some(Ok(cookie)) => {
                tracing::warn!(
                    "Stake cookie issued to {} presented by {}; treating as forged",
                    cookie.address,
                    address
                );
                true
            }
            Some(Err(e)) => {
                tracing::warn!("Discarding stake cookie for {}: {}", address, e);
                true
            }
            None => false,
        };

        let status = self.stake.stake_status(address).await;
        let cookie = if status.is_staked() {
            match self.tokens.issue_stake_cookie_at(address, now) {
                Ok(value) => CookieDirective::Set(value),
                Err(e) => {
                    tracing::error!("Failed to sign stake cookie: {}", e);
                    if had_cookie {
                        CookieDirective::Clear
                    } else {
                        CookieDirective::Keep
                    }
                }
            }
        } else if had_cookie {
            CookieDirective::Clear
        } else {
            CookieDirective::Keep
        };

        StakeDecision { status, cookie }
    }

    /// Run the full per-request state machine
    pub async fn authorize(
        &self,
        request: RequestContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<Authorization, Rejection> {
        let identity = match self.authenticate(request.credentials).await {
            Ok(identity) => identity,
            Err(error) => {
                // a stake cookie riding along with a dead session goes with it
                let cookie = if error == AuthError::SessionExpiredOrForged && request.stake_cookie.is_some() {
                    CookieDirective::Clear
                } else {
                    CookieDirective::Keep
                };
                return Err(Rejection { error, cookie });
            }
        };

        let (address, method) = match identity {
            Identity::Anonymous => {
                let key = format!("ip_{}", request.client_addr);
                if let RateDecision::Denied { retry_after } = self.anonymous_limiter.check(&key, now) {
                    return Err(AuthError::RateLimitExceeded {
                        scope: RateLimitScope::Anonymous,
                        retry_after_secs: retry_after.num_seconds(),
                    }
                    .into());
                }
                return Ok(Authorization {
                    identity,
                    stake: StakeStatus::NotStaked,
                    cookie: CookieDirective::Keep,
                    session_token: None,
                });
            }
            Identity::Authenticated { address, method } => (address, method),
        };

        let stake = self.resolve_stake(&address, request.stake_cookie, now).await;

        if !stake.status.is_staked() {
            if let RateDecision::Denied { retry_after } =
                self.wallet_limiter.check(&address.to_hex(), now)
            {
                return Err(Rejection {
                    error: AuthError::RateLimitExceeded {
                        scope: RateLimitScope::Wallet,
                        retry_after_secs: retry_after.num_seconds(),
                    },
                    cookie: stake.cookie,
                });
            }
        }

        let session_token = match method {
            AuthMethod::SessionToken => None,
            AuthMethod::Signature(_) | AuthMethod::ContractWallet => {
                match self.tokens.issue_session_at(&address, now) {
                    Ok(token) => Some(token),
                    Err(e) => {
                        tracing::error!("Failed to sign session token: {}", e);
                        return Err(Rejection {
                            error: AuthError::InternalFault,
                            cookie: stake.cookie,
                        });
                    }
                }
            }
        };

        Ok(Authorization {
            identity,
            stake: stake.status,
            cookie: stake.cookie,
            session_token,
        })
    }

    /// Housekeeping for both limiters
    pub fn purge_rate_limits(&self, now: DateTime<Utc>) -> usize {
        self.wallet_limiter.purge_expired(now)
            + self.anonymous_limiter.purge_expired(now)
            + self.auth_limiter.purge_expired(now)
    }

    pub fn tracked_rate_limit_keys(&self) -> usize {
        self.wallet_limiter.tracked_keys()
            + self.anonymous_limiter.tracked_keys()
            + self.auth_limiter.tracked_keys()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
