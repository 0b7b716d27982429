// common/src/tokens.rs
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use crate::models::session::{
    from_unix, SessionClaims, SessionToken, StakeClaims, StakeCookie, SESSION_AUDIENCE,
    STAKE_AUDIENCE,
};
use crate::models::WalletAddress;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("credential expired")]
    Expired,
    #[error("credential signature or contents invalid")]
    Invalid,
    #[error("failed to sign credential: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Issues and verifies the two signed credential kinds: session tokens and stake cookies.
///
/// Both are HS256 JWTs under the same server secret, separated by audience so one can
/// never be replayed as the other. There is no revocation list; a credential stays
/// valid until `exp`.
#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    stake_ttl: Duration,
}

impl TokenManager {
    pub fn new(secret: &[u8], session_ttl: Duration, stake_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_ttl,
            stake_ttl,
        }
    }

    pub fn issue_session(&self, address: &WalletAddress) -> Result<String, TokenError> {
        self.issue_session_at(address, Utc::now())
    }

    pub fn issue_session_at(
        &self,
        address: &WalletAddress,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let claims = SessionClaims {
            sub: address.to_hex(),
            aud: SESSION_AUDIENCE.to_string(),
            jti: Uuid::new_v4(),
            iat,
            exp: iat + self.session_ttl.num_seconds(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionToken, TokenError> {
        let claims: SessionClaims = self.decode_claims(token, SESSION_AUDIENCE)?;
        let address = claims.sub.parse().map_err(|_| TokenError::Invalid)?;

        Ok(SessionToken {
            address,
            issued_at: from_unix(claims.iat),
            expires_at: from_unix(claims.exp),
        })
    }

    pub fn issue_stake_cookie(&self, address: &WalletAddress) -> Result<String, TokenError> {
        self.issue_stake_cookie_at(address, Utc::now())
    }

    pub fn issue_stake_cookie_at(
        &self,
        address: &WalletAddress,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let claims = StakeClaims {
            wallet: address.to_hex(),
            staked: true,
            aud: STAKE_AUDIENCE.to_string(),
            iat,
            exp: iat + self.stake_ttl.num_seconds(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_stake_cookie(&self, cookie: &str) -> Result<StakeCookie, TokenError> {
        let claims: StakeClaims = self.decode_claims(cookie, STAKE_AUDIENCE)?;

        // a cookie only ever caches a positive decision
        if !claims.staked {
            return Err(TokenError::Invalid);
        }
        let address = claims.wallet.parse().map_err(|_| TokenError::Invalid)?;

        Ok(StakeCookie {
            address,
            issued_at: from_unix(claims.iat),
            expires_at: from_unix(claims.exp),
        })
    }

    fn decode_claims<T: DeserializeOwned>(&self, raw: &str, audience: &str) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(&[audience]);

        decode::<T>(raw.trim(), &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new(b"test-secret", Duration::days(30), Duration::days(30))
    }

    fn address() -> WalletAddress {
        "0x71c7656ec7ab88b098defb751b7401b5f6d8976f".parse().unwrap()
    }

    #[test]
    fn test_session_token_roundtrip() {
        let tokens = manager();
        let token = tokens.issue_session(&address()).unwrap();
        let session = tokens.verify_session(&token).unwrap();
        assert_eq!(session.address, address());
        assert_eq!(
            (session.expires_at - session.issued_at).num_days(),
            30
        );
    }

    #[test]
    fn test_expired_session_rejected() {
        let tokens = manager();
        let issued = Utc::now() - Duration::days(31);
        let token = tokens.issue_session_at(&address(), issued).unwrap();
        assert!(matches!(tokens.verify_session(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = manager().issue_session(&address()).unwrap();
        let other = TokenManager::new(b"other-secret", Duration::days(30), Duration::days(30));
        assert!(matches!(other.verify_session(&token), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let tokens = manager();
        let mut token = tokens.issue_session(&address()).unwrap();
        token.push('x');
        assert!(matches!(tokens.verify_session(&token), Err(TokenError::Invalid)));
        assert!(matches!(tokens.verify_session("not-a-jwt"), Err(TokenError::Invalid)));
    }

    #[test]
    fn test_credential_kinds_are_not_interchangeable() {
        let tokens = manager();
        let session = tokens.issue_session(&address()).unwrap();
        let cookie = tokens.issue_stake_cookie(&address()).unwrap();

        assert!(tokens.verify_stake_cookie(&session).is_err());
        assert!(tokens.verify_session(&cookie).is_err());
    }

    #[test]
    fn test_stake_cookie_roundtrip_and_age() {
        let tokens = manager();
        let issued = Utc::now() - Duration::hours(2);
        let cookie = tokens.issue_stake_cookie_at(&address(), issued).unwrap();
        let verified = tokens.verify_stake_cookie(&cookie).unwrap();
        assert_eq!(verified.address, address());
        assert!(verified.age_seconds(Utc::now()) >= 2 * 3600);
    }

    #[test]
    fn test_unstaked_cookie_claim_rejected() {
        let tokens = manager();
        let now = Utc::now().timestamp();
        let claims = StakeClaims {
            wallet: address().to_hex(),
            staked: false,
            aud: STAKE_AUDIENCE.to_string(),
            iat: now,
            exp: now + 3600,
        };
        let raw = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret"))
            .unwrap();
        assert!(matches!(tokens.verify_stake_cookie(&raw), Err(TokenError::Invalid)));
    }
}
