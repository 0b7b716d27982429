// auth-gateway/src/error.rs
use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use common::ErrorBody;
use thiserror::Error;

/// Which rate limit a request hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Wallet,
    Anonymous,
    /// `POST /auth` attempts per client address
    Authentication,
}

/// Every way a request can be refused.
///
/// Clients only ever see the reason code and a fixed message, never internal detail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Wallet credentials are missing or malformed")]
    InvalidCredentialFormat,
    #[error("Invalid wallet signature")]
    SignatureMismatch,
    #[error("Invalid session token")]
    SessionExpiredOrForged,
    #[error("Staking is required for this feature")]
    StakeRequired,
    #[error("Stake status could not be verified")]
    StakeCheckUnavailable,
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimitExceeded {
        scope: RateLimitScope,
        retry_after_secs: i64,
    },
    #[error("Internal server error")]
    InternalFault,
}

impl AuthError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentialFormat => "INVALID_CREDENTIAL_FORMAT",
            AuthError::SignatureMismatch => "INVALID_SIGNATURE",
            AuthError::SessionExpiredOrForged => "INVALID_SESSION",
            AuthError::StakeRequired => "STAKE_REQUIRED",
            AuthError::StakeCheckUnavailable => "STAKE_CHECK_UNAVAILABLE",
            AuthError::RateLimitExceeded {
                scope: RateLimitScope::Wallet,
                ..
            } => "RATE_LIMIT_EXCEEDED",
            AuthError::RateLimitExceeded {
                scope: RateLimitScope::Anonymous,
                ..
            } => "ANONYMOUS_RATE_LIMIT_EXCEEDED",
            AuthError::RateLimitExceeded {
                scope: RateLimitScope::Authentication,
                ..
            } => "AUTH_RATE_LIMIT_EXCEEDED",
            AuthError::InternalFault => "INTERNAL_ERROR",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.reason_code().to_string(),
            message: self.to_string(),
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentialFormat
            | AuthError::SignatureMismatch
            | AuthError::SessionExpiredOrForged => StatusCode::UNAUTHORIZED,
            AuthError::StakeRequired | AuthError::StakeCheckUnavailable => StatusCode::FORBIDDEN,
            AuthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::InternalFault => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if let AuthError::RateLimitExceeded {
            retry_after_secs, ..
        } = self
        {
            response.append_header((header::RETRY_AFTER, (*retry_after_secs).max(1).to_string()));
        }
        response.json(self.body())
    }
}

/// 400 for request bodies that are not what the route expects
pub fn bad_request(code: &str, message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorBody {
        error: code.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_reason_codes() {
        let cases = [
            (AuthError::InvalidCredentialFormat, 401, "INVALID_CREDENTIAL_FORMAT"),
            (AuthError::SignatureMismatch, 401, "INVALID_SIGNATURE"),
            (AuthError::SessionExpiredOrForged, 401, "INVALID_SESSION"),
            (AuthError::StakeRequired, 403, "STAKE_REQUIRED"),
            (AuthError::StakeCheckUnavailable, 403, "STAKE_CHECK_UNAVAILABLE"),
            (
                AuthError::RateLimitExceeded {
                    scope: RateLimitScope::Anonymous,
                    retry_after_secs: 60,
                },
                429,
                "ANONYMOUS_RATE_LIMIT_EXCEEDED",
            ),
            (
                AuthError::RateLimitExceeded {
                    scope: RateLimitScope::Authentication,
                    retry_after_secs: 60,
                },
                429,
                "AUTH_RATE_LIMIT_EXCEEDED",
            ),
            (AuthError::InternalFault, 500, "INTERNAL_ERROR"),
        ];

        for (error, status, code) in cases {
            assert_eq!(error.status_code().as_u16(), status);
            assert_eq!(error.reason_code(), code);
        }
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let error = AuthError::RateLimitExceeded {
            scope: RateLimitScope::Wallet,
            retry_after_secs: 90,
        };
        let response = error.error_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "90");
    }
}
