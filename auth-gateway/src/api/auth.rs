// auth-gateway/src/api/auth.rs
use actix_web::{post, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use common::{AuthRequest, AuthResponse, WalletCredentials};

use super::AppState;
use crate::error::AuthError;
use crate::policy::{Identity, Rejection};

/// Exchange a wallet signature for a session token.
///
/// Attempts are limited per client address; chat quota is not consumed.
#[post("/auth")]
pub async fn authenticate(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<AuthRequest>,
) -> impl Responder {
    let now = Utc::now();
    let client = state.client_addr(&req);
    if let Err(e) = state.policy.check_auth_attempt(&client, now) {
        tracing::warn!("Too many authentication attempts from {}", client);
        return state.reject(e.into());
    }

    let body = body.into_inner();
    let credentials = WalletCredentials {
        wallet_address: body.wallet_address,
        signature: body.signature,
        message: body.message,
        token: None,
    };

    let address = match state.policy.authenticate(&credentials).await {
        Ok(Identity::Authenticated { address, method }) => {
            tracing::info!("Authenticated {} via {:?}", address, method);
            address
        }
        Ok(Identity::Anonymous) => return state.reject(AuthError::InvalidCredentialFormat.into()),
        Err(e) => return state.reject(e.into()),
    };

    let cookie = state.cookies.read(&req);
    let stake = state.policy.resolve_stake(&address, cookie.as_deref(), now).await;

    let token = match state.policy.tokens().issue_session_at(&address, now) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Failed to sign session token: {}", e);
            return state.reject(Rejection {
                error: AuthError::InternalFault,
                cookie: stake.cookie,
            });
        }
    };

    let mut response = HttpResponse::Ok().json(AuthResponse {
        address,
        token,
        staked: stake.status.is_staked(),
        message: "Authentication successful".to_string(),
    });
    state.cookies.apply(&mut response, &stake.cookie);
    response
}

#[cfg(test)]
mod tests {
    use crate::api::configure;
    use crate::api::testing::app_state;
    use crate::signature::testing::{sign_hex, signer_address};
    use crate::stake::StakeStatus;
    use actix_web::http::header;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    const MESSAGE: &str = "Welcome! Sign to log in.";

    #[actix_web::test]
    async fn test_signature_exchange_for_token_and_cookie() {
        let (state, stake) = app_state();
        stake.set(signer_address(4), StakeStatus::Staked);
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/auth")
            .set_json(json!({
                "walletAddress": signer_address(4).to_hex(),
                "signature": sign_hex(4, MESSAGE),
                "message": MESSAGE,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == "stake_status")
            .expect("stake cookie set")
            .value()
            .to_string();
        assert!(state.policy.tokens().verify_stake_cookie(&cookie).is_ok());

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["address"], signer_address(4).to_hex());
        assert_eq!(body["staked"], true);
        assert_eq!(body["message"], "Authentication successful");

        let session = state
            .policy
            .tokens()
            .verify_session(body["token"].as_str().unwrap())
            .unwrap();
        assert_eq!(session.address, signer_address(4));
    }

    #[actix_web::test]
    async fn test_unstaked_wallet_gets_no_cookie() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/auth")
            .set_json(json!({
                "walletAddress": signer_address(5).to_hex(),
                "signature": sign_hex(5, MESSAGE),
                "message": MESSAGE,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.response().cookies().count(), 0);
    }

    #[actix_web::test]
    async fn test_missing_fields_rejected() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        for body in [
            json!({}),
            json!({"walletAddress": signer_address(1).to_hex(), "message": MESSAGE}),
        ] {
            let req = test::TestRequest::post().uri("/auth").set_json(body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 401);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "INVALID_CREDENTIAL_FORMAT");
        }
    }

    #[actix_web::test]
    async fn test_signature_from_other_wallet_rejected() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/auth")
            .set_json(json!({
                "walletAddress": signer_address(2).to_hex(),
                "signature": sign_hex(1, MESSAGE),
                "message": MESSAGE,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "INVALID_SIGNATURE");
    }

    #[actix_web::test]
    async fn test_auth_attempts_limited_per_client() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        // failed guesses count the same as successes
        for i in 0..10 {
            let seed = if i % 2 == 0 { 6 } else { 7 };
            let req = test::TestRequest::post()
                .uri("/auth")
                .peer_addr("192.0.2.60:5000".parse().unwrap())
                .set_json(json!({
                    "walletAddress": signer_address(6).to_hex(),
                    "signature": sign_hex(seed, MESSAGE),
                    "message": MESSAGE,
                }))
                .to_request();
            let expected = if seed == 6 { 200 } else { 401 };
            assert_eq!(test::call_service(&app, req).await.status(), expected);
        }

        let req = test::TestRequest::post()
            .uri("/auth")
            .peer_addr("192.0.2.60:5001".parse().unwrap())
            .insert_header(("x-forwarded-for", "198.51.100.77"))
            .set_json(json!({
                "walletAddress": signer_address(6).to_hex(),
                "signature": sign_hex(6, MESSAGE),
                "message": MESSAGE,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 429);
        assert!(resp.headers().contains_key(header::RETRY_AFTER));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "AUTH_RATE_LIMIT_EXCEEDED");

        let req = test::TestRequest::post()
            .uri("/auth")
            .peer_addr("192.0.2.61:5000".parse().unwrap())
            .set_json(json!({
                "walletAddress": signer_address(6).to_hex(),
                "signature": sign_hex(6, MESSAGE),
                "message": MESSAGE,
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }

    #[actix_web::test]
    async fn test_auth_does_not_consume_chat_quota() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        for _ in 0..5 {
            let req = test::TestRequest::post()
                .uri("/auth")
                .peer_addr("192.0.2.70:5000".parse().unwrap())
                .set_json(json!({
                    "walletAddress": signer_address(8).to_hex(),
                    "signature": sign_hex(8, MESSAGE),
                    "message": MESSAGE,
                }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 200);
        }

        let req = test::TestRequest::post()
            .uri("/api")
            .peer_addr("192.0.2.70:5000".parse().unwrap())
            .set_json(json!({"text": "hi"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
}
