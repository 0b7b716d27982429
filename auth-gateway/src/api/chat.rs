// auth-gateway/src/api/chat.rs
use actix_web::{post, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use common::{ChatMode, ChatRequest, ChatResponse};

use super::{bearer_token, AppState};
use crate::chat::ChatTurn;
use crate::error::{bad_request, AuthError};
use crate::policy::{Rejection, RequestContext};

/// One chat turn: authorize, gate elevated modes, forward to the completion backend
#[post("/api")]
pub async fn chat(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ChatRequest>,
) -> impl Responder {
    let ChatRequest {
        text,
        history,
        mode,
        mut credentials,
    } = body.into_inner();

    let Some(text) = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
        return bad_request("MISSING_TEXT", "Text is required");
    };

    if credentials.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
        credentials.token = bearer_token(&req);
    }

    let stake_cookie = state.cookies.read(&req);
    let client = state.client_addr(&req);
    let context = RequestContext {
        credentials: &credentials,
        stake_cookie: stake_cookie.as_deref(),
        client_addr: &client,
    };

    let authorization = match state.policy.authorize(context, Utc::now()).await {
        Ok(authorization) => authorization,
        Err(rejection) => return state.reject(rejection),
    };

    let elevated = mode == ChatMode::Image;
    if elevated {
        if let Err(error) = authorization.require_elevated() {
            tracing::warn!(
                "Elevated mode denied for {}",
                authorization
                    .address()
                    .map_or_else(|| client.clone(), |a| a.to_hex())
            );
            return state.reject(Rejection {
                error,
                cookie: authorization.cookie,
            });
        }
    }

    let turn = ChatTurn {
        text: &text,
        history: &history,
        elevated,
    };
    let answer = match state.chat.complete(turn).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::error!("Chat completion failed: {}", e);
            return state.reject(Rejection {
                error: AuthError::InternalFault,
                cookie: authorization.cookie,
            });
        }
    };

    let mut response = HttpResponse::Ok().json(ChatResponse {
        answer,
        address: authorization.address(),
        token: authorization.session_token.clone(),
        staked: authorization.stake.is_staked(),
    });
    state.cookies.apply(&mut response, &authorization.cookie);
    response
}

#[cfg(test)]
mod tests {
    use crate::api::configure;
    use crate::api::testing::{app_state, app_state_with};
    use crate::policy::testing::test_config;
    use crate::signature::testing::{sign_hex, signer_address};
    use crate::stake::StakeStatus;
    use actix_web::cookie::time::Duration as CookieDuration;
    use actix_web::cookie::Cookie;
    use actix_web::http::header;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    const MESSAGE: &str = "Welcome! Sign to log in.";

    #[actix_web::test]
    async fn test_anonymous_turns_then_limited() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        for _ in 0..3 {
            let req = test::TestRequest::post()
                .uri("/api")
                .peer_addr("203.0.113.9:41000".parse().unwrap())
                .set_json(json!({"text": "hi"}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 200);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["answer"], "pong");
            assert_eq!(body["address"], Value::Null);
            assert_eq!(body["staked"], false);
        }

        let req = test::TestRequest::post()
            .uri("/api")
            .peer_addr("203.0.113.9:41001".parse().unwrap())
            .set_json(json!({"text": "hi"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 429);
        assert!(resp.headers().contains_key(header::RETRY_AFTER));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "ANONYMOUS_RATE_LIMIT_EXCEEDED");
    }

    #[actix_web::test]
    async fn test_spoofed_forwarded_for_shares_peer_quota() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        for i in 0..4 {
            let req = test::TestRequest::post()
                .uri("/api")
                .peer_addr("192.0.2.50:5000".parse().unwrap())
                .insert_header(("x-forwarded-for", format!("198.51.100.{}", i)))
                .set_json(json!({"text": "hi"}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            if i < 3 {
                assert_eq!(resp.status(), 200);
            } else {
                assert_eq!(resp.status(), 429);
                let body: Value = test::read_body_json(resp).await;
                assert_eq!(body["error"], "ANONYMOUS_RATE_LIMIT_EXCEEDED");
            }
        }
    }

    #[actix_web::test]
    async fn test_forwarded_for_honoured_behind_trusted_proxy() {
        let mut config = test_config();
        config.trust_forwarded_headers = true;
        let (state, _) = app_state_with(config);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        for i in 0..4 {
            let req = test::TestRequest::post()
                .uri("/api")
                .peer_addr("10.0.0.2:5000".parse().unwrap())
                .insert_header(("x-forwarded-for", format!("198.51.100.{}", i)))
                .set_json(json!({"text": "hi"}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 200);
        }
    }

    #[actix_web::test]
    async fn test_signed_turn_returns_session_token() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api")
            .set_json(json!({
                "text": "hello",
                "history": [{"role": "user", "content": "earlier"}],
                "walletAddress": signer_address(1).to_hex(),
                "signature": sign_hex(1, MESSAGE),
                "message": MESSAGE,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["address"], signer_address(1).to_hex());
        let token = body["token"].as_str().expect("token issued");

        // the token alone is enough on the next turn, via header
        let req = test::TestRequest::post()
            .uri("/api")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
            .set_json(json!({"text": "again"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["address"], signer_address(1).to_hex());
        assert!(body.get("token").is_none());
    }

    #[actix_web::test]
    async fn test_invalid_token_rejected() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api")
            .set_json(json!({"text": "hi", "token": "not-a-jwt"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "INVALID_SESSION");
    }

    #[actix_web::test]
    async fn test_stale_stake_cookie_denies_image_and_clears() {
        let (state, stake) = app_state();
        let cookie = state.policy.tokens().issue_stake_cookie(&signer_address(2)).unwrap();
        let token = state.policy.tokens().issue_session(&signer_address(2)).unwrap();
        stake.set(signer_address(2), StakeStatus::NotStaked);
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api")
            .cookie(Cookie::new("stake_status", cookie))
            .set_json(json!({"text": "draw a cat", "mode": "image", "token": token}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);

        let cleared = resp
            .response()
            .cookies()
            .find(|c| c.name() == "stake_status")
            .expect("stake cookie cleared");
        assert_eq!(cleared.value(), "");
        assert_eq!(cleared.max_age(), Some(CookieDuration::seconds(0)));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "STAKE_REQUIRED");
    }

    #[actix_web::test]
    async fn test_image_mode_for_staked_wallet() {
        let (state, stake) = app_state();
        stake.set(signer_address(3), StakeStatus::Staked);
        let token = state.policy.tokens().issue_session(&signer_address(3)).unwrap();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api")
            .set_json(json!({"text": "draw a cat", "mode": "image", "token": token}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert!(resp.response().cookies().any(|c| c.name() == "stake_status"));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["staked"], true);
        assert_eq!(body["answer"], "pong:elevated");
    }

    #[actix_web::test]
    async fn test_stake_outage_reported_on_image_mode() {
        let (state, stake) = app_state();
        stake.set(signer_address(3), StakeStatus::Unavailable);
        let token = state.policy.tokens().issue_session(&signer_address(3)).unwrap();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api")
            .set_json(json!({"text": "draw", "mode": "image", "token": token}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "STAKE_CHECK_UNAVAILABLE");
    }

    #[actix_web::test]
    async fn test_missing_text() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api")
            .set_json(json!({"text": "   "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "MISSING_TEXT");
    }

    #[actix_web::test]
    async fn test_malformed_body() {
        let (state, _) = app_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "INVALID_REQUEST");
    }
}
