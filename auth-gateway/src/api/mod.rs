// auth-gateway/src/api/mod.rs
pub mod auth;
pub mod chat;

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::error::InternalError;
use actix_web::http::header;
use actix_web::{get, web, HttpRequest, HttpResponse, Responder, ResponseError};
use common::SessionConfig;

use crate::chat::ChatBackend;
use crate::error::bad_request;
use crate::policy::{AuthorizationPolicy, CookieDirective, Rejection};

/// Shared by every worker
pub struct AppState {
    pub policy: AuthorizationPolicy,
    pub chat: Box<dyn ChatBackend>,
    pub cookies: StakeCookieSettings,
    /// Take the client address from `X-Forwarded-For` / `Forwarded` instead of the socket peer
    pub trust_forwarded_headers: bool,
}

#[derive(Debug, Clone)]
pub struct StakeCookieSettings {
    pub name: String,
    pub max_age_secs: i64,
    pub secure: bool,
}

impl StakeCookieSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            name: config.stake_cookie_name.clone(),
            max_age_secs: config.stake_cookie_ttl_secs,
            secure: config.secure_cookies,
        }
    }

    fn build(&self, value: String, max_age_secs: i64) -> Cookie<'static> {
        Cookie::build(self.name.clone(), value)
            .path("/")
            .secure(self.secure)
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::seconds(max_age_secs))
            .finish()
    }

    /// The stake cookie the client sent, if any
    pub fn read(&self, req: &HttpRequest) -> Option<String> {
        req.cookie(&self.name).map(|c| c.value().to_string())
    }

    pub fn apply(&self, response: &mut HttpResponse, directive: &CookieDirective) {
        let cookie = match directive {
            CookieDirective::Keep => return,
            CookieDirective::Set(value) => self.build(value.clone(), self.max_age_secs),
            CookieDirective::Clear => self.build(String::new(), 0),
        };

        if let Err(e) = response.add_cookie(&cookie) {
            tracing::error!("Failed to attach stake cookie: {}", e);
        }
    }
}

impl AppState {
    /// Error response that still carries the cookie decision made before the refusal
    pub fn reject(&self, rejection: Rejection) -> HttpResponse {
        let mut response = rejection.error.error_response();
        self.cookies.apply(&mut response, &rejection.cookie);
        response
    }

    /// Client network address used as a rate-limit key
    pub fn client_addr(&self, req: &HttpRequest) -> String {
        client_addr(req, self.trust_forwarded_headers)
    }
}

/// Forwarding headers are client-controlled, so they only count behind a trusted proxy
pub fn client_addr(req: &HttpRequest, trust_forwarded_headers: bool) -> String {
    let forwarded = if trust_forwarded_headers {
        let info = req.connection_info();
        info.realip_remote_addr()
            .map(|addr| addr.split(',').next().unwrap_or(addr).trim().to_string())
            .filter(|addr| !addr.is_empty())
    } else {
        None
    };

    forwarded
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Session token from `Authorization: Bearer ...`
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        tracing::warn!("Rejected request body: {}", err);
        let response = bad_request("INVALID_REQUEST", "Request body is not valid JSON for this route");
        InternalError::from_response(err, response).into()
    })
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body("Wallet Auth Gateway")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(index)
        .service(auth::authenticate)
        .service(chat::chat);
}
