// auth-gateway/src/stake/indexer.rs
//! Staking dashboard / indexer API reporting raw base units.
//!
//! `url_template` may contain `{address}` and `{subnet}` placeholders. The amount is read
//! from the JSON response at `amount_pointer` and divided by `10^decimals`.

use async_trait::async_trait;
use common::models::WalletAddress;
use serde_json::Value;
use std::time::Duration;

use super::{scale_base_units, StakeError, StakeProvider};

pub struct IndexerProvider {
    url_template: String,
    api_key: Option<String>,
    subnet_id: String,
    amount_pointer: String,
    decimals: u32,
    client: reqwest::Client,
}

impl IndexerProvider {
    pub fn new(
        url_template: String,
        api_key: Option<String>,
        subnet_id: String,
        amount_pointer: String,
        decimals: u32,
        timeout: Duration,
    ) -> Result<Self, StakeError> {
        if !url_template.contains("{address}") {
            return Err(StakeError::Config(
                "indexer URL must contain an {address} placeholder".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StakeError::Config(e.to_string()))?;

        Ok(Self {
            url_template,
            api_key,
            subnet_id,
            amount_pointer,
            decimals,
            client,
        })
    }

    fn url_for(&self, address: &WalletAddress) -> String {
        self.url_template
            .replace("{address}", &address.to_hex())
            .replace("{subnet}", &self.subnet_id)
    }

    fn amount_from(&self, body: &Value) -> Result<f64, StakeError> {
        let raw = match body.pointer(&self.amount_pointer) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) if n.is_u64() => n.to_string(),
            Some(Value::Null) | None => return Ok(0.0),
            Some(other) => {
                return Err(StakeError::InvalidResponse(format!(
                    "amount at {} is not an integer: {}",
                    self.amount_pointer, other
                )))
            }
        };

        scale_base_units(&raw, self.decimals).ok_or_else(|| {
            StakeError::InvalidResponse(format!("amount {:?} is not a base-unit integer", raw))
        })
    }
}

#[async_trait]
impl StakeProvider for IndexerProvider {
    fn name(&self) -> &'static str {
        "indexer"
    }

    async fn staked_tokens(&self, address: &WalletAddress) -> Result<f64, StakeError> {
        let mut request = self.client.get(self.url_for(address));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StakeError::Api(response.status().to_string()));
        }

        let body: Value = response.json().await?;
        self.amount_from(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use serde_json::json;

    fn provider(url: &str) -> IndexerProvider {
        IndexerProvider::new(
            url.to_string(),
            Some("secret".to_string()),
            "7".to_string(),
            "/data/stakedAmount".to_string(),
            18,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_template_requires_address() {
        let result = IndexerProvider::new(
            "https://indexer.example/stakes".to_string(),
            None,
            String::new(),
            "/amount".to_string(),
            18,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(StakeError::Config(_))));
    }

    #[test]
    fn test_url_substitution() {
        let indexer = provider("https://indexer.example/subnets/{subnet}/stakers/{address}");
        let address = WalletAddress::from_bytes([0xab; 20]);
        assert_eq!(
            indexer.url_for(&address),
            format!("https://indexer.example/subnets/7/stakers/0x{}", "ab".repeat(20))
        );
    }

    #[test]
    fn test_amount_is_scaled() {
        let indexer = provider("http://x/{address}");
        let body = json!({"data": {"stakedAmount": "25000000000000000000"}});
        assert_eq!(indexer.amount_from(&body).unwrap(), 25.0);

        let numeric = json!({"data": {"stakedAmount": 500000000000000000u64}});
        assert_eq!(indexer.amount_from(&numeric).unwrap(), 0.5);

        assert_eq!(indexer.amount_from(&json!({"data": {}})).unwrap(), 0.0);
        assert!(indexer.amount_from(&json!({"data": {"stakedAmount": 1.5}})).is_err());
        assert!(indexer.amount_from(&json!({"data": {"stakedAmount": "ten"}})).is_err());
    }

    #[actix_web::test]
    async fn test_fetches_from_api() {
        let server = HttpServer::new(|| {
            App::new().route(
                "/stakers/{address}",
                web::get().to(|req: actix_web::HttpRequest| async move {
                    let authorized = req
                        .headers()
                        .get("Authorization")
                        .map(|v| v.as_bytes() == b"Bearer secret")
                        .unwrap_or(false);
                    if !authorized {
                        return HttpResponse::Unauthorized().finish();
                    }
                    HttpResponse::Ok().json(json!({"data": {"stakedAmount": "12000000000000000000"}}))
                }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        let indexer = provider(&format!("http://{}/stakers/{{address}}", addr));
        let tokens = indexer
            .staked_tokens(&WalletAddress::from_bytes([1; 20]))
            .await
            .unwrap();
        assert_eq!(tokens, 12.0);
    }
}
