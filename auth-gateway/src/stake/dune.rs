// auth-gateway/src/stake/dune.rs
//! Dune analytics query API.
//!
//! The query reports `net_staked_tokens` per subnet and wallet, already in whole tokens.

use async_trait::async_trait;
use common::models::WalletAddress;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{StakeError, StakeProvider};

const AMOUNT_COLUMN: &str = "net_staked_tokens";

#[derive(Debug, Deserialize)]
struct QueryResults {
    result: Option<ResultSet>,
}

#[derive(Debug, Deserialize)]
struct ResultSet {
    rows: Vec<serde_json::Map<String, Value>>,
}

pub struct DuneProvider {
    api_url: String,
    api_key: Option<String>,
    query_id: u64,
    subnet_id: String,
    client: reqwest::Client,
}

impl DuneProvider {
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        query_id: u64,
        subnet_id: String,
        timeout: Duration,
    ) -> Result<Self, StakeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StakeError::Config(e.to_string()))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            query_id,
            subnet_id,
            client,
        })
    }

    fn results_url(&self, address: &WalletAddress) -> Result<Url, StakeError> {
        let filters = format!(
            "subnet_id = {} AND wallet_address = {}",
            self.subnet_id, address
        );

        Url::parse_with_params(
            &format!("{}/query/{}/results", self.api_url, self.query_id),
            &[("filters", filters.as_str()), ("columns", AMOUNT_COLUMN)],
        )
        .map_err(|e| StakeError::Config(format!("bad stake API URL: {}", e)))
    }
}

#[async_trait]
impl StakeProvider for DuneProvider {
    fn name(&self) -> &'static str {
        "dune"
    }

    async fn staked_tokens(&self, address: &WalletAddress) -> Result<f64, StakeError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| StakeError::Config("missing Dune API key".to_string()))?;

        let response = self
            .client
            .get(self.results_url(address)?)
            .header("X-DUNE-API-KEY", api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StakeError::Api(response.status().to_string()));
        }

        let body: QueryResults = response.json().await?;
        let rows = body
            .result
            .ok_or_else(|| StakeError::InvalidResponse("missing result".to_string()))?
            .rows;

        tracing::debug!("Dune returned {} row(s) for {}", rows.len(), address);

        // no row means nothing staked for this subnet
        let Some(row) = rows.first() else {
            return Ok(0.0);
        };

        match row.get(AMOUNT_COLUMN) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| StakeError::InvalidResponse(format!("bad amount {}", n))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| StakeError::InvalidResponse(format!("bad amount {:?}", s))),
            other => Err(StakeError::InvalidResponse(format!(
                "{} missing or malformed: {:?}",
                AMOUNT_COLUMN, other
            ))),
        }
    }
}
