// auth-gateway/src/signature/contract_wallet.rs
//! EIP-1271 verification for smart-contract wallets.
//!
//! Used only after key-based recovery failed. Any transport or decoding problem
//! resolves to `false`.

use async_trait::async_trait;
use common::models::WalletAddress;
use common::ChainConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::recovery::{decode_hex, personal_message_hash};

/// `bytes4(keccak256("isValidSignature(bytes32,bytes)"))`, also the success return value
pub const EIP1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

#[derive(Debug, Error)]
pub enum ContractCallError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ContractCallError {
    fn from(e: reqwest::Error) -> Self {
        ContractCallError::Http(e.to_string())
    }
}

#[async_trait]
pub trait ContractWalletVerifier: Send + Sync {
    /// Whether the contract deployed at `claimed` accepts `signature` for `message`
    async fn verify_contract_wallet(
        &self,
        claimed: &WalletAddress,
        message: &str,
        signature: &str,
    ) -> bool;
}

/// Used when no chain RPC is configured
pub struct DisabledContractWallets;

#[async_trait]
impl ContractWalletVerifier for DisabledContractWallets {
    async fn verify_contract_wallet(&self, _: &WalletAddress, _: &str, _: &str) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: Vec<serde_json::Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

/// Read-only EIP-1271 checks over an Ethereum JSON-RPC endpoint
pub struct JsonRpcContractVerifier {
    rpc_url: String,
    client: reqwest::Client,
}

impl JsonRpcContractVerifier {
    pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, ContractCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContractCallError::Http(e.to_string()))?;

        Ok(Self { rpc_url, client })
    }

    /// Build the verifier the config asks for
    pub fn from_config(config: &ChainConfig) -> Result<Box<dyn ContractWalletVerifier>, ContractCallError> {
        match config.rpc_url.as_deref().filter(|url| !url.trim().is_empty()) {
            Some(url) => Ok(Box::new(Self::new(
                url.to_string(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            None => Ok(Box::new(DisabledContractWallets)),
        }
    }

    async fn rpc(&self, method: &'static str, params: Vec<serde_json::Value>) -> Result<Vec<u8>, ContractCallError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ContractCallError::Rpc(error.message));
        }

        let result = response
            .result
            .ok_or_else(|| ContractCallError::InvalidResponse("empty result".to_string()))?;

        let digits = result.trim_start_matches("0x");
        hex::decode(digits).map_err(|e| ContractCallError::InvalidResponse(e.to_string()))
    }

    async fn get_code(&self, address: &WalletAddress) -> Result<Vec<u8>, ContractCallError> {
        self.rpc(
            "eth_getCode",
            vec![serde_json::json!(address.to_hex()), serde_json::json!("latest")],
        )
        .await
    }

    async fn call(&self, to: &WalletAddress, data: &[u8]) -> Result<Vec<u8>, ContractCallError> {
        self.rpc(
            "eth_call",
            vec![
                serde_json::json!({
                    "to": to.to_hex(),
                    "data": format!("0x{}", hex::encode(data)),
                }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }

    async fn check(
        &self,
        claimed: &WalletAddress,
        message: &str,
        signature: &str,
    ) -> Result<bool, ContractCallError> {
        let code = self.get_code(claimed).await?;
        if code.is_empty() {
            tracing::debug!("{} has no contract code, skipping EIP-1271", claimed);
            return Ok(false);
        }

        let Some(signature) = decode_hex(signature) else {
            return Ok(false);
        };

        let hash = personal_message_hash(message.as_bytes());
        let returned = self.call(claimed, &encode_is_valid_signature(&hash, &signature)).await?;
        Ok(is_magic_value(&returned))
    }
}

#[async_trait]
impl ContractWalletVerifier for JsonRpcContractVerifier {
    async fn verify_contract_wallet(
        &self,
        claimed: &WalletAddress,
        message: &str,
        signature: &str,
    ) -> bool {
        match self.check(claimed, message, signature).await {
            Ok(valid) => {
                if valid {
                    tracing::info!("Contract wallet {} accepted the signature", claimed);
                }
                valid
            }
            Err(e) => {
                tracing::error!("Contract wallet verification for {} failed: {}", claimed, e);
                false
            }
        }
    }
}

/// ABI calldata for `isValidSignature(bytes32 hash, bytes signature)`
pub fn encode_is_valid_signature(hash: &[u8; 32], signature: &[u8]) -> Vec<u8> {
    let padded_len = signature.len().div_ceil(32) * 32;
    let mut data = Vec::with_capacity(4 + 32 * 3 + padded_len);

    data.extend_from_slice(&EIP1271_MAGIC_VALUE);
    data.extend_from_slice(hash);
    data.extend_from_slice(&abi_word(64)); // offset of the dynamic `bytes`
    data.extend_from_slice(&abi_word(signature.len() as u64));
    data.extend_from_slice(signature);
    data.resize(4 + 32 * 3 + padded_len, 0);
    data
}

/// Exactly one ABI word: the `bytes4` magic value left-aligned, zero padding after it.
///
/// Anything longer (an echoed calldata, for instance, also starts with the selector) fails.
pub fn is_magic_value(returned: &[u8]) -> bool {
    returned.len() == 32
        && returned[..4] == EIP1271_MAGIC_VALUE
        && returned[4..].iter().all(|b| *b == 0)
}

fn abi_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}
