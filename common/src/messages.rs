// common/src/messages.rs
use serde::{Deserialize, Serialize};

use crate::models::WalletAddress;

/// Credentials a client may attach to any request.
///
/// Field names follow the browser widget's camelCase JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCredentials {
    pub wallet_address: Option<String>,
    pub signature: Option<String>,
    pub message: Option<String>,
    pub token: Option<String>,
}

/// Body of `POST /auth`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub wallet_address: Option<String>,
    pub signature: Option<String>,
    pub message: Option<String>,
}

/// Successful `POST /auth` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub address: WalletAddress,
    pub token: String,
    pub staked: bool,
    pub message: String,
}

/// A prior conversation turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Feature tier requested for a chat turn
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Text,
    /// Elevated feature reserved for staked wallets
    Image,
}

/// Body of `POST /api`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub text: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub mode: ChatMode,
    #[serde(flatten)]
    pub credentials: WalletCredentials,
}

/// Successful `POST /api` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub address: Option<WalletAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub staked: bool,
}

/// Error body; `error` is always a stable reason code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
