// common/src/config.rs
use config::{Config as ConfigFile, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Session secret used when nothing is configured. Only fit for local development.
pub const DEV_SESSION_SECRET: &str = "dev_session_secret";

const THIRTY_DAYS_SECS: i64 = 30 * 24 * 60 * 60;

/// Central configuration for the gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_addr: String,
    /// Take the client address from `X-Forwarded-For`/`Forwarded`. Only safe behind a proxy
    /// that overwrites those headers; otherwise clients pick their own rate-limit key.
    pub trust_forwarded_headers: bool,
    pub session: SessionConfig,
    pub signature: SignatureConfig,
    pub rate_limit: RateLimitConfig,
    pub stake: StakeConfig,
    pub chain: ChainConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub secret: String,
    pub token_ttl_secs: i64,
    pub stake_cookie_ttl_secs: i64,
    pub stake_cookie_name: String,
    /// 0 means the stake cookie is re-checked against the live verifier on every use
    pub stake_revalidate_after_secs: i64,
    pub secure_cookies: bool,
}

/// What to do when a signature recovers to an address other than the claimed one
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Reject the request
    #[default]
    Strict,
    /// Authenticate as the recovered address. Reduced security.
    Permissive,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub mismatch_policy: MismatchPolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub wallet_limit: u32,
    pub wallet_window_secs: i64,
    pub anonymous_limit: u32,
    pub anonymous_window_secs: i64,
    /// `POST /auth` attempts per client address; each one may cost a live stake lookup
    pub auth_limit: u32,
    pub auth_window_secs: i64,
    pub cleanup_interval_secs: u64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StakeProviderKind {
    /// Dune analytics query API, reports already-scaled token amounts
    #[default]
    Dune,
    /// Indexer/dashboard API reporting integer base units
    Indexer,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StakeConfig {
    pub provider: StakeProviderKind,
    /// Minimum stake in whole tokens
    pub min_stake: f64,
    /// Addresses always treated as staked
    pub allow_list: Vec<String>,
    pub api_url: String,
    pub api_key: Option<String>,
    pub query_id: u64,
    pub subnet_id: String,
    /// JSON pointer to the amount in an indexer response
    pub amount_pointer: String,
    pub decimals: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint; contract-wallet checks are disabled without one
    pub rpc_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub completion_url: Option<String>,
    pub api_key: Option<String>,
    pub model_id: String,
    /// Model for elevated (staked-only) turns; falls back to `model_id`
    pub elevated_model_id: Option<String>,
    pub max_tokens: u32,
    pub instructions: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            trust_forwarded_headers: false,
            session: SessionConfig::default(),
            signature: SignatureConfig::default(),
            rate_limit: RateLimitConfig::default(),
            stake: StakeConfig::default(),
            chain: ChainConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: DEV_SESSION_SECRET.to_string(),
            token_ttl_secs: THIRTY_DAYS_SECS,
            stake_cookie_ttl_secs: THIRTY_DAYS_SECS,
            stake_cookie_name: "stake_status".to_string(),
            stake_revalidate_after_secs: 0,
            secure_cookies: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            wallet_limit: 3,
            wallet_window_secs: 30 * 60,
            anonymous_limit: 3,
            anonymous_window_secs: 30 * 60,
            auth_limit: 10,
            auth_window_secs: 15 * 60,
            cleanup_interval_secs: 300,
        }
    }
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self {
            provider: StakeProviderKind::Dune,
            min_stake: 10.0,
            allow_list: Vec::new(),
            api_url: "https://api.dune.com/api/v1".to_string(),
            api_key: None,
            query_id: 5112115,
            subnet_id: String::new(),
            amount_pointer: "/data/stakedAmount".to_string(),
            decimals: 18,
            timeout_secs: 10,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            timeout_secs: 10,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            completion_url: None,
            api_key: None,
            model_id: String::new(),
            elevated_model_id: None,
            max_tokens: 1000,
            instructions: None,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from files, `APP__*` variables and the legacy deployment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&env::vars().collect())
    }

    /// Same as [`Config::load`], reading variables from `vars` instead of the process
    pub fn load_from(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        // Get the run mode, defaulting to "development" for file lookup only
        let explicit_run_mode = lookup(vars, "RUN_MODE");
        let run_mode = explicit_run_mode.clone().unwrap_or_else(|| "development".into());

        // Locate the config directory
        let config_dir = lookup(vars, "CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let builder = ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("stake.allow_list")
                    .source(Some(vars.clone())),
            );

        // Legacy deployment variable names win over everything else
        let builder = builder
            .set_override_option("server_addr", parsed::<u16>(vars, "PORT")?.map(|p| format!("0.0.0.0:{}", p)))?
            .set_override_option("session.secret", lookup(vars, "SESSION_SECRET"))?
            .set_override_option("rate_limit.wallet_limit", parsed::<i64>(vars, "RATE_LIMIT")?)?
            .set_override_option("rate_limit.wallet_window_secs", millis_as_secs(vars, "RATE_WINDOW")?)?
            .set_override_option("rate_limit.anonymous_limit", parsed::<i64>(vars, "ANONYMOUS_RATE_LIMIT")?)?
            .set_override_option("rate_limit.anonymous_window_secs", millis_as_secs(vars, "ANONYMOUS_WINDOW")?)?
            .set_override_option("stake.min_stake", parsed::<f64>(vars, "MIN_STAKE")?)?
            .set_override_option("stake.api_key", lookup(vars, "DUNE_API_KEY"))?
            .set_override_option("stake.subnet_id", lookup(vars, "SUBNET_ID"))?
            .set_override_option("stake.allow_list", list(vars, "STAKE_ALLOW_LIST"))?
            .set_override_option("chain.rpc_url", lookup(vars, "RPC_URL"))?
            .set_override_option("upstream.completion_url", lookup(vars, "API_URL_CHAT_COMPLETION"))?
            .set_override_option("upstream.api_key", lookup(vars, "API_KEY"))?
            .set_override_option("upstream.model_id", lookup(vars, "MODEL_ID"))?
            .set_override_option("upstream.max_tokens", parsed::<i64>(vars, "MAX_TOKENS")?)?
            .set_override_option("upstream.instructions", lookup(vars, "INSTRUCTIONS"))?;

        let config: Self = builder.build()?.try_deserialize()?;
        config.check_secret(explicit_run_mode.as_deref())?;
        Ok(config)
    }

    /// Load configuration from the process environment.
    ///
    /// There is no fallback: a source that doesn't parse stops startup rather than
    /// dropping the operator's settings (the session secret among them).
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::load()?;
        tracing::info!("Configuration loaded from files and environment");
        Ok(config)
    }

    /// The built-in secret is public; it signs nothing outside an explicit development run
    fn check_secret(&self, run_mode: Option<&str>) -> Result<(), ConfigError> {
        if self.session.secret.trim().is_empty() {
            return Err(ConfigError::Message("session.secret is empty".to_string()));
        }
        if self.session.secret == DEV_SESSION_SECRET && run_mode != Some("development") {
            return Err(ConfigError::Message(
                "the development session secret is only allowed with RUN_MODE=development; \
                 set SESSION_SECRET"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Log anything about the loaded configuration an operator should notice
    pub fn log_warnings(&self) {
        if self.session.secret == DEV_SESSION_SECRET {
            tracing::warn!("Using the development session secret; set SESSION_SECRET in production");
        }
        if self.signature.mismatch_policy == MismatchPolicy::Permissive {
            tracing::warn!(
                "Signature mismatch policy is PERMISSIVE: requests authenticate as the recovered \
                 address even when it differs from the claimed one (reduced security)"
            );
        }
        if !self.stake.allow_list.is_empty() {
            tracing::info!(
                "Stake allow-list active with {} address(es); these bypass the live stake check",
                self.stake.allow_list.len()
            );
        }
        if self.stake.provider == StakeProviderKind::Dune && self.stake.api_key.is_none() {
            tracing::warn!("No stake API key configured; every live stake check will fail closed");
        }
        if self.trust_forwarded_headers {
            tracing::info!("Client addresses taken from forwarding headers; a trusted proxy must set them");
        }
        if self.chain.rpc_url.is_none() {
            tracing::info!("No chain RPC configured; contract-wallet signatures are disabled");
        }
    }
}

fn lookup(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>, ConfigError> {
    lookup(vars, key)
        .map(|v| {
            v.parse()
                .map_err(|_| ConfigError::Message(format!("{} has an invalid value: {:?}", key, v)))
        })
        .transpose()
}

fn millis_as_secs(vars: &HashMap<String, String>, key: &str) -> Result<Option<i64>, ConfigError> {
    Ok(parsed::<i64>(vars, key)?.map(|ms| ms / 1000))
}

fn list(vars: &HashMap<String, String>, key: &str) -> Option<Vec<String>> {
    lookup(vars, key).map(|v| {
        v.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}
