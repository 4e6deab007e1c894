use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;

use crate::types::{BridgeRole, Network};

/// Main configuration for the bridge operator.
///
/// Built once at process start and passed by reference into every component
/// constructor; nothing reads the environment after load.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub role: BridgeRole,
    pub network: Network,
    /// Port the health/metrics/status HTTP listener binds on all interfaces.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub collector: CollectorConfig,
    pub policy: PolicyConfig,
    pub timing: TimingConfig,
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Source chain configuration
#[derive(Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub bridge_address: String,
    /// Short tag identifying the source chain in records and metrics.
    #[serde(default = "default_chain_tag")]
    pub chain_tag: String,
    /// Blocks mined on top of an event before it counts as confirmed.
    #[serde(default = "default_confirm_number")]
    pub confirm_number: u64,
    /// First block to handle when no cursor is persisted. 0 means "seed from
    /// the current chain tip".
    #[serde(default)]
    pub start_block_height: u64,
    /// Upper bound on blocks fetched per poll iteration.
    #[serde(default = "default_max_block_batch")]
    pub max_block_batch: u64,
    /// Signing key for unlock submission. Required for the collector role.
    #[serde(default)]
    pub private_key: Option<String>,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("bridge_address", &self.bridge_address)
            .field("chain_tag", &self.chain_tag)
            .field("confirm_number", &self.confirm_number)
            .field("start_block_height", &self.start_block_height)
            .field("max_block_batch", &self.max_block_batch)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Collector-only configuration: unlock batching and gas admission control.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Batch is dispatched once this many todo records accumulate.
    #[serde(default = "default_batch_number")]
    pub batch_number: usize,
    /// ... or once any record has waited this long.
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
    /// Gas price ceiling in gwei; submission waits while the chain quotes more.
    #[serde(default = "default_gas_price_gwei_limit")]
    pub gas_price_gwei_limit: u64,
    /// Base fee withheld from each lock before minting, in token base units.
    #[serde(default = "default_bridge_fee")]
    pub bridge_fee: String,
    /// Multisig coordinator endpoint. Required for the collector role.
    #[serde(default)]
    pub sig_server_url: Option<String>,
}

impl CollectorConfig {
    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }

    pub fn gas_price_limit_wei(&self) -> u128 {
        self.gas_price_gwei_limit as u128 * 1_000_000_000
    }
}

/// Sanity bounds applied to lock events before a record is created.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Locks below this amount (base units) are ignored.
    #[serde(default = "default_min_lock_amount")]
    pub min_lock_amount: String,
    /// Accepted token addresses. Empty means any token.
    #[serde(default)]
    pub token_allowlist: Vec<String>,
    #[serde(default = "default_max_recipient_len")]
    pub max_recipient_len: usize,
    #[serde(default = "default_max_extra_data_len")]
    pub max_extra_data_len: usize,
}

/// Loop intervals and retry delays. Production defaults mirror the deployed
/// bridge; tests shrink them to milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Sleep when the chain tip has not advanced past the cursor.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Sleep after a failed watcher iteration before retrying it.
    #[serde(default = "default_rejected_interval_ms")]
    pub rejected_interval_ms: u64,
    /// Period of the todo-record batch scheduling loop.
    #[serde(default = "default_todo_scan_interval_ms")]
    pub todo_scan_interval_ms: u64,
    /// Sleep between gas price polls while over the ceiling.
    #[serde(default = "default_gas_wait_interval_ms")]
    pub gas_wait_interval_ms: u64,
    /// Sleep between attempts of a must-not-fail persistence write.
    #[serde(default = "default_persist_retry_interval_ms")]
    pub persist_retry_interval_ms: u64,
    /// Sleep after a transient send failure before retrying the submission.
    #[serde(default = "default_send_retry_interval_ms")]
    pub send_retry_interval_ms: u64,
    /// Bounded retries for applying a single unlock log.
    #[serde(default = "default_log_retry_attempts")]
    pub log_retry_attempts: u32,
    #[serde(default = "default_log_retry_interval_ms")]
    pub log_retry_interval_ms: u64,
}

impl TimingConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn rejected_interval(&self) -> Duration {
        Duration::from_millis(self.rejected_interval_ms)
    }

    pub fn todo_scan_interval(&self) -> Duration {
        Duration::from_millis(self.todo_scan_interval_ms)
    }

    pub fn gas_wait_interval(&self) -> Duration {
        Duration::from_millis(self.gas_wait_interval_ms)
    }

    pub fn persist_retry_interval(&self) -> Duration {
        Duration::from_millis(self.persist_retry_interval_ms)
    }

    pub fn send_retry_interval(&self) -> Duration {
        Duration::from_millis(self.send_retry_interval_ms)
    }

    pub fn log_retry_interval(&self) -> Duration {
        Duration::from_millis(self.log_retry_interval_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
            rejected_interval_ms: default_rejected_interval_ms(),
            todo_scan_interval_ms: default_todo_scan_interval_ms(),
            gas_wait_interval_ms: default_gas_wait_interval_ms(),
            persist_retry_interval_ms: default_persist_retry_interval_ms(),
            send_retry_interval_ms: default_send_retry_interval_ms(),
            log_retry_attempts: default_log_retry_attempts(),
            log_retry_interval_ms: default_log_retry_interval_ms(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_lock_amount: default_min_lock_amount(),
            token_allowlist: Vec::new(),
            max_recipient_len: default_max_recipient_len(),
            max_extra_data_len: default_max_extra_data_len(),
        }
    }
}

/// Default functions
fn default_api_port() -> u16 {
    9090
}

fn default_chain_tag() -> String {
    "eth".to_string()
}

fn default_confirm_number() -> u64 {
    15
}

fn default_max_block_batch() -> u64 {
    5000
}

fn default_batch_number() -> usize {
    100
}

fn default_max_wait_time_ms() -> u64 {
    3_600_000
}

fn default_gas_price_gwei_limit() -> u64 {
    100
}

fn default_bridge_fee() -> String {
    "0".to_string()
}

fn default_min_lock_amount() -> String {
    "1".to_string()
}

fn default_max_recipient_len() -> usize {
    10240
}

fn default_max_extra_data_len() -> usize {
    10240
}

fn default_idle_interval_ms() -> u64 {
    15000
}

fn default_rejected_interval_ms() -> u64 {
    15000
}

fn default_todo_scan_interval_ms() -> u64 {
    15000
}

fn default_gas_wait_interval_ms() -> u64 {
    30000
}

fn default_persist_retry_interval_ms() -> u64 {
    3000
}

fn default_send_retry_interval_ms() -> u64 {
    5000
}

fn default_log_retry_attempts() -> u32 {
    3
}

fn default_log_retry_interval_ms() -> u64 {
    3000
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads .env file if present, then reads from environment.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let role: BridgeRole = env::var("BRIDGE_ROLE")
            .map_err(|_| eyre!("BRIDGE_ROLE environment variable is required"))?
            .parse()?;

        let network: Network = env::var("NETWORK")
            .unwrap_or_else(|_| "mainnet".to_string())
            .parse()?;

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let chain = ChainConfig {
            rpc_url: env::var("CHAIN_RPC_URL")
                .map_err(|_| eyre!("CHAIN_RPC_URL environment variable is required"))?,
            bridge_address: env::var("CHAIN_BRIDGE_ADDRESS")
                .map_err(|_| eyre!("CHAIN_BRIDGE_ADDRESS environment variable is required"))?,
            chain_tag: env::var("CHAIN_TAG").unwrap_or_else(|_| default_chain_tag()),
            confirm_number: env::var("CONFIRM_NUMBER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_confirm_number),
            start_block_height: env::var("START_BLOCK_HEIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            max_block_batch: env::var("MAX_BLOCK_BATCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_block_batch),
            private_key: env::var("CHAIN_PRIVATE_KEY").ok(),
        };

        let collector = CollectorConfig {
            batch_number: env::var("BATCH_NUMBER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_batch_number),
            max_wait_time_ms: env::var("MAX_WAIT_TIME_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_wait_time_ms),
            gas_price_gwei_limit: env::var("GAS_PRICE_GWEI_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_gas_price_gwei_limit),
            bridge_fee: env::var("BRIDGE_FEE").unwrap_or_else(|_| default_bridge_fee()),
            sig_server_url: env::var("SIG_SERVER_URL").ok(),
        };

        let policy = PolicyConfig {
            min_lock_amount: env::var("MIN_LOCK_AMOUNT")
                .unwrap_or_else(|_| default_min_lock_amount()),
            token_allowlist: env::var("TOKEN_ALLOWLIST")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_recipient_len: env::var("MAX_RECIPIENT_LEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_recipient_len),
            max_extra_data_len: env::var("MAX_EXTRA_DATA_LEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_extra_data_len),
        };

        let config = Config {
            role,
            network,
            api_port: env::var("API_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_api_port),
            database,
            chain,
            collector,
            policy,
            timing: TimingConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.chain.rpc_url.is_empty() {
            return Err(eyre!("chain.rpc_url cannot be empty"));
        }

        if self.chain.bridge_address.len() != 42 || !self.chain.bridge_address.starts_with("0x") {
            return Err(eyre!(
                "chain.bridge_address must be a valid hex address (42 chars with 0x prefix)"
            ));
        }

        if self.chain.chain_tag.is_empty() {
            return Err(eyre!("chain.chain_tag cannot be empty"));
        }

        if self.collector.bridge_fee.parse::<u128>().is_err() {
            return Err(eyre!(
                "collector.bridge_fee must be a decimal amount in base units"
            ));
        }

        if self.policy.min_lock_amount.parse::<u128>().is_err() {
            return Err(eyre!(
                "policy.min_lock_amount must be a decimal amount in base units"
            ));
        }

        // The collector signs and submits unlock transactions; a watcher never
        // holds key material.
        if self.role == BridgeRole::Collector {
            match &self.chain.private_key {
                Some(key) if key.len() == 66 && key.starts_with("0x") => {}
                Some(_) => {
                    return Err(eyre!(
                        "chain.private_key must be 66 chars (0x + 64 hex chars)"
                    ))
                }
                None => {
                    return Err(eyre!("chain.private_key is required for the collector role"));
                }
            }
            if self.collector.sig_server_url.is_none() {
                return Err(eyre!(
                    "collector.sig_server_url is required for the collector role"
                ));
            }
            if self.collector.batch_number == 0 {
                return Err(eyre!("collector.batch_number must be at least 1"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(role: BridgeRole) -> Config {
        Config {
            role,
            network: Network::Mainnet,
            api_port: default_api_port(),
            database: DatabaseConfig {
                url: "postgres://localhost/bridge".to_string(),
            },
            chain: ChainConfig {
                rpc_url: "http://localhost:8545".to_string(),
                bridge_address: "0x0000000000000000000000000000000000000001".to_string(),
                chain_tag: "eth".to_string(),
                confirm_number: 15,
                start_block_height: 0,
                max_block_batch: 5000,
                private_key: Some(
                    "0x0000000000000000000000000000000000000000000000000000000000000001"
                        .to_string(),
                ),
            },
            collector: CollectorConfig {
                batch_number: 100,
                max_wait_time_ms: 3_600_000,
                gas_price_gwei_limit: 100,
                bridge_fee: "0".to_string(),
                sig_server_url: Some("http://localhost:8090".to_string()),
            },
            policy: PolicyConfig::default(),
            timing: TimingConfig::default(),
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_api_port(), 9090);
        assert_eq!(default_confirm_number(), 15);
        assert_eq!(default_max_block_batch(), 5000);
        assert_eq!(default_idle_interval_ms(), 15000);
        assert_eq!(default_gas_wait_interval_ms(), 30000);
        assert_eq!(default_log_retry_attempts(), 3);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config(BridgeRole::Collector).validate().is_ok());
        assert!(base_config(BridgeRole::Watcher).validate().is_ok());
    }

    #[test]
    fn test_bridge_address_validation() {
        let mut config = base_config(BridgeRole::Watcher);
        config.chain.bridge_address = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collector_requires_key_and_sig_server() {
        let mut config = base_config(BridgeRole::Collector);
        config.chain.private_key = None;
        assert!(config.validate().is_err());

        let mut config = base_config(BridgeRole::Collector);
        config.chain.private_key = Some("0x123".to_string());
        assert!(config.validate().is_err());

        let mut config = base_config(BridgeRole::Collector);
        config.collector.sig_server_url = None;
        assert!(config.validate().is_err());

        // A watcher needs neither
        let mut config = base_config(BridgeRole::Watcher);
        config.chain.private_key = None;
        config.collector.sig_server_url = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bridge_fee_must_be_numeric() {
        let mut config = base_config(BridgeRole::Collector);
        config.collector.bridge_fee = "1e18".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gas_price_limit_wei() {
        let config = base_config(BridgeRole::Collector);
        assert_eq!(config.collector.gas_price_limit_wei(), 100_000_000_000);
    }
}
