use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;

use crate::domain::merkle::MAX_DEPTH;
use crate::domain::smt::MAX_LEVELS;
use crate::retry::RetryPolicy;

const GWEI: u128 = 1_000_000_000;

/// Top-level relayer configuration loaded from TOML.
#[derive(Debug, Deserialize)]
pub struct RelayerConfig {
    pub relayer: RelayerSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub verifier: Option<VerifierConfig>,
    pub chains: Vec<ChainConfig>,
}

/// [relayer] section.
#[derive(Debug, Deserialize)]
pub struct RelayerSection {
    /// Hex private key of the relayer's submitting account.
    pub private_key: String,
    /// Directory holding the sled database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Gas price ceiling in gwei; requests are refused above it.
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    /// How long a nullifier is refused after a flow finishes (e.g. "30s").
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
    #[serde(default = "default_verify_timeout", with = "humantime_serde")]
    pub verify_timeout: Duration,
    #[serde(default = "default_submit_timeout", with = "humantime_serde")]
    pub submit_timeout: Duration,
    /// Period of the background sync loop.
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub sync_interval: Duration,
}

/// [tree] section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Commitment tree depth (capacity 2^depth).
    pub depth: usize,
    /// Number of recent local roots kept for lookups.
    pub root_history: usize,
    /// Levels of the exclusion SMT; witnesses are padded to this.
    pub smt_levels: usize,
    /// Deposits fetched per chain read during sync.
    pub sync_batch_size: u64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: 20,
            root_history: 100,
            smt_levels: 20,
            sync_batch_size: 500,
        }
    }
}

/// [verifier] section: snarkjs binary and per-circuit verification keys.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_snarkjs")]
    pub snarkjs_bin: String,
    pub withdraw_vkey: PathBuf,
    pub split_withdraw_vkey: PathBuf,
    pub compliance_vkey: PathBuf,
}

/// One [[chains]] entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub rpc_url: String,
    pub pool_address: Address,
}

/// Knobs the orchestrator needs, derived from [relayer].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_gas_price_wei: u128,
    pub verify_timeout: Duration,
    pub submit_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_gas_price_wei: u128::from(default_max_gas_price_gwei()) * GWEI,
            verify_timeout: default_verify_timeout(),
            submit_timeout: default_submit_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_gas_price_gwei() -> u64 {
    100
}

fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_verify_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_submit_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_snarkjs() -> String {
    "snarkjs".into()
}

/// Errors from config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl RelayerConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relayer.private_key.trim().is_empty() {
            return Err(ConfigError::Validation("relayer.private_key is empty".into()));
        }
        if self.relayer.cooldown.is_zero() {
            return Err(ConfigError::Validation("relayer.cooldown must be non-zero".into()));
        }
        if self.tree.depth == 0 || self.tree.depth > MAX_DEPTH {
            return Err(ConfigError::Validation(format!(
                "tree.depth must be in 1..={MAX_DEPTH}"
            )));
        }
        if self.tree.smt_levels == 0 || self.tree.smt_levels > MAX_LEVELS {
            return Err(ConfigError::Validation(format!(
                "tree.smt_levels must be in 1..={MAX_LEVELS}"
            )));
        }
        if self.tree.sync_batch_size == 0 {
            return Err(ConfigError::Validation("tree.sync_batch_size must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation("retry.max_attempts must be positive".into()));
        }
        if self.chains.is_empty() {
            return Err(ConfigError::Validation("at least one [[chains]] entry required".into()));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate chain_id {}",
                    chain.chain_id
                )));
            }
            if chain.pool_address == Address::ZERO {
                return Err(ConfigError::Validation(format!(
                    "chain {}: pool_address is zero",
                    chain.chain_id
                )));
            }
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_gas_price_wei: u128::from(self.relayer.max_gas_price_gwei) * GWEI,
            verify_timeout: self.relayer.verify_timeout,
            submit_timeout: self.relayer.submit_timeout,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.relayer.data_dir.join("relayer.db")
    }
}
