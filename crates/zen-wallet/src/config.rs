//! Wallet engine configuration.
//!
//! Loaded from the `[wallet]` table of an optional TOML file, overridden by
//! `ZEN_WALLET__*` environment variables (e.g. `ZEN_WALLET__NETWORK=regtest`).
//! Each engine owns its own value; nothing here is process-global.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use zen_core::address::Network;
use zen_core::constants::{DEFAULT_FEE_PER_KB, DEFAULT_RELAY_FEE_PER_KB, REPLAY_DEPTH};
use zen_core::types::FeeRate;

use crate::error::WalletError;

/// Environment variable prefix shared by every config table.
pub const ENV_PREFIX: &str = "ZEN";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    /// Blocks below the tip that replay-protected scripts reference.
    pub replay_depth: u64,
    /// Fee rate used when the oracle has no answer, zat per kB.
    pub default_fee_per_kb: u64,
    /// Ask the node's fee oracle before falling back to the default.
    pub use_fee_oracle: bool,
    /// Relay fee driving the dust rule, zat per kB.
    pub relay_fee_per_kb: u64,
    /// How long startup waits for the node to answer.
    pub startup_timeout_secs: u64,
    /// Delay between startup polls.
    pub poll_interval_ms: u64,
    /// Sign spends with the node wallet instead of with exported keys.
    pub sign_with_node: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            replay_depth: REPLAY_DEPTH,
            default_fee_per_kb: DEFAULT_FEE_PER_KB,
            use_fee_oracle: true,
            relay_fee_per_kb: DEFAULT_RELAY_FEE_PER_KB,
            startup_timeout_secs: 120,
            poll_interval_ms: 1_000,
            sign_with_node: true,
        }
    }
}

impl WalletConfig {
    /// Load the `[wallet]` table from `path` (if given and present) layered
    /// with environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, WalletError> {
        load_section(path, "wallet").map_err(|e| WalletError::Config(e.to_string()))
    }

    pub fn default_fee_rate(&self) -> FeeRate {
        FeeRate::from_per_kb(self.default_fee_per_kb)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Deserialize one table of the layered configuration, or its `Default`
/// when neither the file nor the environment mention it.
pub fn load_section<T>(path: Option<&Path>, section: &str) -> Result<T, config::ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    let cfg = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    match cfg.get::<T>(section) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(e),
    }
}
