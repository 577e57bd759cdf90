//! Node connection configuration.
//!
//! Read from the `[rpc]` table of an optional TOML file and `ZEN_RPC__*`
//! environment variables. When no user/password is configured the node's
//! `zen.conf` supplies them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use zen_core::address::Network;

use crate::credentials::{default_zen_conf, Credentials};
use crate::error::RpcError;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub host: String,
    /// Defaults to the network's RPC port.
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// zen.conf to take credentials from; `~/.zen/zen.conf` when unset.
    pub zen_conf: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            user: None,
            password: None,
            zen_conf: None,
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for RpcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("zen_conf", &self.zen_conf)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl RpcConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, RpcError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let cfg = builder
            .add_source(
                config::Environment::with_prefix("ZEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        match cfg.get::<Self>("rpc") {
            Ok(rpc) => Ok(rpc),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn endpoint(&self, network: Network) -> String {
        let port = self.port.unwrap_or_else(|| network.default_rpc_port());
        format!("http://{}:{}", self.host, port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured credentials, else those in the node's config file.
    pub fn credentials(&self) -> Result<Credentials, RpcError> {
        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            return Ok(Credentials { user: user.clone(), password: password.clone() });
        }
        let path = self.zen_conf.clone().or_else(default_zen_conf).ok_or(RpcError::NoCredentials)?;
        Credentials::from_zen_conf(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn endpoint_uses_network_port() {
        let cfg = RpcConfig::default();
        assert_eq!(cfg.endpoint(Network::Mainnet), "http://127.0.0.1:8231");
        assert_eq!(cfg.endpoint(Network::Testnet), "http://127.0.0.1:18231");
        let cfg = RpcConfig { port: Some(9000), host: "node".into(), ..RpcConfig::default() };
        assert_eq!(cfg.endpoint(Network::Mainnet), "http://node:9000");
    }

    #[test]
    fn explicit_credentials_win() {
        let cfg = RpcConfig {
            user: Some("u".into()),
            password: Some("p".into()),
            zen_conf: Some(PathBuf::from("/nonexistent")),
            ..RpcConfig::default()
        };
        assert_eq!(cfg.credentials().unwrap().user, "u");
    }

    #[test]
    fn falls_back_to_zen_conf() {
        let mut conf = tempfile::NamedTempFile::new().unwrap();
        writeln!(conf, "rpcuser=node\nrpcpassword=pw").unwrap();
        let cfg = RpcConfig { user: Some("ignored".into()), zen_conf: Some(conf.path().into()), ..RpcConfig::default() };
        let c = cfg.credentials().unwrap();
        assert_eq!((c.user.as_str(), c.password.as_str()), ("node", "pw"));
    }

    #[test]
    fn loads_rpc_table() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[rpc]\nhost = \"10.0.0.2\"\nport = 18231\ntimeout_secs = 5").unwrap();
        let cfg = RpcConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.host, "10.0.0.2");
        assert_eq!(cfg.port, Some(18231));
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.user, None);
    }

    #[test]
    fn debug_hides_password() {
        let cfg = RpcConfig { password: Some("hunter2".into()), ..RpcConfig::default() };
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
