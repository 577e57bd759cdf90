//! # zen-rpc: JSON-RPC gateway to a zend full node.
//!
//! - [`config`]: `RpcConfig` (host, port, credentials, timeout)
//! - [`credentials`]: `rpcuser` / `rpcpassword` from zen.conf
//! - [`client`]: HTTP POST JSON-RPC client
//! - [`gateway`]: `NodeGateway` implementation for the client

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;

pub use client::RpcClient;
pub use config::RpcConfig;
pub use credentials::Credentials;
pub use error::RpcError;
