//! JSON-RPC 1.0 over HTTP POST with basic auth, the only mode zend serves.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use zen_core::address::Network;
use zen_core::error::GatewayError;

use crate::config::RpcConfig;
use crate::credentials::Credentials;
use crate::error::RpcError;

pub struct RpcClient {
    client: Client,
    endpoint: String,
    credentials: Credentials,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Debug, Deserialize)]
struct ReplyError {
    code: i64,
    message: String,
}

impl RpcClient {
    pub fn new(endpoint: &str, credentials: Credentials, config: &RpcConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: Client::builder().timeout(config.timeout()).build()?,
            endpoint: endpoint.to_owned(),
            credentials,
            next_id: AtomicU64::new(1),
        })
    }

    /// Client for `network`'s node as described by `config`.
    pub fn from_config(config: &RpcConfig, network: Network) -> Result<Self, RpcError> {
        Self::new(&config.endpoint(network), config.credentials()?, config)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = request_body(id, method, params);
        trace!(method, id, "rpc call");

        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        // RPC errors arrive with 404/500 and a JSON body; auth failures have none.
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::Unavailable(format!("{method}: rpc credentials rejected ({status})")));
        }
        let bytes = resp.bytes().await.map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        parse_reply(method, &bytes)
    }
}

pub(crate) fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "1.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

pub(crate) fn parse_reply<T: DeserializeOwned>(method: &str, bytes: &[u8]) -> Result<T, GatewayError> {
    let reply: Reply = serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::MalformedResponse(format!("{method}: {e}")))?;
    if let Some(err) = reply.error {
        return Err(GatewayError::Rpc { code: err.code, message: err.message });
    }
    serde_json::from_value(reply.result).map_err(|e| GatewayError::MalformedResponse(format!("{method}: {e}")))
}
