//! The node gateway contract.
//!
//! The wallet is a thin client over a trusted full node. Everything it knows
//! about the chain, its coins and its keys arrives through [`NodeGateway`].
//! Reply types mirror the node's JSON replies; amounts are ZEN as reported and
//! identifiers are left as strings so the caller decides how a decoding
//! failure is surfaced.

use async_trait::async_trait;
use bitcoin::{BlockHash, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::GatewayError;

/// One entry of the node's unspent output list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: String,
    /// Value in ZEN.
    pub amount: f64,
    #[serde(default)]
    pub confirmations: u32,
    #[serde(default)]
    pub spendable: bool,
}

/// Header fields the wallet reads from `getblockheader`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderInfo {
    pub hash: String,
    pub height: u64,
    /// Block timestamp, seconds since the epoch.
    pub time: i64,
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: Option<String>,
}

/// A wallet transaction as reported by `gettransaction` / `listtransactions`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub txid: String,
    /// Net value to the wallet in ZEN.
    pub amount: f64,
    #[serde(default)]
    pub confirmations: i64,
    #[serde(rename = "blockhash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "blockindex", default)]
    pub block_index: Option<u64>,
    #[serde(rename = "timereceived", default)]
    pub time_received: i64,
}

/// Wallet balances from `getwalletinfo`, in ZEN.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub balance: f64,
    #[serde(default)]
    pub unconfirmed_balance: f64,
}

/// Result of asking the node to sign a raw transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    /// Whether every input carries a complete signature script.
    pub complete: bool,
}

/// Capabilities the wallet consumes from a full node.
///
/// Implementations own their connection configuration; no state is shared
/// between gateway instances.
#[async_trait]
pub trait NodeGateway: Send + Sync {
    /// Height of the best chain.
    async fn block_count(&self) -> Result<u64, GatewayError>;

    /// Hash of the best block.
    async fn best_block_hash(&self) -> Result<BlockHash, GatewayError>;

    /// Chain tip as `(height, hash)`.
    ///
    /// Default implementation combines [`block_count`](Self::block_count) and
    /// [`best_block_hash`](Self::best_block_hash).
    async fn chain_tip(&self) -> Result<(u64, BlockHash), GatewayError> {
        let height = self.block_count().await?;
        let hash = self.best_block_hash().await?;
        Ok((height, hash))
    }

    /// Hash of the block at `height` on the best chain.
    async fn block_hash(&self, height: u64) -> Result<BlockHash, GatewayError>;

    /// Header summary for a block.
    async fn block_header(&self, hash: &BlockHash) -> Result<BlockHeaderInfo, GatewayError>;

    /// The node wallet's unspent outputs.
    async fn list_unspent(&self) -> Result<Vec<UnspentOutput>, GatewayError>;

    /// WIF-encoded private key for an address the node wallet owns.
    async fn dump_private_key(&self, address: &Address) -> Result<String, GatewayError>;

    /// Fee oracle answer in ZEN per kilobyte for a confirmation target.
    /// Non-positive values mean the oracle has no estimate.
    async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, GatewayError>;

    /// Sign a transaction with keys held by the node wallet.
    async fn sign_raw_transaction(&self, tx: &Transaction) -> Result<SignedTransaction, GatewayError>;

    /// Broadcast a signed transaction.
    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, GatewayError>;

    /// Look up a wallet transaction.
    async fn get_transaction(
        &self,
        txid: &Txid,
        include_watch_only: bool,
    ) -> Result<WalletTransaction, GatewayError>;

    /// All wallet transactions.
    async fn list_transactions(&self) -> Result<Vec<WalletTransaction>, GatewayError>;

    /// Start watching an address without its key.
    async fn import_address(&self, address: &Address) -> Result<(), GatewayError>;

    /// The default account's current receiving address.
    async fn account_address(&self) -> Result<String, GatewayError>;

    /// A freshly generated receiving address.
    async fn new_address(&self) -> Result<String, GatewayError>;

    async fn wallet_balance(&self) -> Result<BalanceInfo, GatewayError>;

    /// Trigger a wallet rescan starting at `height`.
    async fn rescan_from(&self, height: u64) -> Result<(), GatewayError>;

    /// Ask the node process to shut down.
    async fn stop(&self) -> Result<(), GatewayError>;
}
