//! [`NodeGateway`] over zend's JSON-RPC interface.

use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::consensus::encode::{deserialize, serialize_hex};
use bitcoin::{BlockHash, Transaction, Txid};
use serde::Deserialize;
use serde_json::json;

use zen_core::address::Address;
use zen_core::error::GatewayError;
use zen_core::traits::{
    BalanceInfo, BlockHeaderInfo, NodeGateway, SignedTransaction, UnspentOutput, WalletTransaction,
};

use crate::client::RpcClient;

/// Shielded key imported to make zend rescan from a height; it owns nothing.
const RESCAN_TRIGGER_KEY: &str = "SKxuMmhzeBuEYnZo6Hn6NsHpYoD3uniJWYSn6PtNomod1HQ93eoo";

/// Upper bound on entries asked of `listtransactions`.
const LIST_TRANSACTIONS_COUNT: u32 = 100_000;

#[derive(Deserialize)]
struct SignReply {
    hex: String,
    complete: bool,
}

fn malformed(what: &str, e: impl std::fmt::Display) -> GatewayError {
    GatewayError::MalformedResponse(format!("{what}: {e}"))
}

fn decode_transaction(hex_str: &str) -> Result<Transaction, GatewayError> {
    let bytes = hex::decode(hex_str).map_err(|e| malformed("transaction hex", e))?;
    deserialize(&bytes).map_err(|e| malformed("transaction", e))
}

#[async_trait]
impl NodeGateway for RpcClient {
    async fn block_count(&self) -> Result<u64, GatewayError> {
        self.call("getblockcount", json!([])).await
    }

    async fn best_block_hash(&self) -> Result<BlockHash, GatewayError> {
        let s: String = self.call("getbestblockhash", json!([])).await?;
        BlockHash::from_str(&s).map_err(|e| malformed("block hash", e))
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, GatewayError> {
        let s: String = self.call("getblockhash", json!([height])).await?;
        BlockHash::from_str(&s).map_err(|e| malformed("block hash", e))
    }

    async fn block_header(&self, hash: &BlockHash) -> Result<BlockHeaderInfo, GatewayError> {
        self.call("getblockheader", json!([hash.to_string()])).await
    }

    async fn list_unspent(&self) -> Result<Vec<UnspentOutput>, GatewayError> {
        self.call("listunspent", json!([])).await
    }

    async fn dump_private_key(&self, address: &Address) -> Result<String, GatewayError> {
        self.call("dumpprivkey", json!([address.to_string()])).await
    }

    async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, GatewayError> {
        self.call("estimatefee", json!([target_blocks])).await
    }

    async fn sign_raw_transaction(&self, tx: &Transaction) -> Result<SignedTransaction, GatewayError> {
        let reply: SignReply = self.call("signrawtransaction", json!([serialize_hex(tx)])).await?;
        Ok(SignedTransaction { transaction: decode_transaction(&reply.hex)?, complete: reply.complete })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, GatewayError> {
        let s: String = self.call("sendrawtransaction", json!([serialize_hex(tx), false])).await?;
        Txid::from_str(&s).map_err(|e| malformed("txid", e))
    }

    async fn get_transaction(
        &self,
        txid: &Txid,
        include_watch_only: bool,
    ) -> Result<WalletTransaction, GatewayError> {
        self.call("gettransaction", json!([txid.to_string(), include_watch_only])).await
    }

    async fn list_transactions(&self) -> Result<Vec<WalletTransaction>, GatewayError> {
        self.call("listtransactions", json!(["*", LIST_TRANSACTIONS_COUNT, 0, true])).await
    }

    async fn import_address(&self, address: &Address) -> Result<(), GatewayError> {
        self.call("importaddress", json!([address.to_string(), "", false])).await
    }

    async fn account_address(&self) -> Result<String, GatewayError> {
        self.call("getaccountaddress", json!([""])).await
    }

    async fn new_address(&self) -> Result<String, GatewayError> {
        self.call("getnewaddress", json!([""])).await
    }

    async fn wallet_balance(&self) -> Result<BalanceInfo, GatewayError> {
        self.call("getwalletinfo", json!([])).await
    }

    async fn rescan_from(&self, height: u64) -> Result<(), GatewayError> {
        let _: serde_json::Value = self.call("z_importkey", json!([RESCAN_TRIGGER_KEY, "yes", height])).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        let _: serde_json::Value = self.call("stop", json!([])).await?;
        Ok(())
    }
}
