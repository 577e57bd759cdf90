//! Scripted in-memory node used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, ScriptBuf, Transaction, Txid};
use parking_lot::Mutex;

use zen_core::address::Address;
use zen_core::error::GatewayError;
use zen_core::traits::{
    BalanceInfo, BlockHeaderInfo, NodeGateway, SignedTransaction, UnspentOutput, WalletTransaction,
};

/// Deterministic hash for the block at `height`.
pub fn block_hash_at(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[31] = 0x5a;
    BlockHash::from_byte_array(bytes)
}

#[derive(Default)]
struct State {
    height: u64,
    unspent: Vec<UnspentOutput>,
    keys: HashMap<String, String>,
    fee_estimates: HashMap<u32, Result<f64, GatewayError>>,
    transactions: HashMap<String, WalletTransaction>,
    imported: Vec<String>,
    broadcasts: Vec<Transaction>,
    signed_by_node: usize,
    account_address: String,
    new_addresses: Vec<String>,
    balance: BalanceInfo,
    rescans: Vec<u64>,
    block_time_step: i64,
    stopped: bool,
    offline_polls: u64,
    key_export_down: bool,
}

pub struct MockGateway {
    state: Mutex<State>,
    polls: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        let state = State { height: 1_000, block_time_step: 150, ..Default::default() };
        Self { state: Mutex::new(state), polls: AtomicU64::new(0) }
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().height = height;
    }

    pub fn set_fee_estimate(&self, target: u32, reply: Result<f64, GatewayError>) {
        self.state.lock().fee_estimates.insert(target, reply);
    }

    pub fn add_unspent(&self, utxo: UnspentOutput, wif: Option<&str>) {
        let mut state = self.state.lock();
        if let (Some(address), Some(wif)) = (utxo.address.clone(), wif) {
            state.keys.insert(address, wif.to_string());
        }
        state.unspent.push(utxo);
    }

    pub fn add_key(&self, address: &str, wif: &str) {
        self.state.lock().keys.insert(address.to_string(), wif.to_string());
    }

    pub fn add_transaction(&self, tx: WalletTransaction) {
        self.state.lock().transactions.insert(tx.txid.clone(), tx);
    }

    pub fn set_account_address(&self, address: &str) {
        self.state.lock().account_address = address.to_string();
    }

    pub fn push_new_address(&self, address: &str) {
        self.state.lock().new_addresses.push(address.to_string());
    }

    pub fn set_balance(&self, balance: f64, unconfirmed: f64) {
        self.state.lock().balance = BalanceInfo { balance, unconfirmed_balance: unconfirmed };
    }

    /// Fail the first `n` `block_count` polls as if the node were still starting.
    pub fn set_offline_polls(&self, n: u64) {
        self.state.lock().offline_polls = n;
    }

    /// Make `dumpprivkey` fail at the transport level.
    pub fn set_key_export_down(&self, down: bool) {
        self.state.lock().key_export_down = down;
    }

    pub fn imported(&self) -> Vec<String> {
        self.state.lock().imported.clone()
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().broadcasts.clone()
    }

    pub fn signed_by_node(&self) -> usize {
        self.state.lock().signed_by_node
    }

    pub fn rescans(&self) -> Vec<u64> {
        self.state.lock().rescans.clone()
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Header timestamp for `height`.
    pub fn time_at(&self, height: u64) -> i64 {
        1_500_000_000 + height as i64 * self.state.lock().block_time_step
    }

    fn height_of(&self, hash: &BlockHash) -> Result<u64, GatewayError> {
        let bytes = hash.to_byte_array();
        if bytes[31] != 0x5a {
            return Err(GatewayError::Rpc { code: -5, message: "Block not found".into() });
        }
        let mut h = [0u8; 8];
        h.copy_from_slice(&bytes[..8]);
        Ok(u64::from_le_bytes(h))
    }
}

#[async_trait]
impl NodeGateway for MockGateway {
    async fn block_count(&self) -> Result<u64, GatewayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.offline_polls > 0 {
            state.offline_polls -= 1;
            return Err(GatewayError::Unavailable("connection refused".into()));
        }
        Ok(state.height)
    }

    async fn best_block_hash(&self) -> Result<BlockHash, GatewayError> {
        Ok(block_hash_at(self.state.lock().height))
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, GatewayError> {
        if height > self.state.lock().height {
            return Err(GatewayError::Rpc { code: -8, message: "Block height out of range".into() });
        }
        Ok(block_hash_at(height))
    }

    async fn block_header(&self, hash: &BlockHash) -> Result<BlockHeaderInfo, GatewayError> {
        let height = self.height_of(hash)?;
        Ok(BlockHeaderInfo {
            hash: hash.to_string(),
            height,
            time: self.time_at(height),
            previous_block_hash: height.checked_sub(1).map(|h| block_hash_at(h).to_string()),
        })
    }

    async fn list_unspent(&self) -> Result<Vec<UnspentOutput>, GatewayError> {
        Ok(self.state.lock().unspent.clone())
    }

    async fn dump_private_key(&self, address: &Address) -> Result<String, GatewayError> {
        let state = self.state.lock();
        if state.key_export_down {
            return Err(GatewayError::Unavailable("connection reset".into()));
        }
        state
            .keys
            .get(&address.to_string())
            .cloned()
            .ok_or(GatewayError::Rpc { code: -4, message: "Private key not available".into() })
    }

    async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, GatewayError> {
        self.state.lock().fee_estimates.get(&target_blocks).cloned().unwrap_or(Ok(-1.0))
    }

    async fn sign_raw_transaction(&self, tx: &Transaction) -> Result<SignedTransaction, GatewayError> {
        let mut state = self.state.lock();
        state.signed_by_node += 1;
        let mut signed = tx.clone();
        for input in &mut signed.input {
            input.script_sig = ScriptBuf::from_bytes(vec![0x51]);
        }
        Ok(SignedTransaction { transaction: signed, complete: true })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, GatewayError> {
        self.state.lock().broadcasts.push(tx.clone());
        Ok(tx.compute_txid())
    }

    async fn get_transaction(&self, txid: &Txid, _include_watch_only: bool) -> Result<WalletTransaction, GatewayError> {
        self.state
            .lock()
            .transactions
            .get(&txid.to_string())
            .cloned()
            .ok_or(GatewayError::Rpc { code: -5, message: "Invalid or non-wallet transaction id".into() })
    }

    async fn list_transactions(&self) -> Result<Vec<WalletTransaction>, GatewayError> {
        let mut txs: Vec<_> = self.state.lock().transactions.values().cloned().collect();
        txs.sort_by(|a, b| a.txid.cmp(&b.txid));
        Ok(txs)
    }

    async fn import_address(&self, address: &Address) -> Result<(), GatewayError> {
        self.state.lock().imported.push(address.to_string());
        Ok(())
    }

    async fn account_address(&self) -> Result<String, GatewayError> {
        Ok(self.state.lock().account_address.clone())
    }

    async fn new_address(&self) -> Result<String, GatewayError> {
        let mut state = self.state.lock();
        if state.new_addresses.is_empty() {
            return Ok(state.account_address.clone());
        }
        Ok(state.new_addresses.remove(0))
    }

    async fn wallet_balance(&self) -> Result<BalanceInfo, GatewayError> {
        Ok(self.state.lock().balance.clone())
    }

    async fn rescan_from(&self, height: u64) -> Result<(), GatewayError> {
        self.state.lock().rescans.push(height);
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.state.lock().stopped = true;
        Ok(())
    }
}
