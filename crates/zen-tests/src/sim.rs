//! An in-memory node that behaves like a small zend wallet.
//!
//! It keeps a real UTXO set: broadcasts must spend known outputs, spent
//! outputs disappear, outputs paying wallet addresses show up unconfirmed
//! and gain confirmations as blocks are mined. `signrawtransaction` signs
//! with the wallet keys for real.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{BlockHash, NetworkKind, OutPoint, PrivateKey, ScriptBuf, Transaction, Txid};
use parking_lot::Mutex;

use zen_core::address::{Address, Network};
use zen_core::constants::COIN;
use zen_core::error::GatewayError;
use zen_core::script::ReplayProtection;
use zen_core::traits::{
    BalanceInfo, BlockHeaderInfo, NodeGateway, SignedTransaction, UnspentOutput, WalletTransaction,
};
use zen_wallet::keys::SigningKey;
use zen_wallet::signing;

const GENESIS_TIME: i64 = 1_478_403_829;
const BLOCK_INTERVAL: i64 = 150;

/// Deterministic hash of the block at `height`.
pub fn block_hash_at(height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_le_bytes());
    bytes[24..].copy_from_slice(b"simchain");
    BlockHash::from_byte_array(bytes)
}

fn height_of(hash: &BlockHash) -> Option<u64> {
    let bytes = hash.to_byte_array();
    if &bytes[24..] != b"simchain" {
        return None;
    }
    let mut h = [0u8; 8];
    h.copy_from_slice(&bytes[..8]);
    Some(u64::from_le_bytes(h))
}

pub fn block_time(height: u64) -> i64 {
    GENESIS_TIME + height as i64 * BLOCK_INTERVAL
}

fn zat_to_zen(zat: i64) -> f64 {
    zat as f64 / COIN as f64
}

fn not_found(message: &str) -> GatewayError {
    GatewayError::Rpc { code: -5, message: message.to_string() }
}

#[derive(Clone, Debug)]
struct SimCoin {
    value: u64,
    script: ScriptBuf,
    address: Address,
    /// Block that confirmed it, `None` while in the mempool.
    mined_at: Option<u64>,
}

#[derive(Clone, Debug)]
struct SimTx {
    /// Net value to the wallet in zatoshi.
    net: i64,
    mined_at: Option<u64>,
    received: i64,
}

struct SimState {
    network: Network,
    height: u64,
    /// Address string to WIF, in creation order.
    keys: Vec<(String, String)>,
    key_counter: u8,
    watched: Vec<String>,
    coins: BTreeMap<OutPoint, SimCoin>,
    txs: HashMap<Txid, SimTx>,
    broadcasts: Vec<Transaction>,
    fee_per_kb: Option<f64>,
    rescans: Vec<u64>,
    stopped: bool,
    node_sign_calls: usize,
}

pub struct SimNode {
    state: Mutex<SimState>,
}

impl SimNode {
    pub fn new(network: Network, height: u64) -> Self {
        let node = Self {
            state: Mutex::new(SimState {
                network,
                height,
                keys: Vec::new(),
                key_counter: 0,
                watched: Vec::new(),
                coins: BTreeMap::new(),
                txs: HashMap::new(),
                broadcasts: Vec::new(),
                fee_per_kb: None,
                rescans: Vec::new(),
                stopped: false,
                node_sign_calls: 0,
            }),
        };
        // The default account address.
        node.generate_key();
        node
    }

    fn generate_key(&self) -> Address {
        let mut state = self.state.lock();
        state.key_counter += 1;
        let seed = [state.key_counter; 32];
        let key = PrivateKey::from_slice(&seed, NetworkKind::Test).expect("valid test scalar");
        let address = Address::p2pkh(&key.public_key(&Secp256k1::new()), state.network);
        state.keys.push((address.to_string(), key.to_wif()));
        address
    }

    /// Replay reference used for outputs the node creates itself.
    fn replay(height: u64) -> ReplayProtection {
        let at = height.saturating_sub(300);
        ReplayProtection::new(block_hash_at(at), at)
    }

    /// Credit `value` zatoshi to a fresh wallet address, confirmed
    /// `confirmations` times. Returns the funding outpoint.
    pub fn fund(&self, value: u64, confirmations: u64) -> OutPoint {
        let address = self.generate_key();
        self.fund_address(&address, value, confirmations)
    }

    /// Credit `value` zatoshi to `address` from outside the wallet.
    pub fn fund_address(&self, address: &Address, value: u64, confirmations: u64) -> OutPoint {
        let mut state = self.state.lock();
        let n = state.coins.len() as u64 + state.txs.len() as u64;
        let mut txid = [0xf0u8; 32];
        txid[..8].copy_from_slice(&n.to_le_bytes());
        let outpoint = OutPoint::new(Txid::from_byte_array(txid), 0);
        let mined_at = (confirmations > 0).then(|| state.height + 1 - confirmations);
        let script = address.script_pubkey(&Self::replay(state.height));
        let net = if Self::owns(&state, address) { value as i64 } else { 0 };
        let received = block_time(state.height);
        state.coins.insert(outpoint, SimCoin { value, script, address: *address, mined_at });
        state.txs.insert(outpoint.txid, SimTx { net, mined_at, received });
        outpoint
    }

    pub fn mine(&self, blocks: u64) {
        let mut state = self.state.lock();
        let next = state.height + 1;
        for coin in state.coins.values_mut() {
            coin.mined_at.get_or_insert(next);
        }
        for tx in state.txs.values_mut() {
            tx.mined_at.get_or_insert(next);
        }
        state.height += blocks;
    }

    pub fn set_fee_estimate(&self, zen_per_kb: Option<f64>) {
        self.state.lock().fee_per_kb = zen_per_kb;
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().broadcasts.clone()
    }

    pub fn watched(&self) -> Vec<String> {
        self.state.lock().watched.clone()
    }

    pub fn rescans(&self) -> Vec<u64> {
        self.state.lock().rescans.clone()
    }

    pub fn node_sign_calls(&self) -> usize {
        self.state.lock().node_sign_calls
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    /// Previous output script of a coin still in the UTXO set.
    pub fn coin_script(&self, outpoint: &OutPoint) -> Option<ScriptBuf> {
        self.state.lock().coins.get(outpoint).map(|c| c.script.clone())
    }

    /// Sum of unspent wallet coins.
    pub fn wallet_value(&self) -> u64 {
        let state = self.state.lock();
        state.coins.values().filter(|c| Self::owns(&state, &c.address)).map(|c| c.value).sum()
    }

    fn owns(state: &SimState, address: &Address) -> bool {
        let s = address.to_string();
        state.keys.iter().any(|(a, _)| *a == s)
    }

    fn wif_for(state: &SimState, address: &str) -> Option<String> {
        state.keys.iter().find(|(a, _)| a == address).map(|(_, w)| w.clone())
    }

    fn confirmations(state: &SimState, mined_at: Option<u64>) -> u64 {
        mined_at.map_or(0, |h| state.height.saturating_sub(h) + 1)
    }

    fn wallet_tx(state: &SimState, txid: &Txid, tx: &SimTx) -> WalletTransaction {
        WalletTransaction {
            txid: txid.to_string(),
            amount: zat_to_zen(tx.net),
            confirmations: Self::confirmations(state, tx.mined_at) as i64,
            block_hash: tx.mined_at.map(|h| block_hash_at(h).to_string()),
            block_index: tx.mined_at.map(|_| 1),
            time_received: tx.received,
        }
    }
}

#[async_trait]
impl NodeGateway for SimNode {
    async fn block_count(&self) -> Result<u64, GatewayError> {
        Ok(self.state.lock().height)
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
        let height = height_of(hash).ok_or_else(|| not_found("Block not found"))?;
        Ok(BlockHeaderInfo {
            hash: hash.to_string(),
            height,
            time: block_time(height),
            previous_block_hash: height.checked_sub(1).map(|h| block_hash_at(h).to_string()),
        })
    }

    async fn list_unspent(&self) -> Result<Vec<UnspentOutput>, GatewayError> {
        let state = self.state.lock();
        Ok(state
            .coins
            .iter()
            .map(|(outpoint, coin)| UnspentOutput {
                txid: outpoint.txid.to_string(),
                vout: outpoint.vout,
                address: Some(coin.address.to_string()),
                script_pub_key: hex::encode(coin.script.as_bytes()),
                amount: zat_to_zen(coin.value as i64),
                confirmations: Self::confirmations(&state, coin.mined_at) as u32,
                spendable: Self::owns(&state, &coin.address),
            })
            .collect())
    }

    async fn dump_private_key(&self, address: &Address) -> Result<String, GatewayError> {
        let state = self.state.lock();
        Self::wif_for(&state, &address.to_string())
            .ok_or(GatewayError::Rpc { code: -4, message: "Private key for address is not known".into() })
    }

    async fn estimate_fee(&self, _target_blocks: u32) -> Result<f64, GatewayError> {
        Ok(self.state.lock().fee_per_kb.unwrap_or(-1.0))
    }

    async fn sign_raw_transaction(&self, tx: &Transaction) -> Result<SignedTransaction, GatewayError> {
        let mut state = self.state.lock();
        state.node_sign_calls += 1;
        let mut signed = tx.clone();
        let mut complete = true;
        for index in 0..signed.input.len() {
            let outpoint = signed.input[index].previous_output;
            let Some(coin) = state.coins.get(&outpoint) else {
                complete = false;
                continue;
            };
            let Some(wif) = Self::wif_for(&state, &coin.address.to_string()) else {
                complete = false;
                continue;
            };
            let key = SigningKey::from_wif(&wif).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
            let script = coin.script.clone();
            signing::sign_p2pkh(&mut signed, index, &script, &key)
                .map_err(|e| GatewayError::Rpc { code: -22, message: e.to_string() })?;
        }
        Ok(SignedTransaction { transaction: signed, complete })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, GatewayError> {
        let mut state = self.state.lock();
        let txid = tx.compute_txid();
        let mut spent_value: i64 = 0;
        for input in &tx.input {
            let coin = state
                .coins
                .get(&input.previous_output)
                .ok_or(GatewayError::Rpc { code: -25, message: "Missing inputs".into() })?;
            if input.script_sig.is_empty() {
                return Err(GatewayError::Rpc { code: -26, message: "mandatory-script-verify-flag-failed".into() });
            }
            if Self::owns(&state, &coin.address) {
                spent_value += coin.value as i64;
            }
        }
        for input in &tx.input {
            state.coins.remove(&input.previous_output);
        }

        let mut received: i64 = 0;
        for (vout, out) in tx.output.iter().enumerate() {
            let Ok(address) = Address::from_script(&out.script_pubkey, state.network) else {
                continue;
            };
            let tracked = Self::owns(&state, &address) || state.watched.contains(&address.to_string());
            if !tracked {
                continue;
            }
            if Self::owns(&state, &address) {
                received += out.value.to_sat() as i64;
            }
            state.coins.insert(
                OutPoint::new(txid, vout as u32),
                SimCoin { value: out.value.to_sat(), script: out.script_pubkey.clone(), address, mined_at: None },
            );
        }
        let now = block_time(state.height);
        state.txs.insert(txid, SimTx { net: received - spent_value, mined_at: None, received: now });
        state.broadcasts.push(tx.clone());
        Ok(txid)
    }

    async fn get_transaction(&self, txid: &Txid, _include_watch_only: bool) -> Result<WalletTransaction, GatewayError> {
        let state = self.state.lock();
        let tx = state.txs.get(txid).ok_or_else(|| not_found("Invalid or non-wallet transaction id"))?;
        Ok(Self::wallet_tx(&state, txid, tx))
    }

    async fn list_transactions(&self) -> Result<Vec<WalletTransaction>, GatewayError> {
        let state = self.state.lock();
        let mut txs: Vec<_> = state.txs.iter().map(|(id, tx)| Self::wallet_tx(&state, id, tx)).collect();
        txs.sort_by_key(|t| t.time_received);
        Ok(txs)
    }

    async fn import_address(&self, address: &Address) -> Result<(), GatewayError> {
        self.state.lock().watched.push(address.to_string());
        Ok(())
    }

    async fn account_address(&self) -> Result<String, GatewayError> {
        let state = self.state.lock();
        state.keys.first().map(|(a, _)| a.clone()).ok_or_else(|| not_found("no keys"))
    }

    async fn new_address(&self) -> Result<String, GatewayError> {
        Ok(self.generate_key().to_string())
    }

    async fn wallet_balance(&self) -> Result<BalanceInfo, GatewayError> {
        let state = self.state.lock();
        let (mut confirmed, mut unconfirmed) = (0i64, 0i64);
        for coin in state.coins.values().filter(|c| Self::owns(&state, &c.address)) {
            match coin.mined_at {
                Some(_) => confirmed += coin.value as i64,
                None => unconfirmed += coin.value as i64,
            }
        }
        Ok(BalanceInfo { balance: zat_to_zen(confirmed), unconfirmed_balance: zat_to_zen(unconfirmed) })
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
