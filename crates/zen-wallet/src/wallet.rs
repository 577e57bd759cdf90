//! The wallet engine: a node-backed facade over keys, coin selection,
//! transaction building, signing and the multisig protocol.
//!
//! Chain-dependent operations suspend on the [`InitGate`] until the node
//! handshake completes. Pure multisig operations do not.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::consensus::encode::serialize;
use bitcoin::{Amount, BlockHash, OutPoint, PublicKey, Script, ScriptBuf, Transaction, TxOut, Txid};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zen_core::address::{Address, Network};
use zen_core::error::GatewayError;
use zen_core::script::{classify, parse_multisig, ReplayProtection, ScriptKind};
use zen_core::traits::{NodeGateway, WalletTransaction};
use zen_core::txsize::{self, InputKind, P2PKH_PK_SCRIPT_SIZE};
use zen_core::types::{zen_to_zat, Coin, FeeLevel, FeeRate, TransactionInput, TransactionOutput};

use crate::builder::{skeleton, TransactionBuilder, UnsignedTransaction};
use crate::coin_selection::{CoinSelector, MaxValueAgeSelector};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::fees::{self, FeeEstimator};
use crate::gate::InitGate;
use crate::gather::{self, SigningKeyBinding};
use crate::keys::{MasterKeys, SigningKey};
use crate::multisig::{self, MultisigScript, PartialSignature};
use crate::ordering;
use crate::signing;

/// Which side of the wallet an address is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Receiving addresses handed to payers.
    External,
    /// Change addresses.
    Internal,
}

/// Callback invoked with the txid of every transaction the engine broadcasts.
pub type TransactionListener = Arc<dyn Fn(&Txid) + Send + Sync>;

/// Confirmed and unconfirmed balance in zatoshi.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// A wallet transaction summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnRecord {
    pub txid: Txid,
    /// Net value to the wallet in zatoshi.
    pub value: i64,
    /// Containing block height, 0 while unconfirmed.
    pub height: u64,
    pub timestamp: DateTime<Utc>,
}

/// Confirmation status of a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Confirmations {
    pub confirmations: u32,
    /// Containing block height, 0 while unconfirmed.
    pub height: u64,
}

/// Node-backed ZEN wallet engine.
pub struct ZenWallet {
    config: WalletConfig,
    gateway: Arc<dyn NodeGateway>,
    gate: InitGate,
    fees: FeeEstimator,
    selector: MaxValueAgeSelector,
    master: MasterKeys,
    listeners: RwLock<Vec<TransactionListener>>,
}

impl ZenWallet {
    pub fn new(config: WalletConfig, gateway: Arc<dyn NodeGateway>, master: MasterKeys) -> Self {
        let fees = FeeEstimator::new(Arc::clone(&gateway), config.default_fee_rate(), config.use_fee_oracle);
        Self {
            config,
            gateway,
            gate: InitGate::new(),
            fees,
            selector: MaxValueAgeSelector::default(),
            master,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Engine whose master keys come from a BIP39 mnemonic.
    pub fn from_mnemonic(
        phrase: &str,
        config: WalletConfig,
        gateway: Arc<dyn NodeGateway>,
    ) -> Result<Self, WalletError> {
        let master = MasterKeys::from_mnemonic(phrase, config.network)?;
        Ok(Self::new(config, gateway, master))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn the bootstrap task. See [`bootstrap`](Self::bootstrap).
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<(), WalletError>> {
        let wallet = Arc::clone(self);
        tokio::spawn(async move { wallet.bootstrap().await })
    }

    /// Poll the node until it answers, then open the gate and register any
    /// addresses queued while it was closed.
    ///
    /// Fails with [`WalletError::StartupTimeout`] if the node stays silent
    /// for the configured startup window.
    pub async fn bootstrap(&self) -> Result<(), WalletError> {
        let timeout = self.config.startup_timeout();
        let interval = self.config.poll_interval();
        let height = tokio::time::timeout(timeout, async {
            loop {
                match self.gateway.block_count().await {
                    Ok(height) => break height,
                    Err(e) => {
                        debug!(error = %e, "node not ready");
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        })
        .await
        .map_err(|_| WalletError::StartupTimeout(timeout.as_secs()))?;
        info!(height, network = %self.config.network, "connected to node");

        let queued = self.gate.open();
        if !queued.is_empty() {
            info!(count = queued.len(), "registering queued watch addresses");
        }
        for address in queued {
            if let Err(e) = self.gateway.import_address(&address).await {
                warn!(%address, error = %e, "failed to register queued watch address");
            }
        }
        Ok(())
    }

    /// Whether the node handshake has completed.
    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    /// Ask the node to shut down.
    pub async fn close(&self) -> Result<(), WalletError> {
        info!("stopping node");
        self.gateway.stop().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Keys and addresses
    // ------------------------------------------------------------------

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn currency_code(&self) -> &'static str {
        self.config.network.currency_code()
    }

    pub fn master_keys(&self) -> &MasterKeys {
        &self.master
    }

    /// Whether `amount` would be a dust output to a P2PKH address.
    pub fn is_dust(&self, amount: u64) -> bool {
        txsize::is_dust(amount, P2PKH_PK_SCRIPT_SIZE, self.config.relay_fee_per_kb)
    }

    pub fn decode_address(&self, s: &str) -> Result<Address, WalletError> {
        Ok(Address::decode(s, self.config.network)?)
    }

    pub fn script_to_address(&self, script: &Script) -> Result<Address, WalletError> {
        Ok(Address::from_script(script, self.config.network)?)
    }

    fn check_network(&self, address: &Address) -> Result<Address, WalletError> {
        self.decode_address(&address.encode())
    }

    /// Replay-protected output script for `address`.
    pub async fn address_to_script(&self, address: &Address) -> Result<ScriptBuf, WalletError> {
        let replay = self.replay_reference().await?;
        Ok(address.script_pubkey(&replay))
    }

    pub async fn current_address(&self, purpose: KeyPurpose) -> Result<Address, WalletError> {
        self.gate.wait().await;
        let s = self.gateway.account_address().await?;
        debug!(?purpose, address = %s, "current address");
        self.node_address(&s)
    }

    pub async fn new_address(&self, purpose: KeyPurpose) -> Result<Address, WalletError> {
        self.gate.wait().await;
        let s = self.gateway.new_address().await?;
        debug!(?purpose, address = %s, "new address");
        self.node_address(&s)
    }

    fn node_address(&self, s: &str) -> Result<Address, WalletError> {
        Address::decode(s, self.config.network)
            .map_err(|e| WalletError::MalformedNodeResponse(format!("address {s}: {e}")))
    }

    /// Whether the node can export the key for `address`.
    ///
    /// Any RPC-level refusal means no key. Transport and decoding failures
    /// are errors, not a negative answer.
    pub async fn has_key(&self, address: &Address) -> Result<bool, WalletError> {
        self.gate.wait().await;
        match self.gateway.dump_private_key(address).await {
            Ok(_) => Ok(true),
            Err(GatewayError::Rpc { code, message }) => {
                debug!(%address, code, %message, "node holds no key");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Chain queries
    // ------------------------------------------------------------------

    pub async fn chain_tip(&self) -> Result<(u64, BlockHash), WalletError> {
        self.gate.wait().await;
        Ok(self.gateway.chain_tip().await?)
    }

    /// Block reference for new scripts: `replay_depth` blocks below the tip.
    pub async fn replay_reference(&self) -> Result<ReplayProtection, WalletError> {
        let (tip, _) = self.chain_tip().await?;
        let height = tip.saturating_sub(self.config.replay_depth);
        let hash = self.gateway.block_hash(height).await?;
        Ok(ReplayProtection::new(hash, height))
    }

    pub async fn block_height(&self, hash: &BlockHash) -> Result<u64, WalletError> {
        self.gate.wait().await;
        Ok(self.gateway.block_header(hash).await?.height)
    }

    /// Height of the newest block mined before `ts`, walking back from the
    /// tip. Stops at height 1.
    pub async fn find_height_before_time(&self, ts: DateTime<Utc>) -> Result<u64, WalletError> {
        self.gate.wait().await;
        let cutoff = ts.timestamp();
        let mut hash = self.gateway.best_block_hash().await?;
        loop {
            let header = self.gateway.block_header(&hash).await?;
            if header.time < cutoff || header.height <= 1 {
                return Ok(header.height);
            }
            let Some(prev) = header.previous_block_hash else {
                return Ok(header.height);
            };
            hash = parse_hash(&prev)?;
        }
    }

    pub async fn balance(&self) -> Result<Balance, WalletError> {
        self.gate.wait().await;
        let info = self.gateway.wallet_balance().await?;
        Ok(Balance {
            confirmed: zen_to_zat(info.balance),
            unconfirmed: zen_to_zat(info.unconfirmed_balance),
        })
    }

    pub async fn transactions(&self) -> Result<Vec<TxnRecord>, WalletError> {
        self.gate.wait().await;
        let mut records = Vec::new();
        for tx in self.gateway.list_transactions().await? {
            records.push(self.txn_record(&tx).await?);
        }
        Ok(records)
    }

    pub async fn get_transaction(&self, txid: &Txid) -> Result<TxnRecord, WalletError> {
        self.gate.wait().await;
        let tx = self.gateway.get_transaction(txid, false).await?;
        self.txn_record(&tx).await
    }

    pub async fn confirmations(&self, txid: &Txid) -> Result<Confirmations, WalletError> {
        self.gate.wait().await;
        let tx = self.gateway.get_transaction(txid, true).await?;
        let record = self.txn_record(&tx).await?;
        Ok(Confirmations { confirmations: tx.confirmations.max(0) as u32, height: record.height })
    }

    async fn txn_record(&self, tx: &WalletTransaction) -> Result<TxnRecord, WalletError> {
        let txid = Txid::from_str(&tx.txid)
            .map_err(|e| WalletError::MalformedNodeResponse(format!("txid {}: {e}", tx.txid)))?;
        let height = match (&tx.block_hash, tx.confirmations > 0) {
            (Some(hash), true) => self.gateway.block_header(&parse_hash(hash)?).await?.height,
            _ => 0,
        };
        let timestamp = Utc
            .timestamp_opt(tx.time_received, 0)
            .single()
            .ok_or_else(|| WalletError::MalformedNodeResponse(format!("timestamp {}", tx.time_received)))?;
        Ok(TxnRecord { txid, value: zen_to_zat(tx.amount), height, timestamp })
    }

    /// Trigger a node rescan from the last block before `from`.
    pub async fn resync_from_date(&self, from: DateTime<Utc>) -> Result<u64, WalletError> {
        let height = self.find_height_before_time(from).await?;
        info!(height, from = %from, "rescanning wallet");
        self.gateway.rescan_from(height).await?;
        Ok(height)
    }

    // ------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------

    /// Track the address an output script pays to.
    ///
    /// Before the node is ready the request is queued and registered when
    /// the gate opens; afterwards it is registered immediately.
    pub async fn add_watched_script(&self, script: &Script) -> Result<(), WalletError> {
        let address = self.script_to_address(script)?;
        if let Some(address) = self.gate.queue_watch(address) {
            debug!(%address, "watching address");
            self.gateway.import_address(&address).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fees
    // ------------------------------------------------------------------

    pub async fn fee_rate(&self, level: FeeLevel) -> FeeRate {
        self.gate.wait().await;
        self.fees.rate(level).await
    }

    /// Whole zatoshi per byte for `level`, rounded down.
    pub async fn fee_per_byte(&self, level: FeeLevel) -> u64 {
        self.fee_rate(level).await.per_byte()
    }

    /// Fee for spending `input_count` P2PKH inputs to `outputs` at `rate`.
    pub fn estimate_fee(&self, input_count: usize, outputs: &[TransactionOutput], rate: FeeRate) -> u64 {
        fees::estimate_fee(input_count, &to_txouts(outputs), rate, InputKind::P2pkh)
    }

    /// Fee a spend of `amount` at `level` would pay right now.
    pub async fn estimate_spend_fee(&self, amount: u64, level: FeeLevel) -> Result<u64, WalletError> {
        self.gate.wait().await;
        // Any P2PKH destination has the same script size.
        let placeholder = Address::from_pubkey_hash([0; 20], self.config.network);
        let coins = gather::spendable_coins(self.gateway.as_ref(), self.config.network).await?;
        let unsigned = self.build_unsigned_spend(amount, &placeholder, level, &coins).await?;
        Ok(unsigned.fee())
    }

    // ------------------------------------------------------------------
    // Spending
    // ------------------------------------------------------------------

    /// Pay `amount` zatoshi to `address` and broadcast.
    pub async fn spend(&self, amount: u64, address: &Address, level: FeeLevel) -> Result<Txid, WalletError> {
        self.gate.wait().await;
        let address = self.check_network(address)?;
        let tx = if self.config.sign_with_node {
            let coins = gather::spendable_coins(self.gateway.as_ref(), self.config.network).await?;
            let unsigned = self.build_unsigned_spend(amount, &address, level, &coins).await?;
            self.sign_with_node(unsigned.tx).await?
        } else {
            let bindings = gather::gather_coins(self.gateway.as_ref(), self.config.network).await?;
            let coins: Vec<Coin> = bindings.iter().map(|b| b.coin.clone()).collect();
            let unsigned = self.build_unsigned_spend(amount, &address, level, &coins).await?;
            sign_locally(unsigned, &bindings)?
        };
        self.broadcast(&tx).await
    }

    async fn build_unsigned_spend(
        &self,
        amount: u64,
        address: &Address,
        level: FeeLevel,
        coins: &[Coin],
    ) -> Result<UnsignedTransaction, WalletError> {
        let replay = self.replay_reference().await?;
        let script_pubkey = address.script_pubkey(&replay);
        let rate = self.fees.rate(level).await;
        debug!(amount, %address, %level, %rate, coins = coins.len(), "building spend");

        let builder = TransactionBuilder::new(rate)
            .relay_fee_per_kb(self.config.relay_fee_per_kb)
            .add_output(TxOut { value: Amount::from_sat(amount), script_pubkey });
        let negotiation = builder.negotiate(|target| self.selector.select(target, coins))?;
        let change_script = match negotiation.change {
            Some(_) => {
                let change = self.current_address(KeyPurpose::Internal).await?;
                Some(change.script_pubkey(&replay))
            }
            None => None,
        };
        builder.assemble(negotiation, change_script)
    }

    async fn sign_with_node(&self, tx: Transaction) -> Result<Transaction, WalletError> {
        let signed = self.gateway.sign_raw_transaction(&tx).await?;
        if !signed.complete {
            return Err(WalletError::Signing("node returned an incomplete signature set".into()));
        }
        Ok(signed.transaction)
    }

    /// Spend `utxos` in full to `destination` (default: the wallet's
    /// internal address), signing with `key`.
    ///
    /// With a redeem script the coins are treated as P2SH outputs the key can
    /// satisfy alone; otherwise as P2PKH outputs of the key.
    pub async fn sweep(
        &self,
        utxos: &[Coin],
        destination: Option<&Address>,
        key: &SigningKey,
        redeem_script: Option<&Script>,
        level: FeeLevel,
    ) -> Result<Txid, WalletError> {
        self.gate.wait().await;
        if utxos.is_empty() {
            return Err(WalletError::UtxoNotFound);
        }
        let destination = match destination {
            Some(a) => self.check_network(a)?,
            None => self.current_address(KeyPurpose::Internal).await?,
        };
        let script_pubkey = self.address_to_script(&destination).await?;
        let kind = match redeem_script {
            Some(redeem) => {
                let shape = parse_multisig(redeem).map_err(|e| WalletError::InvalidMultisig(e.to_string()))?;
                InputKind::P2shMultisig { required: shape.required, total: shape.total() }
            }
            None => InputKind::P2pkh,
        };

        let total = utxos.iter().fold(0u64, |acc, c| acc.saturating_add(c.value));
        let out = TxOut { value: Amount::from_sat(total), script_pubkey: script_pubkey.clone() };
        let size = txsize::estimate_serialize_size(utxos.len(), std::slice::from_ref(&out), false, kind);
        let rate = self.fees.rate(level).await;
        let fee = rate.fee_for_size(size);
        let value = total.saturating_sub(fee);
        let relay = self.config.relay_fee_per_kb;
        if txsize::is_dust(value, script_pubkey.len(), relay) {
            return Err(WalletError::DustOutput {
                amount: value,
                threshold: txsize::dust_threshold(script_pubkey.len(), relay),
            });
        }
        debug!(inputs = utxos.len(), total, fee, %destination, "sweeping");

        let mut tx = skeleton(
            utxos.iter().map(|c| c.outpoint),
            vec![TxOut { value: Amount::from_sat(value), script_pubkey }],
        );
        ordering::sort_canonical(&mut tx);
        let prev_scripts: HashMap<OutPoint, &ScriptBuf> =
            utxos.iter().map(|c| (c.outpoint, &c.script_pubkey)).collect();
        for index in 0..tx.input.len() {
            match redeem_script {
                Some(redeem) => signing::sign_p2sh_single(&mut tx, index, redeem, key)?,
                None => {
                    let outpoint = tx.input[index].previous_output;
                    let prev = prev_scripts.get(&outpoint).ok_or(WalletError::UtxoNotFound)?;
                    signing::sign_p2pkh(&mut tx, index, prev, key)?;
                }
            }
        }
        self.broadcast(&tx).await
    }

    /// Child-pays-for-parent: sweep the unconfirmed output of `txid` back to
    /// the wallet at [`FeeLevel::FeeBump`].
    pub async fn bump_fee(&self, txid: &Txid) -> Result<Txid, WalletError> {
        self.gate.wait().await;
        let tx = self.gateway.get_transaction(txid, false).await?;
        if tx.confirmations > 0 {
            return Err(WalletError::AlreadyConfirmed);
        }
        let unspent = self.gateway.list_unspent().await?;
        let Some(utxo) = unspent.iter().find(|u| Txid::from_str(&u.txid).is_ok_and(|t| t == *txid)) else {
            return Err(WalletError::UtxoNotFound);
        };
        if utxo.confirmations > 0 {
            return Err(WalletError::AlreadyConfirmed);
        }
        let (coin, address) = gather::decode_unspent(utxo, self.config.network)?;
        let wif = self.gateway.dump_private_key(&address).await?;
        let key = SigningKey::from_wif(&wif)
            .map_err(|e| WalletError::MalformedNodeResponse(format!("key for {address}: {e}")))?;
        info!(%txid, value = coin.value, "bumping fee");
        self.sweep(&[coin], None, &key, None, FeeLevel::FeeBump).await
    }

    // ------------------------------------------------------------------
    // Multisig
    // ------------------------------------------------------------------

    /// Build a `threshold`-of-`keys.len()` redeem script bound to the current
    /// replay reference.
    ///
    /// Timeout escrow branches are not supported; a non-zero `timeout` fails.
    pub async fn generate_multisig_script(
        &self,
        keys: &[PublicKey],
        threshold: usize,
        timeout: Option<Duration>,
    ) -> Result<MultisigScript, WalletError> {
        if timeout.is_some_and(|t| !t.is_zero()) {
            return Err(WalletError::InvalidMultisig("timeout escrow is not supported".into()));
        }
        let replay = self.replay_reference().await?;
        multisig::generate_redeem_script(keys, threshold, &replay, self.config.network)
    }

    /// This party's signatures over the agreed skeleton.
    pub fn create_multisig_signature(
        &self,
        inputs: &[TransactionInput],
        outputs: &[TransactionOutput],
        key: &SigningKey,
        redeem_script: &Script,
        fee_rate: FeeRate,
    ) -> Result<Vec<PartialSignature>, WalletError> {
        multisig::partial_sign(inputs, outputs, key, redeem_script, fee_rate)
    }

    /// Combine two parties' signatures into serialized transaction bytes,
    /// broadcasting first when `broadcast` is set.
    #[allow(clippy::too_many_arguments)]
    pub async fn multisign(
        &self,
        inputs: &[TransactionInput],
        outputs: &[TransactionOutput],
        sigs_a: &[PartialSignature],
        sigs_b: &[PartialSignature],
        redeem_script: &Script,
        fee_rate: FeeRate,
        broadcast: bool,
    ) -> Result<Vec<u8>, WalletError> {
        self.gate.wait().await;
        let tx = multisig::combine(inputs, outputs, &[sigs_a, sigs_b], redeem_script, fee_rate)?;
        if broadcast {
            self.broadcast(&tx).await?;
        }
        Ok(serialize(&tx))
    }

    // ------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------

    pub fn add_transaction_listener(&self, listener: TransactionListener) {
        self.listeners.write().push(listener);
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        let txid = self.gateway.send_raw_transaction(tx).await?;
        info!(%txid, inputs = tx.input.len(), outputs = tx.output.len(), "broadcast transaction");
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(&txid);
        }
        Ok(txid)
    }
}

impl std::fmt::Debug for ZenWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZenWallet")
            .field("network", &self.config.network)
            .field("ready", &self.gate.is_open())
            .finish()
    }
}

/// Sign every input of a spend with the key bound to its coin.
fn sign_locally(unsigned: UnsignedTransaction, bindings: &[SigningKeyBinding]) -> Result<Transaction, WalletError> {
    let keys: HashMap<OutPoint, &SigningKeyBinding> = bindings.iter().map(|b| (b.coin.outpoint, b)).collect();
    let mut tx = unsigned.tx;
    for (index, coin) in unsigned.coins.iter().enumerate() {
        let binding = keys.get(&coin.outpoint).ok_or(WalletError::UtxoNotFound)?;
        match classify(&coin.script_pubkey) {
            Some((ScriptKind::PubkeyHash(_), _)) => {
                signing::sign_p2pkh(&mut tx, index, &coin.script_pubkey, &binding.key)?
            }
            _ => {
                return Err(WalletError::Signing(format!(
                    "cannot sign {} locally: not a pay-to-pubkey-hash output",
                    coin.outpoint
                )));
            }
        }
    }
    Ok(tx)
}

fn to_txouts(outputs: &[TransactionOutput]) -> Vec<TxOut> {
    outputs
        .iter()
        .map(|o| TxOut { value: Amount::from_sat(o.value), script_pubkey: o.script_pubkey.clone() })
        .collect()
}

fn parse_hash(s: &str) -> Result<BlockHash, WalletError> {
    BlockHash::from_str(s).map_err(|e| WalletError::MalformedNodeResponse(format!("block hash {s}: {e}")))
}
