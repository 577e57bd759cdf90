//! Unsigned transaction construction with fee negotiation.
//!
//! Building runs a fee fixpoint:
//! 1. Estimate the fee for a single placeholder input.
//! 2. Ask the input source for coins covering target + fee.
//! 3. Recompute the fee for the actual input count.
//! 4. If the excess over the target cannot pay that fee, raise the fee target
//!    and select again.
//!
//! Each retry strictly raises the fee target against a finite coin set, so
//! the loop ends in either a funded skeleton or `InsufficientFunds`.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use tracing::debug;

use zen_core::constants::{DEFAULT_RELAY_FEE_PER_KB, INPUT_SEQUENCE, TX_VERSION};
use zen_core::txsize::{self, InputKind, P2PKH_PK_SCRIPT_SIZE};
use zen_core::types::{Coin, FeeRate};

use crate::coin_selection::CoinSelection;
use crate::error::WalletError;
use crate::ordering;

/// Outcome of the fee fixpoint, before a change script is attached.
#[derive(Debug, Clone)]
pub struct FeeNegotiation {
    /// Coins funding the transaction.
    pub selection: CoinSelection,
    /// Sum of the requested outputs.
    pub target: u64,
    /// Fee for the worst-case signed size, change output included.
    pub fee: u64,
    /// Change worth returning, or `None` when it is zero or dust and goes to
    /// the fee instead.
    pub change: Option<u64>,
}

/// A funded transaction awaiting signatures.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    /// Inputs and outputs in canonical order with empty signature scripts.
    pub tx: Transaction,
    /// The coin behind each input, aligned with `tx.input`.
    pub coins: Vec<Coin>,
    /// Total value of the spent coins.
    pub total_input: u64,
    /// Position of the change output in `tx.output`, if any.
    pub change_index: Option<usize>,
}

impl UnsignedTransaction {
    /// Total value of all outputs, change included.
    pub fn total_output(&self) -> u64 {
        self.tx.output.iter().map(|o| o.value.to_sat()).sum()
    }

    /// Fee actually paid: inputs minus outputs.
    pub fn fee(&self) -> u64 {
        self.total_input.saturating_sub(self.total_output())
    }
}

/// Builder for funded, canonically ordered transactions.
///
/// # Example
/// ```ignore
/// let unsigned = TransactionBuilder::new(rate)
///     .add_output(txout)
///     .build(|target| selector.select(target, &coins), || Ok(change_script))?;
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    outputs: Vec<TxOut>,
    fee_rate: FeeRate,
    input_kind: InputKind,
    relay_fee_per_kb: u64,
}

impl TransactionBuilder {
    /// A builder spending P2PKH coins at `fee_rate`.
    pub fn new(fee_rate: FeeRate) -> Self {
        Self {
            outputs: Vec::new(),
            fee_rate,
            input_kind: InputKind::P2pkh,
            relay_fee_per_kb: DEFAULT_RELAY_FEE_PER_KB,
        }
    }

    pub fn add_output(mut self, output: TxOut) -> Self {
        self.outputs.push(output);
        self
    }

    /// Size model for the inputs (default: P2PKH).
    pub fn input_kind(mut self, kind: InputKind) -> Self {
        self.input_kind = kind;
        self
    }

    /// Relay fee driving the dust rule (default: 1000 zat/kB).
    pub fn relay_fee_per_kb(mut self, relay: u64) -> Self {
        self.relay_fee_per_kb = relay;
        self
    }

    fn worst_case_fee(&self, input_count: usize) -> u64 {
        let size = txsize::estimate_serialize_size(input_count, &self.outputs, true, self.input_kind);
        self.fee_rate.fee_for_size(size)
    }

    fn check_outputs(&self) -> Result<u64, WalletError> {
        if self.outputs.is_empty() {
            return Err(WalletError::NoOutputs);
        }
        let mut target: u64 = 0;
        for out in &self.outputs {
            let value = out.value.to_sat();
            let len = out.script_pubkey.len();
            if txsize::is_dust(value, len, self.relay_fee_per_kb) {
                return Err(WalletError::DustOutput {
                    amount: value,
                    threshold: txsize::dust_threshold(len, self.relay_fee_per_kb),
                });
            }
            target = target.saturating_add(value);
        }
        Ok(target)
    }

    /// Run the fee fixpoint against `input_source`.
    ///
    /// `input_source(amount)` must return coins worth at least `amount` or
    /// fail; it is called once per fixpoint iteration.
    pub fn negotiate<F>(&self, mut input_source: F) -> Result<FeeNegotiation, WalletError>
    where
        F: FnMut(u64) -> Result<CoinSelection, WalletError>,
    {
        let target = self.check_outputs()?;
        let mut target_fee = self.worst_case_fee(1);

        loop {
            let need = target.saturating_add(target_fee);
            let selection = input_source(need)?;
            if selection.total < need {
                return Err(WalletError::InsufficientFunds { have: selection.total, need });
            }

            let required_fee = self.worst_case_fee(selection.coins.len());
            let remaining = selection.total - target;
            debug!(
                inputs = selection.coins.len(),
                total = selection.total,
                target,
                target_fee,
                required_fee,
                "fee fixpoint iteration"
            );
            if remaining < required_fee {
                target_fee = required_fee;
                continue;
            }

            let change_amount = remaining - required_fee;
            let change = (change_amount != 0
                && !txsize::is_dust(change_amount, P2PKH_PK_SCRIPT_SIZE, self.relay_fee_per_kb))
            .then_some(change_amount);
            if change.is_none() && change_amount != 0 {
                debug!(change_amount, "dropping dust change into the fee");
            }
            return Ok(FeeNegotiation { selection, target, fee: required_fee, change });
        }
    }

    /// Turn a negotiation into a canonically ordered skeleton.
    ///
    /// `change_script` is required when the negotiation produced change and
    /// must be no larger than a replay-protected P2PKH script.
    pub fn assemble(
        &self,
        negotiation: FeeNegotiation,
        change_script: Option<ScriptBuf>,
    ) -> Result<UnsignedTransaction, WalletError> {
        let mut outputs = self.outputs.clone();
        let mut change_output = None;
        if let Some(amount) = negotiation.change {
            let script = change_script.ok_or(WalletError::OversizedChangeScript {
                len: 0,
                max: P2PKH_PK_SCRIPT_SIZE,
            })?;
            if script.len() > P2PKH_PK_SCRIPT_SIZE {
                return Err(WalletError::OversizedChangeScript {
                    len: script.len(),
                    max: P2PKH_PK_SCRIPT_SIZE,
                });
            }
            let change = TxOut { value: Amount::from_sat(amount), script_pubkey: script };
            outputs.push(change.clone());
            change_output = Some(change);
        }

        let mut tx = skeleton(negotiation.selection.coins.iter().map(|c| c.outpoint), outputs);
        ordering::sort_canonical(&mut tx);

        let coins = align_coins(&tx, negotiation.selection.coins);
        let change_index = change_output.and_then(|change| tx.output.iter().position(|o| *o == change));
        debug!(
            inputs = tx.input.len(),
            outputs = tx.output.len(),
            fee = negotiation.fee,
            ?change_index,
            "assembled unsigned transaction"
        );
        Ok(UnsignedTransaction { tx, coins, total_input: negotiation.selection.total, change_index })
    }

    /// Negotiate the fee and assemble in one step.
    ///
    /// `change_source` is only invoked when a change output is warranted.
    pub fn build<F, C>(&self, input_source: F, change_source: C) -> Result<UnsignedTransaction, WalletError>
    where
        F: FnMut(u64) -> Result<CoinSelection, WalletError>,
        C: FnOnce() -> Result<ScriptBuf, WalletError>,
    {
        let negotiation = self.negotiate(input_source)?;
        let change_script = match negotiation.change {
            Some(_) => Some(change_source()?),
            None => None,
        };
        self.assemble(negotiation, change_script)
    }
}

/// Unsigned transaction with empty signature scripts, in the given order.
pub fn skeleton(outpoints: impl IntoIterator<Item = bitcoin::OutPoint>, outputs: Vec<TxOut>) -> Transaction {
    let input = outpoints
        .into_iter()
        .map(|previous_output| TxIn {
            previous_output,
            script_sig: ScriptBuf::new(),
            sequence: Sequence(INPUT_SEQUENCE),
            witness: Witness::new(),
        })
        .collect();
    Transaction { version: Version(TX_VERSION), lock_time: LockTime::ZERO, input, output: outputs }
}

/// Reorder `coins` to match the inputs of `tx`.
fn align_coins(tx: &Transaction, mut coins: Vec<Coin>) -> Vec<Coin> {
    coins.sort_by(|a, b| ordering::compare_outpoints(&a.outpoint, &b.outpoint));
    debug_assert!(tx.input.iter().zip(&coins).all(|(i, c)| i.previous_output == c.outpoint));
    coins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coin_selection::{CoinSelector, MaxValueAgeSelector};
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, Txid};
    use proptest::prelude::*;
    use zen_core::txsize::P2PKH_OUTPUT_SIZE;

    fn coin(n: u8, value: u64, confirmations: u32) -> Coin {
        Coin {
            outpoint: OutPoint::new(Txid::from_byte_array([n; 32]), n as u32),
            value,
            confirmations,
            script_pubkey: ScriptBuf::from_bytes(vec![0x76; 25]),
        }
    }

    fn pay(value: u64) -> TxOut {
        TxOut { value: Amount::from_sat(value), script_pubkey: ScriptBuf::from_bytes(vec![0xaa; 64]) }
    }

    fn change_script() -> ScriptBuf {
        ScriptBuf::from_bytes(vec![0xcc; 64])
    }

    fn source(coins: &[Coin]) -> impl FnMut(u64) -> Result<CoinSelection, WalletError> + '_ {
        move |target| MaxValueAgeSelector::default().select(target, coins)
    }

    #[test]
    fn spends_both_coins_and_returns_change() {
        let coins = vec![coin(1, 30_000, 6), coin(2, 40_000, 2)];
        let rate = FeeRate::from_per_byte(1);
        let builder = TransactionBuilder::new(rate).add_output(pay(50_000));
        let unsigned = builder.build(source(&coins), || Ok(change_script())).unwrap();

        let size = txsize::estimate_serialize_size(2, &[pay(50_000)], true, InputKind::P2pkh);
        let fee = rate.fee_for_size(size);
        assert_eq!(unsigned.total_input, 70_000);
        assert_eq!(unsigned.tx.input.len(), 2);
        let idx = unsigned.change_index.unwrap();
        assert_eq!(unsigned.tx.output[idx].value.to_sat(), 70_000 - 50_000 - fee);
        assert_eq!(unsigned.fee(), fee);
    }

    #[test]
    fn dust_change_becomes_fee() {
        let rate = FeeRate::from_per_byte(1);
        let one_input = txsize::estimate_serialize_size(1, &[pay(50_000)], true, InputKind::P2pkh);
        let fee = rate.fee_for_size(one_input);
        // Leaves 100 zat of change, well under the dust floor.
        let coins = vec![coin(1, 50_000 + fee + 100, 3)];
        let builder = TransactionBuilder::new(rate).add_output(pay(50_000));
        let unsigned = builder
            .build(source(&coins), || panic!("change script must not be requested"))
            .unwrap();
        assert_eq!(unsigned.tx.output.len(), 1);
        assert_eq!(unsigned.change_index, None);
        assert_eq!(unsigned.fee(), fee + 100);
    }

    #[test]
    fn exact_funding_has_no_change() {
        let rate = FeeRate::from_per_byte(2);
        let fee = rate.fee_for_size(txsize::estimate_serialize_size(1, &[pay(10_000)], true, InputKind::P2pkh));
        let coins = vec![coin(1, 10_000 + fee, 1)];
        let unsigned = TransactionBuilder::new(rate)
            .add_output(pay(10_000))
            .build(source(&coins), || panic!("no change expected"))
            .unwrap();
        assert_eq!(unsigned.fee(), fee);
        assert_eq!(unsigned.change_index, None);
    }

    #[test]
    fn fixpoint_raises_fee_for_extra_inputs() {
        let rate = FeeRate::from_per_byte(10);
        let fee_for = |n| rate.fee_for_size(txsize::estimate_serialize_size(n, &[pay(20_000)], true, InputKind::P2pkh));
        // The two best-ranked coins cover target + one-input fee but not the
        // two-input fee, forcing a second selection that pulls in the third.
        let coins = vec![coin(1, 15_000, 100), coin(2, 5_000 + fee_for(1), 100), coin(3, 50_000, 1)];
        let mut calls = Vec::new();
        let unsigned = TransactionBuilder::new(rate)
            .add_output(pay(20_000))
            .build(
                |target| {
                    calls.push(target);
                    MaxValueAgeSelector::default().select(target, &coins)
                },
                || Ok(change_script()),
            )
            .unwrap();
        assert_eq!(calls, vec![20_000 + fee_for(1), 20_000 + fee_for(2)]);
        assert_eq!(unsigned.tx.input.len(), 3);
        assert_eq!(unsigned.fee(), fee_for(3));
    }

    #[test]
    fn insufficient_funds_never_builds() {
        let coins = vec![coin(1, 10_000, 5)];
        let err = TransactionBuilder::new(FeeRate::from_per_byte(1))
            .add_output(pay(10_000))
            .build(source(&coins), || Ok(change_script()))
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
    }

    #[test]
    fn oversized_change_script_rejected() {
        let coins = vec![coin(1, 1_000_000, 5)];
        let err = TransactionBuilder::new(FeeRate::from_per_byte(1))
            .add_output(pay(10_000))
            .build(source(&coins), || Ok(ScriptBuf::from_bytes(vec![0; P2PKH_PK_SCRIPT_SIZE + 1])))
            .unwrap_err();
        assert_eq!(err, WalletError::OversizedChangeScript { len: 65, max: 64 });
    }

    #[test]
    fn dust_output_rejected_before_selection() {
        let coins = vec![coin(1, 1_000_000, 5)];
        let threshold = txsize::dust_threshold(64, DEFAULT_RELAY_FEE_PER_KB);
        let err = TransactionBuilder::new(FeeRate::from_per_byte(1))
            .add_output(pay(threshold - 1))
            .build(|_| panic!("selection must not run"), || Ok(change_script()))
            .unwrap_err();
        assert!(matches!(err, WalletError::DustOutput { .. }));

        let ok = TransactionBuilder::new(FeeRate::from_per_byte(1))
            .add_output(pay(threshold))
            .build(source(&coins), || Ok(change_script()));
        assert!(ok.is_ok());
    }

    #[test]
    fn callback_failure_propagates() {
        let coins = vec![coin(1, 1_000_000, 5)];
        let err = TransactionBuilder::new(FeeRate::from_per_byte(1))
            .add_output(pay(10_000))
            .build(source(&coins), || Err(WalletError::NodeUnavailable("down".into())))
            .unwrap_err();
        assert_eq!(err, WalletError::NodeUnavailable("down".into()));
    }

    #[test]
    fn skeleton_is_canonical_and_aligned() {
        let coins: Vec<Coin> = (1..=4).map(|n| coin(n * 37, 5_000 * n as u64, n as u32)).collect();
        let unsigned = TransactionBuilder::new(FeeRate::from_per_byte(1))
            .add_output(pay(30_000))
            .add_output(pay(12_000))
            .build(source(&coins), || Ok(change_script()))
            .unwrap();
        assert!(ordering::is_canonical(&unsigned.tx));
        for (input, coin) in unsigned.tx.input.iter().zip(&unsigned.coins) {
            assert_eq!(input.previous_output, coin.outpoint);
            assert_eq!(input.sequence, Sequence::ZERO);
            assert!(input.script_sig.is_empty());
        }
    }

    #[test]
    fn change_size_is_budgeted() {
        let with_change = txsize::estimate_serialize_size(1, &[pay(1)], true, InputKind::P2pkh);
        let without = txsize::estimate_serialize_size(1, &[pay(1)], false, InputKind::P2pkh);
        assert_eq!(with_change - without, P2PKH_OUTPUT_SIZE);
    }

    proptest! {
        #[test]
        fn funded_transactions_balance(
            values in prop::collection::vec(1_000u64..2_000_000, 1..12),
            amount in 1_000u64..3_000_000,
            per_byte in 0u64..60,
        ) {
            let coins: Vec<Coin> = values.iter().enumerate().map(|(i, v)| coin(i as u8, *v, (i % 7) as u32 + 1)).collect();
            let rate = FeeRate::from_per_byte(per_byte);
            let builder = TransactionBuilder::new(rate).add_output(pay(amount));
            match builder.build(source(&coins), || Ok(change_script())) {
                Ok(unsigned) => {
                    let size = txsize::estimate_serialize_size(unsigned.tx.input.len(), &[pay(amount)], true, InputKind::P2pkh);
                    prop_assert!(unsigned.total_input >= unsigned.total_output() + rate.fee_for_size(size));
                    prop_assert!(ordering::is_canonical(&unsigned.tx));
                }
                Err(WalletError::InsufficientFunds { .. }) => {
                    let sum: u64 = values.iter().sum();
                    let all_inputs_fee = rate.fee_for_size(
                        txsize::estimate_serialize_size(values.len(), &[pay(amount)], true, InputKind::P2pkh),
                    );
                    prop_assert!(sum < amount + all_inputs_fee);
                }
                Err(e) => prop_assert!(false, "unexpected error {e}"),
            }
        }
    }
}
