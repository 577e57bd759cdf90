//! Canonical input/output ordering (BIP69).
//!
//! Independent co-signers rebuild "the same" transaction from the same inputs
//! and outputs; sorting both lists makes those rebuilds byte-identical.

use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Transaction, TxIn, TxOut};
use std::cmp::Ordering;

/// Order outpoints by txid bytes read back to front (the displayed hex
/// order), then by output index.
pub fn compare_outpoints(a: &OutPoint, b: &OutPoint) -> Ordering {
    let (ha, hb) = (a.txid.to_byte_array(), b.txid.to_byte_array());
    ha.iter()
        .rev()
        .cmp(hb.iter().rev())
        .then(a.vout.cmp(&b.vout))
}

/// Order outputs by value, then by script bytes.
pub fn compare_outputs(a: &TxOut, b: &TxOut) -> Ordering {
    a.value
        .cmp(&b.value)
        .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
}

/// Sort a transaction's inputs and outputs in place.
pub fn sort_canonical(tx: &mut Transaction) {
    tx.input.sort_by(|a: &TxIn, b: &TxIn| compare_outpoints(&a.previous_output, &b.previous_output));
    tx.output.sort_by(compare_outputs);
}

/// Whether a transaction is already in canonical order.
pub fn is_canonical(tx: &Transaction) -> bool {
    tx.input
        .windows(2)
        .all(|w| compare_outpoints(&w[0].previous_output, &w[1].previous_output) != Ordering::Greater)
        && tx.output.windows(2).all(|w| compare_outputs(&w[0], &w[1]) != Ordering::Greater)
}
