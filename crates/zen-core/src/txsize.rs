//! Worst-case serialized size model and the dust rule.
//!
//! Sizes account for the replay-protection payload that every output and
//! redeem script carries on this chain.

use bitcoin::TxOut;

use crate::script::push_overhead;

/// Largest replay payload: 32-byte hash push, height push of up to five
/// bytes, and `OP_CHECKBLOCKATHEIGHT`.
pub const REPLAY_PAYLOAD_MAX_SIZE: usize = 33 + 5 + 1;

/// Largest replay-protected P2PKH output script.
pub const P2PKH_PK_SCRIPT_SIZE: usize = 25 + REPLAY_PAYLOAD_MAX_SIZE;

/// Serialized size of a replay-protected P2PKH output.
pub const P2PKH_OUTPUT_SIZE: usize = 8 + 1 + P2PKH_PK_SCRIPT_SIZE;

/// Signature script redeeming P2PKH: `<73-byte sig> <33-byte key>`.
pub const REDEEM_P2PKH_SIG_SCRIPT_SIZE: usize = 1 + 73 + 1 + 33;

/// Largest DER signature plus sighash byte.
const MAX_SIGNATURE_SIZE: usize = 73;

/// What kind of output an input redeems.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// Single-signature pay-to-pubkey-hash.
    P2pkh,
    /// Pay-to-script-hash over an `m`-of-`n` redeem script with replay payload.
    P2shMultisig { required: usize, total: usize },
}

impl InputKind {
    /// Worst-case signature script size.
    pub fn sig_script_size(&self) -> usize {
        match *self {
            InputKind::P2pkh => REDEEM_P2PKH_SIG_SCRIPT_SIZE,
            InputKind::P2shMultisig { required, total } => {
                let redeem = multisig_redeem_script_size(total);
                1 + required * (1 + MAX_SIGNATURE_SIZE) + push_overhead(redeem) + redeem
            }
        }
    }

    /// Worst-case serialized input size.
    pub fn input_size(&self) -> usize {
        let sig = self.sig_script_size();
        32 + 4 + varint_size(sig as u64) + sig + 4
    }
}

/// Size of an `m`-of-`n` redeem script with compressed keys and replay payload.
pub fn multisig_redeem_script_size(total: usize) -> usize {
    1 + total * 34 + 1 + 1 + REPLAY_PAYLOAD_MAX_SIZE
}

/// Bytes used by a Bitcoin-style compact size prefix.
pub fn varint_size(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Serialized size of an output with a script of `script_len` bytes.
pub fn output_size(script_len: usize) -> usize {
    8 + varint_size(script_len as u64) + script_len
}

/// Worst-case size of a transaction spending `input_count` inputs of `kind`
/// to `outputs`, plus a P2PKH change output when `add_change` is set.
pub fn estimate_serialize_size(
    input_count: usize,
    outputs: &[TxOut],
    add_change: bool,
    kind: InputKind,
) -> usize {
    let mut output_count = outputs.len();
    let mut change_size = 0;
    if add_change {
        change_size = P2PKH_OUTPUT_SIZE;
        output_count += 1;
    }
    let outputs_size: usize = outputs.iter().map(|o| output_size(o.script_pubkey.len())).sum();
    // version + lock time
    8 + varint_size(input_count as u64)
        + varint_size(output_count as u64)
        + input_count * kind.input_size()
        + outputs_size
        + change_size
}

/// Whether `amount` is too small to be worth spending at `relay_fee_per_kb`.
///
/// An output is dust when spending it (a 148-byte P2PKH input plus the output
/// itself) would cost more than a third of its value at the relay fee.
pub fn is_dust(amount: u64, script_len: usize, relay_fee_per_kb: u64) -> bool {
    let total_size = (output_size(script_len) + 148) as u128;
    (amount as u128 * 1000) / (3 * total_size) < relay_fee_per_kb as u128
}

/// Smallest amount that is not dust for a script of `script_len` bytes.
pub fn dust_threshold(script_len: usize, relay_fee_per_kb: u64) -> u64 {
    let total_size = (output_size(script_len) + 148) as u128;
    (relay_fee_per_kb as u128 * 3 * total_size).div_ceil(1000) as u64
}
