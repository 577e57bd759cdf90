//! Threshold (m-of-n) P2SH scripts and the co-signing protocol.
//!
//! Co-signers never exchange a transaction. Each party rebuilds the same
//! skeleton from the agreed inputs, outputs, redeem script and fee rate:
//! the fee is split evenly across outputs and both lists are sorted
//! canonically, so every rebuild is byte-identical and signatures made on one
//! copy are valid on all others.

use bitcoin::{Amount, PublicKey, Script, ScriptBuf, Transaction, TxOut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use zen_core::address::{Address, Network};
use zen_core::constants::DEFAULT_RELAY_FEE_PER_KB;
use zen_core::error::ScriptError;
use zen_core::script::{multisig_redeem_script, parse_multisig, MultisigShape, ReplayProtection};
use zen_core::txsize::{self, InputKind};
use zen_core::types::{FeeRate, TransactionInput, TransactionOutput};

use crate::builder::skeleton;
use crate::error::WalletError;
use crate::keys::SigningKey;
use crate::ordering;
use crate::signing::{input_signature, multisig_script_sig, verify_input_signature};

/// One co-signer's signature for one input of the canonical skeleton.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    /// Input position after canonical sorting.
    pub input_index: u32,
    /// DER signature with the sighash byte appended.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// A threshold script and the P2SH address paying to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisigScript {
    pub address: Address,
    pub redeem_script: ScriptBuf,
}

/// Build an `threshold`-of-`keys.len()` redeem script bound to `replay`.
///
/// Deterministic: the same keys, threshold and block reference always give
/// the same script and address.
pub fn generate_redeem_script(
    keys: &[PublicKey],
    threshold: usize,
    replay: &ReplayProtection,
    network: Network,
) -> Result<MultisigScript, WalletError> {
    let redeem_script = multisig_redeem_script(keys, threshold, replay).map_err(invalid_multisig)?;
    let address = Address::p2sh(&redeem_script, network);
    debug!(%address, threshold, keys = keys.len(), "generated multisig script");
    Ok(MultisigScript { address, redeem_script })
}

fn invalid_multisig(e: ScriptError) -> WalletError {
    WalletError::InvalidMultisig(e.to_string())
}

fn shape_of(redeem_script: &Script) -> Result<MultisigShape, WalletError> {
    parse_multisig(redeem_script).map_err(invalid_multisig)
}

/// Rebuild the canonical skeleton co-signers agree on.
///
/// The fee for the worst-case signed size is divided evenly and taken from
/// every output; any remainder of that division is left unpaid.
pub fn multisig_skeleton(
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    redeem_script: &Script,
    fee_rate: FeeRate,
) -> Result<Transaction, WalletError> {
    let shape = shape_of(redeem_script)?;
    if inputs.is_empty() {
        return Err(WalletError::InvalidMultisig("no inputs to sign".into()));
    }
    if outputs.is_empty() {
        return Err(WalletError::NoOutputs);
    }

    let mut txouts: Vec<TxOut> = outputs
        .iter()
        .map(|o| TxOut { value: Amount::from_sat(o.value), script_pubkey: o.script_pubkey.clone() })
        .collect();
    let kind = InputKind::P2shMultisig { required: shape.required, total: shape.total() };
    let size = txsize::estimate_serialize_size(inputs.len(), &txouts, false, kind);
    let fee = fee_rate.fee_for_size(size);
    let per_output = fee / txouts.len() as u64;

    for out in &mut txouts {
        let value = out.value.to_sat();
        let len = out.script_pubkey.len();
        let remaining = value.saturating_sub(per_output);
        if txsize::is_dust(remaining, len, DEFAULT_RELAY_FEE_PER_KB) {
            return Err(WalletError::DustOutput {
                amount: remaining,
                threshold: txsize::dust_threshold(len, DEFAULT_RELAY_FEE_PER_KB),
            });
        }
        out.value = Amount::from_sat(remaining);
    }

    let mut tx = skeleton(inputs.iter().map(|i| i.outpoint), txouts);
    ordering::sort_canonical(&mut tx);
    debug!(size, fee, per_output, inputs = tx.input.len(), "rebuilt multisig skeleton");
    Ok(tx)
}

/// Sign every input of the canonical skeleton with `key`.
pub fn partial_sign(
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    key: &SigningKey,
    redeem_script: &Script,
    fee_rate: FeeRate,
) -> Result<Vec<PartialSignature>, WalletError> {
    let shape = shape_of(redeem_script)?;
    if !shape.public_keys.iter().any(|k| k.inner == key.public_key().inner) {
        return Err(WalletError::InvalidMultisig("signing key is not in the redeem script".into()));
    }
    let tx = multisig_skeleton(inputs, outputs, redeem_script, fee_rate)?;
    (0..tx.input.len())
        .map(|i| {
            Ok(PartialSignature {
                input_index: i as u32,
                signature: input_signature(&tx, i, redeem_script, key)?,
            })
        })
        .collect()
}

/// Assemble a fully signed transaction from co-signers' partial signatures.
///
/// Every set must carry a signature for every input. Signatures are checked
/// against the redeem script's keys and pushed in key order. The call fails
/// without returning a transaction if any input would be left unsatisfied.
pub fn combine(
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    signature_sets: &[&[PartialSignature]],
    redeem_script: &Script,
    fee_rate: FeeRate,
) -> Result<Transaction, WalletError> {
    let shape = shape_of(redeem_script)?;
    if signature_sets.len() < shape.required {
        return Err(WalletError::InvalidMultisig(format!(
            "{} signature sets for a {}-of-{} script",
            signature_sets.len(),
            shape.required,
            shape.total()
        )));
    }
    let unsigned = multisig_skeleton(inputs, outputs, redeem_script, fee_rate)?;
    let mut tx = unsigned.clone();

    for index in 0..unsigned.input.len() {
        let input = index as u32;
        // (key position, signature) in redeem-script key order.
        let mut by_key: Vec<(usize, &[u8])> = Vec::with_capacity(signature_sets.len());
        for set in signature_sets {
            let sig = set
                .iter()
                .find(|s| s.input_index == input)
                .ok_or(WalletError::SignatureMissing { input })?;
            let position = shape
                .public_keys
                .iter()
                .position(|pk| verify_input_signature(&unsigned, index, redeem_script, &sig.signature, pk))
                .ok_or(WalletError::InvalidSignature { input })?;
            if !by_key.iter().any(|(p, _)| *p == position) {
                by_key.push((position, sig.signature.as_slice()));
            }
        }
        if by_key.len() < shape.required {
            return Err(WalletError::SignatureMissing { input });
        }
        by_key.sort_by_key(|(p, _)| *p);
        let sigs: Vec<Vec<u8>> = by_key
            .iter()
            .take(shape.required)
            .map(|(_, s)| s.to_vec())
            .collect();
        tx.input[index].script_sig = multisig_script_sig(&sigs, redeem_script)?;
    }
    Ok(tx)
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::script::Instruction;
    use bitcoin::{OutPoint, Txid};

    fn replay() -> ReplayProtection {
        ReplayProtection::new(crate::test_gateway::block_hash_at(4_700), 4_700)
    }

    fn keys() -> Vec<SigningKey> {
        (1..=3).map(|n| SigningKey::from_secret_bytes(&[n * 11; 32]).unwrap()).collect()
    }

    fn two_of_three() -> (Vec<SigningKey>, MultisigScript) {
        let keys = keys();
        let pubs: Vec<PublicKey> = keys.iter().map(|k| *k.public_key()).collect();
        let script = generate_redeem_script(&pubs, 2, &replay(), Network::Mainnet).unwrap();
        (keys, script)
    }

    fn inputs() -> Vec<TransactionInput> {
        vec![
            TransactionInput { outpoint: OutPoint::new(Txid::from_byte_array([9; 32]), 1), value: 80_000 },
            TransactionInput { outpoint: OutPoint::new(Txid::from_byte_array([4; 32]), 0), value: 70_000 },
        ]
    }

    fn outputs() -> Vec<TransactionOutput> {
        let payee = Address::from_pubkey_hash([7; 20], Network::Mainnet);
        let change = Address::from_pubkey_hash([8; 20], Network::Mainnet);
        vec![
            TransactionOutput { script_pubkey: payee.script_pubkey(&replay()), value: 100_000 },
            TransactionOutput { script_pubkey: change.script_pubkey(&replay()), value: 50_000 },
        ]
    }

    fn rate() -> FeeRate {
        FeeRate::from_per_byte(5)
    }

    #[test]
    fn redeem_script_is_idempotent() {
        let (keys, first) = two_of_three();
        let pubs: Vec<PublicKey> = keys.iter().map(|k| *k.public_key()).collect();
        let second = generate_redeem_script(&pubs, 2, &replay(), Network::Mainnet).unwrap();
        assert_eq!(first, second);
        assert!(first.address.is_script_hash());
    }

    #[test]
    fn bad_threshold_rejected() {
        let pubs: Vec<PublicKey> = keys().iter().map(|k| *k.public_key()).collect();
        assert!(matches!(
            generate_redeem_script(&pubs, 4, &replay(), Network::Mainnet),
            Err(WalletError::InvalidMultisig(_))
        ));
        assert!(matches!(
            generate_redeem_script(&pubs, 0, &replay(), Network::Mainnet),
            Err(WalletError::InvalidMultisig(_))
        ));
    }

    #[test]
    fn fee_is_split_across_outputs() {
        let (_, ms) = two_of_three();
        let tx = multisig_skeleton(&inputs(), &outputs(), &ms.redeem_script, rate()).unwrap();
        let deducted: Vec<u64> = tx.output.iter().map(|o| o.value.to_sat()).collect();
        let first = 50_000 - deducted[0];
        assert_eq!(100_000 - deducted[1], first);
        assert!(first > 0);
        assert!(ordering::is_canonical(&tx));
    }

    #[test]
    fn partial_signatures_combine() {
        let (keys, ms) = two_of_three();
        let a = partial_sign(&inputs(), &outputs(), &keys[0], &ms.redeem_script, rate()).unwrap();
        let c = partial_sign(&inputs(), &outputs(), &keys[2], &ms.redeem_script, rate()).unwrap();
        assert_eq!(a.len(), 2);

        // Order of the sets must not matter.
        let tx = combine(&inputs(), &outputs(), &[c.as_slice(), a.as_slice()], &ms.redeem_script, rate()).unwrap();
        for (i, input) in tx.input.iter().enumerate() {
            let pushes: Vec<_> = input.script_sig.instructions().map(|i| i.unwrap()).collect();
            assert_eq!(pushes.len(), 4, "input {i}");
            assert!(matches!(&pushes[0], Instruction::PushBytes(b) if b.is_empty()));
            let Instruction::PushBytes(first) = &pushes[1] else { panic!() };
            assert_eq!(first.as_bytes(), a[i].signature.as_slice());
        }
    }

    #[test]
    fn missing_index_fails_closed() {
        let (keys, ms) = two_of_three();
        let a = partial_sign(&inputs(), &outputs(), &keys[0], &ms.redeem_script, rate()).unwrap();
        let mut b = partial_sign(&inputs(), &outputs(), &keys[1], &ms.redeem_script, rate()).unwrap();
        b.retain(|s| s.input_index != 1);
        let err = combine(&inputs(), &outputs(), &[a.as_slice(), b.as_slice()], &ms.redeem_script, rate()).unwrap_err();
        assert_eq!(err, WalletError::SignatureMissing { input: 1 });
    }

    #[test]
    fn duplicate_signer_is_not_enough() {
        let (keys, ms) = two_of_three();
        let a = partial_sign(&inputs(), &outputs(), &keys[0], &ms.redeem_script, rate()).unwrap();
        let err = combine(&inputs(), &outputs(), &[a.as_slice(), a.as_slice()], &ms.redeem_script, rate()).unwrap_err();
        assert_eq!(err, WalletError::SignatureMissing { input: 0 });
    }

    #[test]
    fn signature_over_other_fee_rate_is_invalid() {
        let (keys, ms) = two_of_three();
        let a = partial_sign(&inputs(), &outputs(), &keys[0], &ms.redeem_script, rate()).unwrap();
        let b = partial_sign(&inputs(), &outputs(), &keys[1], &ms.redeem_script, FeeRate::from_per_byte(6)).unwrap();
        let err = combine(&inputs(), &outputs(), &[a.as_slice(), b.as_slice()], &ms.redeem_script, rate()).unwrap_err();
        assert_eq!(err, WalletError::InvalidSignature { input: 0 });
    }

    #[test]
    fn outsider_cannot_sign() {
        let (_, ms) = two_of_three();
        let outsider = SigningKey::from_secret_bytes(&[99; 32]).unwrap();
        assert!(matches!(
            partial_sign(&inputs(), &outputs(), &outsider, &ms.redeem_script, rate()),
            Err(WalletError::InvalidMultisig(_))
        ));
    }

    #[test]
    fn input_order_is_irrelevant() {
        let (_, ms) = two_of_three();
        let mut reversed = inputs();
        reversed.reverse();
        let a = multisig_skeleton(&inputs(), &outputs(), &ms.redeem_script, rate()).unwrap();
        let b = multisig_skeleton(&reversed, &outputs(), &ms.redeem_script, rate()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fee_eating_an_output_is_dust() {
        let (_, ms) = two_of_three();
        let mut outs = outputs();
        outs[1].value = 1_000;
        let err = multisig_skeleton(&inputs(), &outs, &ms.redeem_script, FeeRate::from_per_byte(50)).unwrap_err();
        assert!(matches!(err, WalletError::DustOutput { .. }));
    }

    #[test]
    fn partial_signature_json_is_hex() {
        let sig = PartialSignature { input_index: 2, signature: vec![0x30, 0x01] };
        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(json, r#"{"input_index":2,"signature":"3001"}"#);
        let back: PartialSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
