//! Local legacy-sighash signing for P2PKH and P2SH inputs.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{opcodes, PublicKey, Script, ScriptBuf, Transaction};

use zen_core::script::{self, parse_multisig};

use crate::error::WalletError;
use crate::keys::SigningKey;

/// Legacy SIGHASH_ALL digest of input `index` against `script_code`.
pub fn sighash_all(tx: &Transaction, index: usize, script_code: &Script) -> Result<[u8; 32], WalletError> {
    signature_hash(tx, index, script_code, EcdsaSighashType::All.to_u32())
}

fn signature_hash(tx: &Transaction, index: usize, script_code: &Script, sighash_type: u32) -> Result<[u8; 32], WalletError> {
    let hash = SighashCache::new(tx)
        .legacy_signature_hash(index, script_code, sighash_type)
        .map_err(|e| WalletError::Signing(e.to_string()))?;
    Ok(hash.to_byte_array())
}

/// DER signature with the SIGHASH_ALL byte appended, as pushed in scripts.
pub fn input_signature(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    key: &SigningKey,
) -> Result<Vec<u8>, WalletError> {
    let digest = sighash_all(tx, index, script_code)?;
    Ok(ecdsa::Signature::sighash_all(key.sign_digest(digest)).to_vec())
}

/// Whether `signature` (DER plus sighash byte) is valid for `public_key` over
/// input `index` with `script_code`.
pub fn verify_input_signature(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    signature: &[u8],
    public_key: &PublicKey,
) -> bool {
    let Ok(sig) = ecdsa::Signature::from_slice(signature) else {
        return false;
    };
    let Ok(digest) = signature_hash(tx, index, script_code, sig.sighash_type.to_u32()) else {
        return false;
    };
    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&Message::from_digest(digest), &sig.signature, &public_key.inner)
        .is_ok()
}

/// Sign a P2PKH input spending `prev_script`: `<sig> <pubkey>`.
pub fn sign_p2pkh(
    tx: &mut Transaction,
    index: usize,
    prev_script: &Script,
    key: &SigningKey,
) -> Result<(), WalletError> {
    let sig = input_signature(tx, index, prev_script, key)?;
    let builder = script::push_bytes(Builder::new(), &sig)?;
    let script_sig = builder.push_key(key.public_key()).into_script();
    set_script_sig(tx, index, script_sig)
}

/// Sign a P2SH input whose redeem script needs a single signature from `key`:
/// `OP_0 <sig> <redeem script>`.
pub fn sign_p2sh_single(
    tx: &mut Transaction,
    index: usize,
    redeem_script: &Script,
    key: &SigningKey,
) -> Result<(), WalletError> {
    let shape = parse_multisig(redeem_script)?;
    if shape.required != 1 {
        return Err(WalletError::InvalidMultisig(format!(
            "redeem script needs {} signatures, one key available",
            shape.required
        )));
    }
    if !shape.public_keys.iter().any(|k| k.inner == key.public_key().inner) {
        return Err(WalletError::InvalidMultisig("signing key is not in the redeem script".into()));
    }
    let sig = input_signature(tx, index, redeem_script, key)?;
    let script_sig = multisig_script_sig(&[sig], redeem_script)?;
    set_script_sig(tx, index, script_sig)
}

/// `OP_0 <sig>... <redeem script>`.
pub fn multisig_script_sig(signatures: &[Vec<u8>], redeem_script: &Script) -> Result<ScriptBuf, WalletError> {
    let mut builder = Builder::new().push_opcode(opcodes::OP_0);
    for sig in signatures {
        builder = script::push_bytes(builder, sig)?;
    }
    builder = script::push_bytes(builder, redeem_script.as_bytes())?;
    Ok(builder.into_script())
}

fn set_script_sig(tx: &mut Transaction, index: usize, script_sig: ScriptBuf) -> Result<(), WalletError> {
    let input = tx
        .input
        .get_mut(index)
        .ok_or_else(|| WalletError::Signing(format!("input {index} out of range")))?;
    input.script_sig = script_sig;
    Ok(())
}
