//! Replay-protected output scripts and threshold redeem scripts.
//!
//! Every script this wallet produces ends with a replay-protection payload:
//!
//! ```text
//! <block hash: 32 bytes, internal order> <block height> OP_CHECKBLOCKATHEIGHT
//! ```
//!
//! The node rejects a spend whose referenced block is not on its chain, which
//! keeps transactions from being replayed on the pre-fork chain.

use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::hashes::Hash;
use bitcoin::opcodes::{self, Opcode};
use bitcoin::{BlockHash, PublicKey, Script, ScriptBuf};

use crate::constants::{MAX_MULTISIG_KEYS, OP_CHECKBLOCKATHEIGHT};
use crate::error::ScriptError;

/// Consensus limit on a single pushed element, which bounds redeem scripts.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Hash payload of a standard output script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    /// HASH160 of a public key.
    PubkeyHash([u8; 20]),
    /// HASH160 of a redeem script.
    ScriptHash([u8; 20]),
}

/// Block reference embedded in scripts to bind them to this chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReplayProtection {
    /// Hash of the referenced block.
    pub block_hash: BlockHash,
    /// Height of the referenced block.
    pub height: u64,
}

impl ReplayProtection {
    pub fn new(block_hash: BlockHash, height: u64) -> Self {
        Self { block_hash, height }
    }

    /// Append `<hash> <height> OP_CHECKBLOCKATHEIGHT` to a script under construction.
    pub fn append_to(&self, builder: Builder) -> Builder {
        builder
            .push_slice(self.block_hash.to_byte_array())
            .push_int(self.height as i64)
            .push_opcode(Opcode::from(OP_CHECKBLOCKATHEIGHT))
    }

    /// Parse a trailing replay payload. `bytes` must contain nothing else.
    fn parse(bytes: &[u8]) -> Option<Self> {
        let instructions: Vec<Instruction<'_>> = Script::from_bytes(bytes)
            .instructions()
            .collect::<Result<_, _>>()
            .ok()?;
        match instructions.as_slice() {
            [Instruction::PushBytes(hash), height, Instruction::Op(op)]
                if hash.len() == 32 && op.to_u8() == OP_CHECKBLOCKATHEIGHT =>
            {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(hash.as_bytes());
                let height = instruction_number(height).filter(|h| *h >= 0)?;
                Some(Self::new(BlockHash::from_byte_array(raw), height as u64))
            }
            _ => None,
        }
    }
}

/// Replay-protected pay-to-pubkey-hash script.
pub fn p2pkh_script(pubkey_hash: &[u8; 20], replay: &ReplayProtection) -> ScriptBuf {
    let builder = Builder::new()
        .push_opcode(opcodes::all::OP_DUP)
        .push_opcode(opcodes::all::OP_HASH160)
        .push_slice(pubkey_hash)
        .push_opcode(opcodes::all::OP_EQUALVERIFY)
        .push_opcode(opcodes::all::OP_CHECKSIG);
    replay.append_to(builder).into_script()
}

/// Replay-protected pay-to-script-hash script.
pub fn p2sh_script(script_hash: &[u8; 20], replay: &ReplayProtection) -> ScriptBuf {
    let builder = Builder::new()
        .push_opcode(opcodes::all::OP_HASH160)
        .push_slice(script_hash)
        .push_opcode(opcodes::all::OP_EQUAL);
    replay.append_to(builder).into_script()
}

/// Identify the address payload of an output script, with its replay
/// reference if one is attached.
///
/// Accepts bare P2PKH / P2SH scripts as well as the replay-protected forms.
pub fn classify(script: &Script) -> Option<(ScriptKind, Option<ReplayProtection>)> {
    let b = script.as_bytes();
    let (kind, rest) = if b.len() >= 25 && b[..3] == [0x76, 0xa9, 0x14] && b[23..25] == [0x88, 0xac] {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&b[3..23]);
        (ScriptKind::PubkeyHash(hash), &b[25..])
    } else if b.len() >= 23 && b[..2] == [0xa9, 0x14] && b[22] == 0x87 {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&b[2..22]);
        (ScriptKind::ScriptHash(hash), &b[23..])
    } else {
        return None;
    };
    if rest.is_empty() {
        return Some((kind, None));
    }
    ReplayProtection::parse(rest).map(|replay| (kind, Some(replay)))
}

/// Build an `m`-of-`n` `OP_CHECKMULTISIG` redeem script carrying the replay
/// payload. Keys are committed in the order given.
pub fn multisig_redeem_script(
    public_keys: &[PublicKey],
    required: usize,
    replay: &ReplayProtection,
) -> Result<ScriptBuf, ScriptError> {
    let total = public_keys.len();
    if total > MAX_MULTISIG_KEYS {
        return Err(ScriptError::TooManyKeys(total));
    }
    if required == 0 || required > total {
        return Err(ScriptError::InvalidThreshold { required, total });
    }
    let mut builder = Builder::new().push_int(required as i64);
    for key in public_keys {
        builder = builder.push_key(key);
    }
    builder = builder
        .push_int(total as i64)
        .push_opcode(opcodes::all::OP_CHECKMULTISIG);
    let script = replay.append_to(builder).into_script();
    if script.len() > MAX_SCRIPT_ELEMENT_SIZE {
        return Err(ScriptError::PushTooLarge(script.len()));
    }
    Ok(script)
}

/// Threshold and ordered keys committed to by a multisig redeem script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisigShape {
    pub required: usize,
    pub public_keys: Vec<PublicKey>,
    pub replay: Option<ReplayProtection>,
}

impl MultisigShape {
    pub fn total(&self) -> usize {
        self.public_keys.len()
    }
}

/// Parse a redeem script produced by [`multisig_redeem_script`] (or a plain
/// `OP_CHECKMULTISIG` script without the replay payload).
pub fn parse_multisig(script: &Script) -> Result<MultisigShape, ScriptError> {
    let indexed: Vec<(usize, Instruction<'_>)> = script
        .instruction_indices()
        .collect::<Result<_, _>>()
        .map_err(|e| ScriptError::Malformed(e.to_string()))?;

    let checkmultisig = indexed
        .iter()
        .position(|(_, i)| matches!(i, Instruction::Op(op) if *op == opcodes::all::OP_CHECKMULTISIG))
        .ok_or(ScriptError::NotMultisig)?;
    if checkmultisig < 2 {
        return Err(ScriptError::NotMultisig);
    }

    let required = instruction_number(&indexed[0].1).ok_or(ScriptError::NotMultisig)?;
    let total = instruction_number(&indexed[checkmultisig - 1].1).ok_or(ScriptError::NotMultisig)?;

    let mut public_keys = Vec::new();
    for (_, ins) in &indexed[1..checkmultisig - 1] {
        match ins {
            Instruction::PushBytes(bytes) => {
                let key = PublicKey::from_slice(bytes.as_bytes())
                    .map_err(|e| ScriptError::Malformed(e.to_string()))?;
                public_keys.push(key);
            }
            Instruction::Op(_) => return Err(ScriptError::NotMultisig),
        }
    }
    if total < 0 || total as usize != public_keys.len() || required <= 0 || required > total {
        return Err(ScriptError::InvalidThreshold {
            required: required.max(0) as usize,
            total: public_keys.len(),
        });
    }

    let replay = match indexed.get(checkmultisig + 1) {
        None => None,
        Some((start, _)) => Some(ReplayProtection::parse(&script.as_bytes()[*start..]).ok_or_else(
            || ScriptError::Malformed("unexpected data after OP_CHECKMULTISIG".into()),
        )?),
    };

    Ok(MultisigShape { required: required as usize, public_keys, replay })
}

/// Opcode bytes needed to push `len` bytes with a minimal push.
pub fn push_overhead(len: usize) -> usize {
    match len {
        0..=75 => 1,
        76..=0xff => 2,
        0x100..=0xffff => 3,
        _ => 5,
    }
}

/// Value of a small-integer opcode or a minimally encoded script number push.
fn instruction_number(ins: &Instruction<'_>) -> Option<i64> {
    match ins {
        Instruction::Op(op) => {
            let code = op.to_u8();
            match code {
                0x51..=0x60 => Some((code - 0x50) as i64),
                0x4f => Some(-1),
                _ => None,
            }
        }
        Instruction::PushBytes(bytes) => read_script_number(bytes.as_bytes()),
    }
}

/// Decode a little-endian sign-magnitude script number of at most 8 bytes.
fn read_script_number(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 8 {
        return None;
    }
    let mut value: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        value |= (*byte as i64) << (8 * i);
    }
    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        Some(-(value & mask))
    } else {
        Some(value)
    }
}

/// Push arbitrary bytes onto a script builder.
pub fn push_bytes(builder: Builder, data: &[u8]) -> Result<Builder, ScriptError> {
    let buf = PushBytesBuf::try_from(data.to_vec()).map_err(|_| ScriptError::PushTooLarge(data.len()))?;
    Ok(builder.push_slice(buf))
}
