//! Protocol constants. All monetary values in zatoshi (1 ZEN = 10^8 zat).

/// Zatoshi per ZEN.
pub const COIN: u64 = 100_000_000;

/// How far below the chain tip the replay-protection block reference sits.
///
/// The referenced block must be buried deep enough that a reorg cannot
/// invalidate scripts already handed out.
pub const REPLAY_DEPTH: u64 = 300;

/// `OP_CHECKBLOCKATHEIGHT`, which occupies the `OP_NOP5` slot.
pub const OP_CHECKBLOCKATHEIGHT: u8 = 0xb4;

/// Default minimum relay fee in zat per kilobyte. Drives the dust rule.
pub const DEFAULT_RELAY_FEE_PER_KB: u64 = 1_000;

/// Fee rate used when the node's fee oracle has no answer (50 zat/byte).
pub const DEFAULT_FEE_PER_KB: u64 = 50_000;

/// Maximum number of public keys in a P2SH `OP_CHECKMULTISIG` script.
pub const MAX_MULTISIG_KEYS: usize = 15;

/// Confirmation targets handed to the fee oracle.
pub const PRIORITY_TARGET_BLOCKS: u32 = 1;
pub const NORMAL_TARGET_BLOCKS: u32 = 3;
pub const ECONOMIC_TARGET_BLOCKS: u32 = 6;

/// Sequence number for wallet inputs. Zero opts in to replace-by-fee.
pub const INPUT_SEQUENCE: u32 = 0;

/// Transaction version used for transparent transactions.
pub const TX_VERSION: i32 = 1;
