//! Wallet-level value types: coins, fee levels and fee rates.
//!
//! All monetary values are in zatoshi (1 ZEN = 10^8 zat).

use bitcoin::{OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    COIN, ECONOMIC_TARGET_BLOCKS, NORMAL_TARGET_BLOCKS, PRIORITY_TARGET_BLOCKS,
};

/// An unspent output the wallet can spend.
///
/// The node is authoritative for the unspent set; a `Coin` is a snapshot of
/// what it reported and is never persisted by the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Coin {
    /// The output being referenced.
    pub outpoint: OutPoint,
    /// Value in zatoshi.
    pub value: u64,
    /// Confirmations reported by the node at gathering time.
    pub confirmations: u32,
    /// Script that a spending input must satisfy.
    pub script_pubkey: ScriptBuf,
}

impl Coin {
    /// Selection priority: value weighted by confirmation depth.
    pub fn value_age(&self) -> u128 {
        self.value as u128 * self.confirmations as u128
    }
}

/// A previous output referenced by a co-signed spend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub outpoint: OutPoint,
    /// Value in zatoshi.
    pub value: u64,
}

/// A desired payment: value and the script it pays to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub script_pubkey: ScriptBuf,
    /// Value in zatoshi.
    pub value: u64,
}

/// Qualitative fee urgency chosen by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeLevel {
    /// Next block.
    Priority,
    /// Within a few blocks.
    #[default]
    Normal,
    /// Cheapest reasonable.
    Economic,
    /// Used when bumping a stuck transaction. Has no oracle target.
    FeeBump,
}

impl FeeLevel {
    /// Confirmation target handed to the node's fee oracle.
    pub fn target_blocks(&self) -> Option<u32> {
        match self {
            FeeLevel::Priority => Some(PRIORITY_TARGET_BLOCKS),
            FeeLevel::Normal => Some(NORMAL_TARGET_BLOCKS),
            FeeLevel::Economic => Some(ECONOMIC_TARGET_BLOCKS),
            FeeLevel::FeeBump => None,
        }
    }
}

impl fmt::Display for FeeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeeLevel::Priority => "priority",
            FeeLevel::Normal => "normal",
            FeeLevel::Economic => "economic",
            FeeLevel::FeeBump => "feebump",
        };
        f.write_str(s)
    }
}

impl FromStr for FeeLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "priority" => Ok(FeeLevel::Priority),
            "normal" => Ok(FeeLevel::Normal),
            "economic" => Ok(FeeLevel::Economic),
            "feebump" | "fee-bump" => Ok(FeeLevel::FeeBump),
            other => Err(format!("unknown fee level: {other}")),
        }
    }
}

/// Fee rate in zatoshi per kilobyte.
///
/// Rates are kept per kilobyte so that sub-zatoshi-per-byte oracle answers
/// are not truncated before being applied to a transaction size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const ZERO: Self = Self(0);

    pub fn from_per_kb(zat_per_kb: u64) -> Self {
        Self(zat_per_kb)
    }

    pub fn from_per_byte(zat_per_byte: u64) -> Self {
        Self(zat_per_byte.saturating_mul(1000))
    }

    pub fn per_kb(&self) -> u64 {
        self.0
    }

    /// Whole zatoshi per byte, rounded down.
    pub fn per_byte(&self) -> u64 {
        self.0 / 1000
    }

    /// Fee for a transaction of `size` bytes.
    ///
    /// A positive rate never yields a zero fee: tiny transactions are charged
    /// the full per-kilobyte rate.
    pub fn fee_for_size(&self, size: usize) -> u64 {
        let fee = (self.0 as u128 * size as u128 / 1000).min(u64::MAX as u128) as u64;
        if fee == 0 && self.0 > 0 { self.0 } else { fee }
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} zat/kB", self.0)
    }
}

/// Convert a node-reported ZEN amount to zatoshi, rounding to the nearest unit.
pub fn zen_to_zat(zen: f64) -> i64 {
    (zen * COIN as f64).round() as i64
}

/// Format zatoshi as a decimal ZEN string (display only).
pub fn format_zen(zat: i64) -> String {
    let sign = if zat < 0 { "-" } else { "" };
    let abs = zat.unsigned_abs();
    format!("{sign}{}.{:08}", abs / COIN, abs % COIN)
}
