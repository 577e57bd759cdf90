//! Address encoding for the ZEN network.
//!
//! Transparent addresses are base58check strings over a two-byte version
//! prefix followed by a 20-byte HASH160:
//! - Mainnet: `zn...` (pubkey hash), `zs...` (script hash)
//! - Testnet / regtest: `zt...` (pubkey hash), `zr...` (script hash)
//!
//! The pre-fork `t1`/`t3` (mainnet) and `tm`/`t2` (testnet) prefixes are
//! still accepted on decode but never produced.

use bitcoin::hashes::{Hash, hash160};
use bitcoin::{PublicKey, Script, ScriptBuf};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;
use crate::script::{self, ReplayProtection, ScriptKind};

const MAINNET_P2PKH: [u8; 2] = [0x20, 0x89];
const MAINNET_P2SH: [u8; 2] = [0x20, 0x96];
const TESTNET_P2PKH: [u8; 2] = [0x20, 0x98];
const TESTNET_P2SH: [u8; 2] = [0x20, 0x92];

const LEGACY_MAINNET_P2PKH: [u8; 2] = [0x1c, 0xb8];
const LEGACY_MAINNET_P2SH: [u8; 2] = [0x1c, 0xbd];
const LEGACY_TESTNET_P2PKH: [u8; 2] = [0x1d, 0x25];
const LEGACY_TESTNET_P2SH: [u8; 2] = [0x1c, 0xba];

/// Network identifier determining address prefixes and node defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression-test network. Shares testnet address prefixes.
    Regtest,
}

impl Network {
    /// Prefix for pay-to-pubkey-hash addresses.
    pub fn p2pkh_prefix(&self) -> [u8; 2] {
        match self {
            Network::Mainnet => MAINNET_P2PKH,
            Network::Testnet | Network::Regtest => TESTNET_P2PKH,
        }
    }

    /// Prefix for pay-to-script-hash addresses.
    pub fn p2sh_prefix(&self) -> [u8; 2] {
        match self {
            Network::Mainnet => MAINNET_P2SH,
            Network::Testnet | Network::Regtest => TESTNET_P2SH,
        }
    }

    /// Wallet currency code reported to callers.
    pub fn currency_code(&self) -> &'static str {
        match self {
            Network::Mainnet => "zen",
            Network::Testnet | Network::Regtest => "tzen",
        }
    }

    /// Default JSON-RPC port of the node.
    pub fn default_rpc_port(&self) -> u16 {
        match self {
            Network::Mainnet => 8231,
            Network::Testnet => 18231,
            Network::Regtest => 18232,
        }
    }

    /// The bitcoin network whose BIP32 version bytes extended keys use.
    pub fn bip32_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }

    fn from_prefix(prefix: [u8; 2]) -> Result<(Self, ScriptKindTag), AddressError> {
        match prefix {
            MAINNET_P2PKH | LEGACY_MAINNET_P2PKH => Ok((Network::Mainnet, ScriptKindTag::PubkeyHash)),
            MAINNET_P2SH | LEGACY_MAINNET_P2SH => Ok((Network::Mainnet, ScriptKindTag::ScriptHash)),
            TESTNET_P2PKH | LEGACY_TESTNET_P2PKH => Ok((Network::Testnet, ScriptKindTag::PubkeyHash)),
            TESTNET_P2SH | LEGACY_TESTNET_P2SH => Ok((Network::Testnet, ScriptKindTag::ScriptHash)),
            [a, b] => Err(AddressError::UnknownPrefix(a, b)),
        }
    }

    /// Whether addresses decoded as `other` are valid on this network.
    fn accepts(&self, other: Network) -> bool {
        match self {
            Network::Mainnet => other == Network::Mainnet,
            Network::Testnet | Network::Regtest => other != Network::Mainnet,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(AddressError::InvalidEncoding(format!("unknown network {other}"))),
        }
    }
}

#[derive(Clone, Copy)]
enum ScriptKindTag {
    PubkeyHash,
    ScriptHash,
}

/// A transparent ZEN address.
///
/// Immutable once decoded. Two addresses are equal when their canonical
/// encodings are equal, so a legacy `t1` string and its `zn` re-encoding
/// compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    kind: ScriptKind,
}

impl Address {
    /// Pay-to-pubkey-hash address for a 20-byte key hash.
    pub fn from_pubkey_hash(hash: [u8; 20], network: Network) -> Self {
        Self { network, kind: ScriptKind::PubkeyHash(hash) }
    }

    /// Pay-to-script-hash address for a 20-byte script hash.
    pub fn from_script_hash(hash: [u8; 20], network: Network) -> Self {
        Self { network, kind: ScriptKind::ScriptHash(hash) }
    }

    /// Pay-to-pubkey-hash address of a public key.
    pub fn p2pkh(public_key: &PublicKey, network: Network) -> Self {
        let hash = hash160::Hash::hash(&public_key.to_bytes());
        Self::from_pubkey_hash(hash.to_byte_array(), network)
    }

    /// Pay-to-script-hash address committing to a redeem script.
    pub fn p2sh(redeem_script: &Script, network: Network) -> Self {
        let hash = hash160::Hash::hash(redeem_script.as_bytes());
        Self::from_script_hash(hash.to_byte_array(), network)
    }

    /// Extract the address a (plain or replay-protected) output script pays to.
    pub fn from_script(script: &Script, network: Network) -> Result<Self, AddressError> {
        let (kind, _) = script::classify(script).ok_or(AddressError::UnsupportedScript)?;
        Ok(Self { network, kind })
    }

    /// Decode an address string and require that it belongs to `network`.
    pub fn decode(s: &str, network: Network) -> Result<Self, AddressError> {
        let addr: Address = s.parse()?;
        if !network.accepts(addr.network) {
            return Err(AddressError::WrongNetwork {
                expected: network.to_string(),
                found: addr.network.to_string(),
            });
        }
        Ok(Self { network, kind: addr.kind })
    }

    /// The network this address belongs to.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Hash payload and script type.
    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    /// Whether this is a pay-to-script-hash address.
    pub fn is_script_hash(&self) -> bool {
        matches!(self.kind, ScriptKind::ScriptHash(_))
    }

    /// Replay-protected output script paying to this address.
    pub fn script_pubkey(&self, replay: &ReplayProtection) -> ScriptBuf {
        match self.kind {
            ScriptKind::PubkeyHash(hash) => script::p2pkh_script(&hash, replay),
            ScriptKind::ScriptHash(hash) => script::p2sh_script(&hash, replay),
        }
    }

    /// Encode as a base58check string.
    pub fn encode(&self) -> String {
        let (prefix, hash) = match self.kind {
            ScriptKind::PubkeyHash(hash) => (self.network.p2pkh_prefix(), hash),
            ScriptKind::ScriptHash(hash) => (self.network.p2sh_prefix(), hash),
        };
        let mut payload = Vec::with_capacity(22);
        payload.extend_from_slice(&prefix);
        payload.extend_from_slice(&hash);
        bs58::encode(payload).with_check().into_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
        if payload.len() != 22 {
            return Err(AddressError::InvalidLength(payload.len()));
        }
        let (network, tag) = Network::from_prefix([payload[0], payload[1]])?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[2..]);
        Ok(match tag {
            ScriptKindTag::PubkeyHash => Self::from_pubkey_hash(hash, network),
            ScriptKindTag::ScriptHash => Self::from_script_hash(hash, network),
        })
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
