//! Wallet error types.

use thiserror::Error;
use zen_core::error::{AddressError, GatewayError, ScriptError};

/// Errors that can occur in wallet operations.
///
/// Fund-moving operations fail closed: any of these aborts before a
/// transaction reaches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Coin selection cannot cover the target plus fee.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Value of every available coin, in zatoshi.
        have: u64,
        /// Target plus fee, in zatoshi.
        need: u64,
    },

    /// A transaction was requested without any outputs.
    #[error("transaction has no outputs")]
    NoOutputs,

    /// An output value is below the dust floor for its script.
    #[error("dust output: {amount} zat is below {threshold} zat")]
    DustOutput {
        /// Offending output value.
        amount: u64,
        /// Smallest accepted value for the script.
        threshold: u64,
    },

    /// The change script is larger than the size model allows.
    #[error("change script of {len} bytes exceeds {max} bytes")]
    OversizedChangeScript {
        /// Actual script length.
        len: usize,
        /// Largest supported change script.
        max: usize,
    },

    /// Combining lacks a partial signature for an input.
    #[error("missing signature for input {input}")]
    SignatureMissing {
        /// Index of the unsigned input in canonical order.
        input: u32,
    },

    /// A fee bump was requested for a transaction that already confirmed.
    #[error("transaction already confirmed")]
    AlreadyConfirmed,

    /// The unspent output a bump or sweep needs is gone.
    #[error("unspent output not found")]
    UtxoNotFound,

    /// The node could not be reached or rejected the request.
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    /// A node reply could not be decoded.
    #[error("malformed node response: {0}")]
    MalformedNodeResponse(String),

    /// Keys, threshold or redeem script do not describe a usable multisig.
    #[error("invalid multisig: {0}")]
    InvalidMultisig(String),

    /// A partial signature does not verify against any redeem-script key.
    #[error("invalid signature for input {input}")]
    InvalidSignature {
        /// Index of the input in canonical order.
        input: u32,
    },

    /// The node did not return a fully signed transaction.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Key derivation or key decoding failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// Invalid mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Invalid or foreign-network address.
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Script construction or parsing failure.
    #[error("script: {0}")]
    Script(#[from] ScriptError),

    /// The node did not answer within the startup window.
    #[error("node did not respond within {0} seconds")]
    StartupTimeout(u64),

    /// Invalid wallet configuration.
    #[error("config: {0}")]
    Config(String),
}

impl From<GatewayError> for WalletError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::MalformedResponse(msg) => WalletError::MalformedNodeResponse(msg),
            other => WalletError::NodeUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_taxonomy() {
        let e: WalletError = GatewayError::Unavailable("connection refused".into()).into();
        assert!(matches!(e, WalletError::NodeUnavailable(_)));

        let e: WalletError = GatewayError::Rpc { code: -5, message: "no such key".into() }.into();
        assert!(matches!(e, WalletError::NodeUnavailable(ref m) if m.contains("-5")));

        let e: WalletError = GatewayError::MalformedResponse("bad hex".into()).into();
        assert_eq!(e, WalletError::MalformedNodeResponse("bad hex".into()));
    }

    #[test]
    fn display_messages() {
        let e = WalletError::InsufficientFunds { have: 10, need: 20 };
        assert_eq!(e.to_string(), "insufficient funds: have 10, need 20");
        let e = WalletError::SignatureMissing { input: 1 };
        assert_eq!(e.to_string(), "missing signature for input 1");
    }
}
