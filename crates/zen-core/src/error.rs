//! Error types shared across the ZEN wallet crates.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58check encoding: {0}")] InvalidEncoding(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("unknown address prefix: {0:02x}{1:02x}")] UnknownPrefix(u8, u8),
    #[error("address belongs to {found}, expected {expected}")] WrongNetwork { expected: String, found: String },
    #[error("script does not pay to an address")] UnsupportedScript,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("invalid threshold: {required} of {total}")] InvalidThreshold { required: usize, total: usize },
    #[error("too many public keys: {0}")] TooManyKeys(usize),
    #[error("push too large: {0} bytes")] PushTooLarge(usize),
    #[error("not a multisig redeem script")] NotMultisig,
    #[error("malformed script: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("node unavailable: {0}")] Unavailable(String),
    #[error("node rpc error {code}: {message}")] Rpc { code: i64, message: String },
    #[error("malformed node response: {0}")] MalformedResponse(String),
}
