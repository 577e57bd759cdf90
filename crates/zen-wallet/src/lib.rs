//! # zen-wallet: node-backed ZEN wallet engine.
//!
//! Holds no chain state of its own: coins, keys and broadcast go through a
//! [`NodeGateway`](zen_core::traits::NodeGateway). On top of that it adds
//! value-age coin selection, a fee fixpoint builder, canonical ordering,
//! local signing and a two-party multisig protocol.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`keys`]: BIP39 seed, BIP32 master keys, signing keys
//! - [`coin_selection`]: Value-age UTXO selection
//! - [`builder`]: Fee-negotiating transaction builder
//! - [`ordering`]: BIP69 input/output ordering
//! - [`signing`]: Legacy sighash signing and verification
//! - [`multisig`]: Redeem scripts, partial signatures, combine
//! - [`fees`]: Fee levels to rates via the node's oracle
//! - [`gather`]: Decoding node coin listings
//! - [`gate`]: Readiness gate and watch queue
//! - [`config`]: Layered file/environment configuration
//! - [`wallet`]: The `ZenWallet` facade

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod error;
pub mod fees;
pub mod gate;
pub mod gather;
pub mod keys;
pub mod multisig;
pub mod ordering;
pub mod signing;
pub mod wallet;

#[cfg(test)]
mod test_gateway;

// Re-exports for convenient access
pub use builder::{TransactionBuilder, UnsignedTransaction};
pub use coin_selection::{CoinSelection, CoinSelector, MaxValueAgeSelector};
pub use config::WalletConfig;
pub use error::WalletError;
pub use fees::FeeEstimator;
pub use gate::InitGate;
pub use keys::{MasterKeys, Seed, SigningKey};
pub use multisig::{MultisigScript, PartialSignature};
pub use wallet::{Balance, Confirmations, KeyPurpose, TransactionListener, TxnRecord, ZenWallet};
