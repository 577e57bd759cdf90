//! Master key material and ephemeral signing keys.
//!
//! The wallet holds one BIP32 master key pair derived from a BIP39 mnemonic.
//! Keys for coins held by the node are exported on demand and wrapped in a
//! [`SigningKey`] that lives only for the duration of one signing pass.

use bip39::{Language, Mnemonic};
use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::{ecdsa, Message, Secp256k1};
use bitcoin::{PrivateKey, PublicKey};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use zen_core::address::{Address, Network};

use crate::error::WalletError;

/// A 64-byte BIP39 seed.
///
/// Secret material is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 64],
}

impl Seed {
    /// Derive the seed for a mnemonic phrase and optional passphrase.
    ///
    /// Whitespace is normalized and the phrase lowercased before parsing.
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, WalletError> {
        let normalized = phrase
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let m = Mnemonic::parse_in(Language::English, &normalized)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Self { bytes: m.to_seed(passphrase) })
    }

    /// Raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

/// Generate a fresh 24-word English mnemonic from the OS RNG.
pub fn generate_mnemonic() -> String {
    use rand::RngCore;
    let mut entropy = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let phrase = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map(|m| m.to_string())
        .unwrap_or_default();
    entropy.zeroize();
    phrase
}

/// The wallet's hierarchical master key pair.
#[derive(Clone)]
pub struct MasterKeys {
    private: Xpriv,
    public: Xpub,
}

impl MasterKeys {
    /// Master keys for a seed on `network`.
    pub fn from_seed(seed: &Seed, network: Network) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let private = Xpriv::new_master(network.bip32_network(), seed.as_bytes())
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let public = Xpub::from_priv(&secp, &private);
        Ok(Self { private, public })
    }

    pub fn from_mnemonic(phrase: &str, network: Network) -> Result<Self, WalletError> {
        Self::from_seed(&Seed::from_mnemonic(phrase, "")?, network)
    }

    /// Master private key.
    pub fn private(&self) -> &Xpriv {
        &self.private
    }

    /// Neutered master public key.
    pub fn public(&self) -> &Xpub {
        &self.public
    }

    /// Signing key at a derivation path below the master.
    pub fn derive(&self, path: &DerivationPath, network: Network) -> Result<SigningKey, WalletError> {
        let secp = Secp256k1::new();
        let child = self
            .private
            .derive_priv(&secp, path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(SigningKey::new(PrivateKey::new(child.private_key, network.bip32_network())))
    }
}

impl fmt::Debug for MasterKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeys")
            .field("public", &self.public.to_string())
            .finish()
    }
}

/// A single private key able to sign for one coin or one multisig party.
///
/// Built fresh for each signing pass and erased on drop; never cached.
pub struct SigningKey {
    key: PrivateKey,
    public: PublicKey,
}

impl SigningKey {
    fn new(key: PrivateKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public = key.public_key(&secp);
        Self { key, public }
    }

    /// Decode a WIF private key as exported by the node.
    pub fn from_wif(wif: &str) -> Result<Self, WalletError> {
        let key = PrivateKey::from_wif(wif.trim())
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(Self::new(key))
    }

    /// Wrap a raw 32-byte scalar as a compressed key.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, WalletError> {
        let key = PrivateKey::from_slice(secret, bitcoin::NetworkKind::Main)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(Self::new(key))
    }

    /// Signing key from an extended private key, discarding its chain code.
    pub fn from_xpriv(xpriv: &Xpriv) -> Self {
        Self::new(PrivateKey::new(xpriv.private_key, xpriv.network))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// P2PKH address of this key.
    pub fn address(&self, network: Network) -> Address {
        Address::p2pkh(&self.public, network)
    }

    /// ECDSA signature over a 32-byte sighash, low-S normalized.
    pub fn sign_digest(&self, digest: [u8; 32]) -> ecdsa::Signature {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(digest);
        secp.sign_ecdsa(&msg, &self.key.inner)
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.key.inner.non_secure_erase();
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.public.to_string())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn bip39_seed_vector() {
        // BIP39 reference vector for the all-"abandon" phrase with passphrase "TREZOR".
        let seed = Seed::from_mnemonic(PHRASE, "TREZOR").unwrap();
        assert_eq!(
            &seed.as_bytes()[..8],
            &[0xc5, 0x52, 0x57, 0xc3, 0x60, 0xc0, 0x7c, 0x72]
        );
    }

    #[test]
    fn mnemonic_whitespace_normalized() {
        let messy = PHRASE.replace(' ', "   ").to_uppercase();
        let a = MasterKeys::from_mnemonic(PHRASE, Network::Mainnet).unwrap();
        let b = MasterKeys::from_mnemonic(&messy, Network::Mainnet).unwrap();
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn invalid_mnemonic_rejected() {
        let err = Seed::from_mnemonic("abandon abandon invalidword", "").unwrap_err();
        assert!(matches!(err, WalletError::InvalidMnemonic(_)));
    }

    #[test]
    fn generated_mnemonic_parses() {
        let phrase = generate_mnemonic();
        assert_eq!(phrase.split_whitespace().count(), 24);
        assert!(Seed::from_mnemonic(&phrase, "").is_ok());
    }

    #[test]
    fn master_public_matches_private() {
        let keys = MasterKeys::from_mnemonic(PHRASE, Network::Testnet).unwrap();
        let signing = SigningKey::from_xpriv(keys.private());
        assert_eq!(signing.public_key().inner, keys.public().public_key);
    }

    #[test]
    fn derived_keys_are_deterministic() {
        let keys = MasterKeys::from_mnemonic(PHRASE, Network::Mainnet).unwrap();
        let path = DerivationPath::from_str("m/44'/121'/0'/0/0").unwrap();
        let a = keys.derive(&path, Network::Mainnet).unwrap();
        let b = keys.derive(&path, Network::Mainnet).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key().inner, keys.public().public_key);
    }

    #[test]
    fn wif_roundtrip() {
        let key = SigningKey::from_secret_bytes(&[7u8; 32]).unwrap();
        let wif = key.key.to_wif();
        let back = SigningKey::from_wif(&wif).unwrap();
        assert_eq!(key.public_key(), back.public_key());
        assert!(SigningKey::from_wif("not-a-key").is_err());
    }

    #[test]
    fn signatures_verify() {
        let key = SigningKey::from_secret_bytes(&[9u8; 32]).unwrap();
        let digest = [0x42; 32];
        let sig = key.sign_digest(digest);
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest(digest);
        assert!(secp.verify_ecdsa(&msg, &sig, &key.public_key().inner).is_ok());
    }

    #[test]
    fn debug_redacts_secret() {
        let key = SigningKey::from_secret_bytes(&[1u8; 32]).unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
