//! Coin gathering: the node's unspent set paired with signing keys.
//!
//! Bindings are rebuilt on every pass and dropped afterwards so exported
//! private keys never outlive the operation that needed them.

use std::str::FromStr;

use bitcoin::{OutPoint, ScriptBuf, Txid};
use tracing::debug;

use zen_core::address::{Address, Network};
use zen_core::traits::{NodeGateway, UnspentOutput};
use zen_core::types::{zen_to_zat, Coin};

use crate::error::WalletError;
use crate::keys::SigningKey;

/// A spendable coin and the key that can sign for it.
#[derive(Debug)]
pub struct SigningKeyBinding {
    pub coin: Coin,
    /// Address the coin pays to.
    pub address: Address,
    pub key: SigningKey,
}

/// Decode one node-reported unspent output into a [`Coin`] and its address.
pub fn decode_unspent(utxo: &UnspentOutput, network: Network) -> Result<(Coin, Address), WalletError> {
    let txid = Txid::from_str(&utxo.txid)
        .map_err(|e| WalletError::MalformedNodeResponse(format!("txid {}: {e}", utxo.txid)))?;
    let script_bytes = hex::decode(&utxo.script_pub_key)
        .map_err(|e| WalletError::MalformedNodeResponse(format!("scriptPubKey of {}: {e}", utxo.txid)))?;
    if script_bytes.is_empty() {
        return Err(WalletError::MalformedNodeResponse(format!("empty scriptPubKey for {}", utxo.txid)));
    }
    let script_pubkey = ScriptBuf::from_bytes(script_bytes);
    let address = match &utxo.address {
        Some(a) => Address::decode(a, network)?,
        None => Address::from_script(&script_pubkey, network)?,
    };
    let value = zen_to_zat(utxo.amount);
    if value < 0 {
        return Err(WalletError::MalformedNodeResponse(format!("negative amount for {}", utxo.txid)));
    }
    let coin = Coin {
        outpoint: OutPoint::new(txid, utxo.vout),
        value: value as u64,
        confirmations: utxo.confirmations,
        script_pubkey,
    };
    Ok((coin, address))
}

/// Every spendable coin, without exporting keys.
pub async fn spendable_coins(gateway: &dyn NodeGateway, network: Network) -> Result<Vec<Coin>, WalletError> {
    gateway
        .list_unspent()
        .await?
        .iter()
        .filter(|u| u.spendable)
        .map(|u| decode_unspent(u, network).map(|(coin, _)| coin))
        .collect()
}

/// Collect every spendable coin with its signing key.
///
/// Non-spendable entries are skipped. Any failure for an individual coin
/// fails the whole pass; a partial coin set is never returned.
pub async fn gather_coins(
    gateway: &dyn NodeGateway,
    network: Network,
) -> Result<Vec<SigningKeyBinding>, WalletError> {
    let unspent = gateway.list_unspent().await?;
    let mut bindings = Vec::with_capacity(unspent.len());
    for utxo in unspent.iter().filter(|u| u.spendable) {
        let (coin, address) = decode_unspent(utxo, network)?;
        let wif = gateway.dump_private_key(&address).await?;
        let key = SigningKey::from_wif(&wif)
            .map_err(|e| WalletError::MalformedNodeResponse(format!("key for {address}: {e}")))?;
        bindings.push(SigningKeyBinding { coin, address, key });
    }
    debug!(
        reported = unspent.len(),
        spendable = bindings.len(),
        "gathered coins"
    );
    Ok(bindings)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_gateway::MockGateway;
    use bitcoin::hashes::Hash;
    use bitcoin::PrivateKey;
    use zen_core::script::ReplayProtection;

    /// An unspent output paying to `key`'s address, and the key's WIF.
    pub(crate) fn owned_utxo(seed: u8, amount_zat: u64, confirmations: u32) -> (UnspentOutput, String) {
        let key = PrivateKey::from_slice(&[seed; 32], bitcoin::NetworkKind::Test).unwrap();
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let address = Address::p2pkh(&key.public_key(&secp), Network::Regtest);
        let replay = ReplayProtection::new(crate::test_gateway::block_hash_at(700), 700);
        let utxo = UnspentOutput {
            txid: Txid::from_byte_array([seed; 32]).to_string(),
            vout: seed as u32 % 3,
            address: Some(address.to_string()),
            script_pub_key: hex::encode(address.script_pubkey(&replay).as_bytes()),
            amount: amount_zat as f64 / 1e8,
            confirmations,
            spendable: true,
        };
        (utxo, key.to_wif())
    }

    #[tokio::test]
    async fn gathers_spendable_coins_with_keys() {
        let gateway = MockGateway::new();
        let (a, wif_a) = owned_utxo(1, 30_000, 6);
        let (mut b, wif_b) = owned_utxo(2, 40_000, 2);
        b.spendable = false;
        gateway.add_unspent(a.clone(), Some(&wif_a));
        gateway.add_unspent(b, Some(&wif_b));

        let bindings = gather_coins(&gateway, Network::Regtest).await.unwrap();
        assert_eq!(bindings.len(), 1);
        let binding = &bindings[0];
        assert_eq!(binding.coin.value, 30_000);
        assert_eq!(binding.coin.confirmations, 6);
        assert_eq!(binding.key.address(Network::Regtest), binding.address);
        assert_eq!(binding.address.to_string(), a.address.unwrap());
    }

    #[tokio::test]
    async fn missing_key_fails_the_whole_pass() {
        let gateway = MockGateway::new();
        let (a, wif_a) = owned_utxo(1, 30_000, 6);
        let (b, _) = owned_utxo(2, 40_000, 2);
        gateway.add_unspent(a, Some(&wif_a));
        gateway.add_unspent(b, None);
        let err = gather_coins(&gateway, Network::Regtest).await.unwrap_err();
        assert!(matches!(err, WalletError::NodeUnavailable(_)));
    }

    #[tokio::test]
    async fn undecodable_entry_fails_the_whole_pass() {
        let gateway = MockGateway::new();
        let (mut a, wif_a) = owned_utxo(1, 30_000, 6);
        a.txid = "zz".into();
        gateway.add_unspent(a, Some(&wif_a));
        let err = gather_coins(&gateway, Network::Regtest).await.unwrap_err();
        assert!(matches!(err, WalletError::MalformedNodeResponse(_)));
    }

    #[tokio::test]
    async fn foreign_network_address_rejected() {
        let gateway = MockGateway::new();
        let (a, wif_a) = owned_utxo(1, 30_000, 6);
        gateway.add_unspent(a, Some(&wif_a));
        let err = gather_coins(&gateway, Network::Mainnet).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn spendable_coins_skip_key_export() {
        let gateway = MockGateway::new();
        let (a, _) = owned_utxo(1, 30_000, 6);
        let (mut b, _) = owned_utxo(2, 40_000, 2);
        b.spendable = false;
        gateway.add_unspent(a, None);
        gateway.add_unspent(b, None);
        let coins = spendable_coins(&gateway, Network::Regtest).await.unwrap();
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].value, 30_000);
    }

    #[test]
    fn address_recovered_from_script_when_absent() {
        let (mut a, _) = owned_utxo(4, 1_000, 1);
        let expected = a.address.take().unwrap();
        let (_, address) = decode_unspent(&a, Network::Regtest).unwrap();
        assert_eq!(address.to_string(), expected);
    }
}
