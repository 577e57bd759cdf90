//! Value/age greedy coin selection.
//!
//! Coins are ranked by `value * confirmations` so large, well-buried coins are
//! spent first, then taken greedily until the target is covered. There is no
//! minimum change at this stage; the transaction builder decides what to do
//! with the excess.

use zen_core::types::Coin;

use crate::error::WalletError;

/// Largest number of inputs a selection may use.
pub const DEFAULT_MAX_INPUTS: usize = 10_000;

/// Coins chosen to cover a target and their combined value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    /// Selected coins in selection order.
    pub coins: Vec<Coin>,
    /// Sum of the selected coin values in zatoshi.
    pub total: u64,
}

/// Strategy for choosing which coins fund a transaction.
pub trait CoinSelector: Send + Sync {
    /// Choose coins from `available` whose total covers `target`.
    ///
    /// Fails with [`WalletError::InsufficientFunds`] rather than returning a
    /// selection that falls short.
    fn select(&self, target: u64, available: &[Coin]) -> Result<CoinSelection, WalletError>;
}

/// Greedy selector preferring the highest value-age product.
#[derive(Debug, Clone, Copy)]
pub struct MaxValueAgeSelector {
    pub max_inputs: usize,
}

impl Default for MaxValueAgeSelector {
    fn default() -> Self {
        Self { max_inputs: DEFAULT_MAX_INPUTS }
    }
}

impl CoinSelector for MaxValueAgeSelector {
    fn select(&self, target: u64, available: &[Coin]) -> Result<CoinSelection, WalletError> {
        let mut ranked: Vec<&Coin> = available.iter().collect();
        // Ties fall back to value then outpoint so the order never depends on
        // the order the node listed coins in.
        ranked.sort_by(|a, b| {
            b.value_age()
                .cmp(&a.value_age())
                .then(b.value.cmp(&a.value))
                .then(a.outpoint.cmp(&b.outpoint))
        });

        let mut selection = CoinSelection { coins: Vec::new(), total: 0 };
        for coin in ranked {
            if selection.total >= target {
                break;
            }
            if selection.coins.len() == self.max_inputs {
                break;
            }
            selection.total = selection.total.saturating_add(coin.value);
            selection.coins.push(coin.clone());
        }

        if selection.total < target {
            let have = available.iter().fold(0u64, |acc, c| acc.saturating_add(c.value));
            return Err(WalletError::InsufficientFunds { have, need: target });
        }
        Ok(selection)
    }
}
