//! Fee rate lookup and size-based fee estimates.

use std::sync::Arc;

use bitcoin::TxOut;
use tracing::{debug, warn};

use zen_core::traits::NodeGateway;
use zen_core::txsize::{self, InputKind};
use zen_core::types::{zen_to_zat, FeeLevel, FeeRate};

/// Maps fee urgency to a rate using the node's fee oracle.
///
/// Falls back to a fixed default when the oracle errors, has no estimate,
/// or the level has no confirmation target.
#[derive(Clone)]
pub struct FeeEstimator {
    gateway: Arc<dyn NodeGateway>,
    default_rate: FeeRate,
    use_oracle: bool,
}

impl FeeEstimator {
    pub fn new(gateway: Arc<dyn NodeGateway>, default_rate: FeeRate, use_oracle: bool) -> Self {
        Self { gateway, default_rate, use_oracle }
    }

    pub fn default_rate(&self) -> FeeRate {
        self.default_rate
    }

    /// Fee rate for `level`. Never fails.
    pub async fn rate(&self, level: FeeLevel) -> FeeRate {
        let Some(target) = level.target_blocks() else {
            return self.default_rate;
        };
        if !self.use_oracle {
            return self.default_rate;
        }
        match self.gateway.estimate_fee(target).await {
            Ok(zen_per_kb) => {
                let zat_per_kb = zen_to_zat(zen_per_kb);
                if zat_per_kb <= 0 {
                    debug!(%level, target, "fee oracle has no estimate, using default");
                    self.default_rate
                } else {
                    FeeRate::from_per_kb(zat_per_kb as u64)
                }
            }
            Err(e) => {
                warn!(%level, target, error = %e, "fee oracle failed, using default");
                self.default_rate
            }
        }
    }
}

/// Fee for spending `input_count` inputs of `kind` to `outputs` at `rate`,
/// with no change output.
pub fn estimate_fee(input_count: usize, outputs: &[TxOut], rate: FeeRate, kind: InputKind) -> u64 {
    rate.fee_for_size(txsize::estimate_serialize_size(input_count, outputs, false, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_gateway::MockGateway;
    use bitcoin::{Amount, ScriptBuf};
    use zen_core::constants::DEFAULT_FEE_PER_KB;
    use zen_core::error::GatewayError;

    fn estimator(gateway: MockGateway) -> FeeEstimator {
        FeeEstimator::new(Arc::new(gateway), FeeRate::from_per_kb(DEFAULT_FEE_PER_KB), true)
    }

    #[tokio::test]
    async fn oracle_rate_keeps_sub_byte_precision() {
        let gateway = MockGateway::new();
        gateway.set_fee_estimate(3, Ok(0.000_015));
        let rate = estimator(gateway).rate(FeeLevel::Normal).await;
        assert_eq!(rate, FeeRate::from_per_kb(1_500));
    }

    #[tokio::test]
    async fn levels_use_their_targets() {
        let gateway = MockGateway::new();
        gateway.set_fee_estimate(1, Ok(0.001));
        gateway.set_fee_estimate(6, Ok(0.000_01));
        let est = estimator(gateway);
        assert_eq!(est.rate(FeeLevel::Priority).await, FeeRate::from_per_kb(100_000));
        assert_eq!(est.rate(FeeLevel::Economic).await, FeeRate::from_per_kb(1_000));
    }

    #[tokio::test]
    async fn falls_back_on_non_positive_estimate() {
        let gateway = MockGateway::new();
        gateway.set_fee_estimate(3, Ok(-1.0));
        assert_eq!(estimator(gateway).rate(FeeLevel::Normal).await.per_kb(), DEFAULT_FEE_PER_KB);
    }

    #[tokio::test]
    async fn falls_back_on_oracle_error() {
        let gateway = MockGateway::new();
        gateway.set_fee_estimate(1, Err(GatewayError::Unavailable("timeout".into())));
        assert_eq!(estimator(gateway).rate(FeeLevel::Priority).await.per_kb(), DEFAULT_FEE_PER_KB);
    }

    #[tokio::test]
    async fn fee_bump_always_uses_default() {
        let gateway = MockGateway::new();
        gateway.set_fee_estimate(1, Ok(0.01));
        gateway.set_fee_estimate(3, Ok(0.01));
        gateway.set_fee_estimate(6, Ok(0.01));
        assert_eq!(estimator(gateway).rate(FeeLevel::FeeBump).await.per_kb(), DEFAULT_FEE_PER_KB);
    }

    #[tokio::test]
    async fn oracle_can_be_disabled() {
        let gateway = MockGateway::new();
        gateway.set_fee_estimate(3, Ok(0.01));
        let est = FeeEstimator::new(Arc::new(gateway), FeeRate::from_per_kb(7_000), false);
        assert_eq!(est.rate(FeeLevel::Normal).await.per_kb(), 7_000);
    }

    #[test]
    fn threshold_inputs_cost_more() {
        let outs = vec![TxOut { value: Amount::from_sat(10_000), script_pubkey: ScriptBuf::from_bytes(vec![0; 64]) }];
        let rate = FeeRate::from_per_byte(10);
        let single = estimate_fee(2, &outs, rate, InputKind::P2pkh);
        let multi = estimate_fee(2, &outs, rate, InputKind::P2shMultisig { required: 2, total: 3 });
        assert!(multi > single);
        assert_eq!(single % 10, 0);
    }
}
