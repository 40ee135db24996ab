use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::refresh::{PeriodMarker, QuotaPolicy};
use crate::rewards::calculator::{checked_sum, CalculationError, RewardCalculator};
use crate::rewards::domain::{
    CalculationBasis, PaymentMethodId, QuotaRefreshType, RewardConfig, RewardConfigId,
};
use crate::rewards::validation::ValidationError;

/// Ledger row key. The payment method is present when a scheme's config is
/// tracked separately per payment-method pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaKey {
    pub reward_config_id: RewardConfigId,
    #[serde(default)]
    pub payment_method_id: Option<PaymentMethodId>,
}

impl QuotaKey {
    pub const fn new(
        reward_config_id: RewardConfigId,
        payment_method_id: Option<PaymentMethodId>,
    ) -> Self {
        Self {
            reward_config_id,
            payment_method_id,
        }
    }
}

/// Persisted consumption of one quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub key: QuotaKey,
    /// Reward currency drawn against the cap in the current period.
    pub used_amount: Decimal,
    /// Transaction spend accumulated in the current period.
    #[serde(default)]
    pub basis_amount: Decimal,
    #[serde(default)]
    pub last_refresh_marker: Option<PeriodMarker>,
    /// Bumped by the store on every successful write.
    #[serde(default)]
    pub version: u64,
}

impl QuotaState {
    /// Row for a quota that has never been consumed.
    pub fn new(key: QuotaKey) -> Self {
        Self {
            key,
            used_amount: Decimal::ZERO,
            basis_amount: Decimal::ZERO,
            last_refresh_marker: None,
            version: 0,
        }
    }
}

/// Failure to draw against a quota.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Calculation(#[from] CalculationError),
}

/// Result of drawing one transaction against a quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// State after any lazy refresh, before the transaction.
    pub before: QuotaState,
    pub after: QuotaState,
    /// Reward earned by the transaction, ignoring the cap.
    pub reward: Decimal,
    /// Portion of `reward` still covered by the cap.
    pub payable: Decimal,
    pub refreshed: bool,
}

/// Pure quota arithmetic. Every operation takes a state and returns a new
/// one, so callers can persist the result with a single conditional write.
pub struct QuotaLedger;

impl QuotaLedger {
    /// `None` when unlimited, otherwise `max(0, limit - used)`.
    pub fn remaining(state: &QuotaState, limit: Option<Decimal>) -> Option<Decimal> {
        limit.map(|limit| (limit - state.used_amount).max(Decimal::ZERO))
    }

    pub fn should_refresh(state: &QuotaState, policy: &QuotaPolicy, as_of: NaiveDate) -> bool {
        match (policy.marker(as_of), &state.last_refresh_marker) {
            (Some(current), Some(last)) => &current != last,
            _ => false,
        }
    }

    /// Applies the lazy refresh for `as_of`. A state without a marker is
    /// stamped with the current period and keeps its usage.
    pub fn refreshed(state: &QuotaState, policy: &QuotaPolicy, as_of: NaiveDate) -> QuotaState {
        let Some(current) = policy.marker(as_of) else {
            return state.clone();
        };

        let mut next = state.clone();
        if Self::should_refresh(state, policy, as_of) {
            next.used_amount = Decimal::ZERO;
            next.basis_amount = Decimal::ZERO;
        }
        next.last_refresh_marker = Some(current);
        next
    }

    /// `used = max(0, used + delta)`.
    pub fn apply_adjustment(state: &QuotaState, delta: Decimal) -> Result<QuotaState, CalculationError> {
        let mut next = state.clone();
        next.used_amount = checked_sum(state.used_amount, delta)?.max(Decimal::ZERO);
        Ok(next)
    }

    /// Draws `reward` currency units against the cap.
    pub fn consume(state: &QuotaState, reward: Decimal) -> Result<QuotaState, LedgerError> {
        if reward < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount {
                field: "reward",
                value: reward,
            }
            .into());
        }
        Ok(Self::apply_adjustment(state, reward)?)
    }

    /// Reward earned by a transaction of `amount` given the spend already
    /// recorded in the period. Statement-total quotas earn on the running total.
    pub fn transaction_reward(
        config: &RewardConfig,
        state: &QuotaState,
        amount: Decimal,
    ) -> Result<Decimal, CalculationError> {
        let calculate = |value: Decimal| {
            RewardCalculator::calculate(value, config.percentage, config.calculation_method)
        };

        match config.calculation_basis {
            CalculationBasis::PerTransaction => calculate(amount),
            CalculationBasis::StatementTotal => {
                let total = state
                    .basis_amount
                    .checked_add(amount)
                    .ok_or(CalculationError::Overflow {
                        amount,
                        percentage: config.percentage,
                    })?;
                Ok(calculate(total)? - calculate(state.basis_amount)?)
            }
        }
    }

    /// Refreshes, earns and consumes in one step. `amount` must be non-negative.
    pub fn post(
        state: &QuotaState,
        config: &RewardConfig,
        policy: &QuotaPolicy,
        amount: Decimal,
        as_of: NaiveDate,
    ) -> Result<Posting, LedgerError> {
        let refreshed = Self::should_refresh(state, policy, as_of);
        let before = Self::refreshed(state, policy, as_of);
        let reward = Self::transaction_reward(config, &before, amount)?;
        let payable = Self::remaining(&before, policy.limit)
            .map_or(reward, |remaining| reward.min(remaining));

        let mut after = Self::consume(&before, reward)?;
        after.basis_amount = checked_sum(before.basis_amount, amount)?;

        Ok(Posting {
            before,
            after,
            reward,
            payable,
            refreshed,
        })
    }

    pub fn view(state: &QuotaState, policy: &QuotaPolicy, refreshed: bool) -> QuotaView {
        QuotaView {
            reward_config_id: state.key.reward_config_id,
            payment_method_id: state.key.payment_method_id,
            quota_limit: policy.limit,
            used_amount: state.used_amount,
            remaining_amount: Self::remaining(state, policy.limit),
            basis_amount: state.basis_amount,
            refresh_type: policy.refresh.refresh_type(),
            last_refresh_marker: state.last_refresh_marker.clone(),
            refreshed,
        }
    }
}

/// Read model of a quota after lazy refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaView {
    pub reward_config_id: RewardConfigId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<PaymentMethodId>,
    pub quota_limit: Option<Decimal>,
    pub used_amount: Decimal,
    pub remaining_amount: Option<Decimal>,
    pub basis_amount: Decimal,
    pub refresh_type: QuotaRefreshType,
    pub last_refresh_marker: Option<PeriodMarker>,
    /// Whether reading crossed a refresh boundary.
    pub refreshed: bool,
}
