use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::domain::{RewardConfigId, RoundingMethod};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalculationError {
    #[error("reward for amount {amount} at {percentage}% overflows")]
    Overflow { amount: Decimal, percentage: Decimal },
    #[error("adding {addend} to {total} overflows")]
    TotalOverflow { total: Decimal, addend: Decimal },
}

/// `total + addend`, reporting overflow instead of panicking.
pub fn checked_sum(total: Decimal, addend: Decimal) -> Result<Decimal, CalculationError> {
    total
        .checked_add(addend)
        .ok_or(CalculationError::TotalOverflow { total, addend })
}

/// One percentage/rounding pair of a multi-part reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardComponent {
    pub percentage: Decimal,
    #[serde(default)]
    pub method: RoundingMethod,
}

impl RewardComponent {
    pub const fn new(percentage: Decimal, method: RoundingMethod) -> Self {
        Self { percentage, method }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentReward {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_config_id: Option<RewardConfigId>,
    pub percentage: Decimal,
    pub method: RoundingMethod,
    pub reward: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub amount: Decimal,
    pub components: Vec<ComponentReward>,
    pub total_percentage: Decimal,
    pub total: Decimal,
}

/// `amount × percentage / 100`, rounded to a whole currency unit.
///
/// `Round` is half away from zero, which for the non-negative inputs the
/// engine accepts is the familiar round-half-up (2.5 → 3).
pub struct RewardCalculator;

impl RewardCalculator {
    pub fn calculate(
        amount: Decimal,
        percentage: Decimal,
        method: RoundingMethod,
    ) -> Result<Decimal, CalculationError> {
        let raw = Self::raw(amount, percentage)?;
        let rounded = match method {
            RoundingMethod::Round => {
                raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            }
            RoundingMethod::Floor => raw.floor(),
            RoundingMethod::Ceil => raw.ceil(),
        };
        Ok(rounded.normalize())
    }

    /// Unrounded reward, used when the caller needs the exact figure.
    pub fn raw(amount: Decimal, percentage: Decimal) -> Result<Decimal, CalculationError> {
        amount
            .checked_mul(percentage)
            .and_then(|product| product.checked_div(HUNDRED))
            .ok_or(CalculationError::Overflow { amount, percentage })
    }

    /// Rounds each component on its own and sums afterwards, since every
    /// component may use a different method.
    pub fn breakdown<'a, I>(amount: Decimal, components: I) -> Result<RewardBreakdown, CalculationError>
    where
        I: IntoIterator<Item = (Option<RewardConfigId>, &'a RewardComponent)>,
    {
        let mut rewards = Vec::new();
        let mut total = Decimal::ZERO;
        let mut total_percentage = Decimal::ZERO;

        for (reward_config_id, component) in components {
            let reward = Self::calculate(amount, component.percentage, component.method)?;
            total = total.checked_add(reward).ok_or(CalculationError::Overflow {
                amount,
                percentage: component.percentage,
            })?;
            total_percentage = checked_sum(total_percentage, component.percentage)?;
            rewards.push(ComponentReward {
                reward_config_id,
                percentage: component.percentage,
                method: component.method,
                reward,
            });
        }

        Ok(RewardBreakdown {
            amount,
            components: rewards,
            total_percentage: total_percentage.normalize(),
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn calc(amount: Decimal, percentage: Decimal, method: RoundingMethod) -> Decimal {
        RewardCalculator::calculate(amount, percentage, method).expect("no overflow")
    }

    #[test]
    fn mixed_components_round_before_summing() {
        let components = [
            RewardComponent::new(dec!(0.3), RoundingMethod::Round),
            RewardComponent::new(dec!(2.7), RoundingMethod::Round),
            RewardComponent::new(dec!(0), RoundingMethod::Floor),
        ];
        let breakdown =
            RewardCalculator::breakdown(dec!(1000), components.iter().map(|c| (None, c)))
                .expect("breakdown");

        let rewards: Vec<Decimal> = breakdown.components.iter().map(|c| c.reward).collect();
        assert_eq!(rewards, vec![dec!(3), dec!(27), dec!(0)]);
        assert_eq!(breakdown.total, dec!(30));
        assert_eq!(breakdown.total_percentage, dec!(3));
    }

    #[test]
    fn summing_after_rounding_differs_from_rounding_the_sum() {
        let components = [
            RewardComponent::new(dec!(0.5), RoundingMethod::Floor),
            RewardComponent::new(dec!(0.5), RoundingMethod::Floor),
        ];
        // 199 × 0.5% = 0.995 each → floor 0 + 0, while 1% of 199 floors to 1.
        let breakdown =
            RewardCalculator::breakdown(dec!(199), components.iter().map(|c| (None, c)))
                .expect("breakdown");
        assert_eq!(breakdown.total, dec!(0));
        assert_eq!(calc(dec!(199), dec!(1), RoundingMethod::Floor), dec!(1));
    }

    #[test]
    fn round_is_half_up_for_positive_values() {
        assert_eq!(calc(dec!(250), dec!(1), RoundingMethod::Round), dec!(3));
        assert_eq!(calc(dec!(50), dec!(1), RoundingMethod::Round), dec!(1));
        assert_eq!(calc(dec!(350), dec!(1), RoundingMethod::Round), dec!(4));
        assert_eq!(calc(dec!(249), dec!(1), RoundingMethod::Round), dec!(2));
    }

    #[test]
    fn floor_and_ceil_bracket_round() {
        let amounts = [dec!(0), dec!(1), dec!(99), dec!(123.45), dec!(1000), dec!(98765)];
        let percentages = [dec!(0), dec!(0.3), dec!(1), dec!(2.5), dec!(3.33), dec!(10)];

        for amount in amounts {
            for percentage in percentages {
                let floor = calc(amount, percentage, RoundingMethod::Floor);
                let round = calc(amount, percentage, RoundingMethod::Round);
                let ceil = calc(amount, percentage, RoundingMethod::Ceil);
                assert!(floor <= round && round <= ceil, "{amount} @ {percentage}%");

                let raw = RewardCalculator::raw(amount, percentage).expect("raw");
                if raw.fract().is_zero() {
                    assert_eq!(floor, ceil);
                    assert_eq!(floor, round);
                }
            }
        }
    }

    #[test]
    fn rewards_are_whole_units() {
        let reward = calc(dec!(1234), dec!(1.5), RoundingMethod::Ceil);
        assert_eq!(reward, dec!(19));
        assert_eq!(reward.scale(), 0);
    }

    #[test]
    fn overflow_is_reported() {
        let err = RewardCalculator::calculate(Decimal::MAX, dec!(200), RoundingMethod::Round)
            .expect_err("overflow");
        assert!(matches!(err, CalculationError::Overflow { .. }));
    }

    #[test]
    fn percentage_total_overflow_is_reported() {
        let components = [
            RewardComponent::new(Decimal::MAX, RoundingMethod::Floor),
            RewardComponent::new(Decimal::MAX, RoundingMethod::Floor),
        ];
        let err = RewardCalculator::breakdown(dec!(0), components.iter().map(|c| (None, c)))
            .expect_err("percentages overflow");
        assert!(matches!(err, CalculationError::TotalOverflow { .. }));
    }
}
