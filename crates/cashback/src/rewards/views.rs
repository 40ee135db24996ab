use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::calculator::{ComponentReward, RewardComponent};
use super::domain::{
    CalculationBasis, CardId, ChannelId, PaymentMethodId, RewardConfig, RewardConfigId,
    RoundingMethod, SchemeId,
};
use super::matcher::MatchTier;
use super::quota::QuotaView;

/// A channel given either by id or by free text to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSelector {
    Id(ChannelId),
    Keyword(String),
}

impl ChannelSelector {
    /// Numeric input is an id, anything else a keyword.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(id) => ChannelSelector::Id(ChannelId(id)),
            Err(_) => ChannelSelector::Keyword(raw.to_string()),
        }
    }
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelector::Id(id) => write!(f, "#{}", id.0),
            ChannelSelector::Keyword(keyword) => f.write_str(keyword),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelQuery {
    pub channels: Vec<ChannelSelector>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelQueryResult {
    pub selector: ChannelSelector,
    /// Empty when a keyword resolved to no channel.
    pub matches: Vec<ChannelRewards>,
}

/// Schemes and payment methods relevant to one channel. Excluded candidates
/// are listed first so callers can show why a usually good card does not
/// apply; included candidates are ranked by total percentage.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelRewards {
    pub channel_id: ChannelId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_tier: Option<MatchTier>,
    pub excluded: Vec<RewardCandidate>,
    pub included: Vec<RewardCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateSource {
    Scheme {
        scheme_id: SchemeId,
        card_id: CardId,
        card_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        shared_from: Option<SchemeId>,
    },
    PaymentMethod {
        payment_method_id: PaymentMethodId,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RewardCandidate {
    pub source: CandidateSource,
    pub name: String,
    pub total_percentage: Decimal,
    pub components: Vec<CandidateComponent>,
    /// Sum of the rounded components when the query carried an amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_reward: Option<Decimal>,
    pub is_excluded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_by: Option<String>,
    pub requires_switch: bool,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_end: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateComponent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_config_id: Option<RewardConfigId>,
    pub percentage: Decimal,
    pub method: RoundingMethod,
    pub calculation_basis: CalculationBasis,
    pub quota_limit: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalculationRequest {
    pub amount: Decimal,
    pub components: Vec<RewardComponent>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemeCalculationRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub scheme_id: Option<SchemeId>,
    #[serde(default)]
    pub payment_method_id: Option<PaymentMethodId>,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

/// Preview of a transaction: nothing here has been persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SchemeCalculation {
    pub amount: Decimal,
    pub as_of: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme_id: Option<SchemeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<PaymentMethodId>,
    pub breakdown: Vec<ComponentReward>,
    pub total: Decimal,
    /// Total after each component is capped by its remaining quota.
    pub payable_total: Decimal,
    pub quota_projection: Vec<QuotaProjection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaProjection {
    pub reward_config_id: RewardConfigId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<PaymentMethodId>,
    pub quota_limit: Option<Decimal>,
    pub used_before: Decimal,
    pub remaining_before: Option<Decimal>,
    pub used_after: Decimal,
    pub remaining_after: Option<Decimal>,
    pub reward: Decimal,
    pub payable: Decimal,
    pub refreshed: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConsumption {
    pub reward_config_id: RewardConfigId,
    #[serde(default)]
    pub payment_method_id: Option<PaymentMethodId>,
    /// Transaction amount; the reward it earns is what the quota is debited.
    pub amount: Decimal,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaAdjustment {
    pub reward_config_id: RewardConfigId,
    #[serde(default)]
    pub payment_method_id: Option<PaymentMethodId>,
    /// Signed change to the used amount.
    pub delta: Decimal,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaPostingView {
    pub reward: Decimal,
    pub payable: Decimal,
    pub quota: QuotaView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveRewards {
    pub scheme_id: SchemeId,
    pub source_scheme_id: SchemeId,
    pub is_shared: bool,
    pub configs: Vec<RewardConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SharedGroupAssignment {
    pub source_scheme_id: Option<SchemeId>,
}
