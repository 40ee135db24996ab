use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::validation::ValidationError;

/// Identifier wrapper for channels (merchants or spending categories).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemeId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethodId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RewardConfigId(pub i64);

impl From<ChannelId> for i64 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl From<CardId> for i64 {
    fn from(id: CardId) -> Self {
        id.0
    }
}

impl From<SchemeId> for i64 {
    fn from(id: SchemeId) -> Self {
        id.0
    }
}

impl From<PaymentMethodId> for i64 {
    fn from(id: PaymentMethodId) -> Self {
        id.0
    }
}

impl From<RewardConfigId> for i64 {
    fn from(id: RewardConfigId) -> Self {
        id.0
    }
}

/// Entity families referenced by errors and reorder requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Channel,
    Card,
    Scheme,
    PaymentMethod,
    RewardConfig,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::Channel => "channel",
            EntityKind::Card => "card",
            EntityKind::Scheme => "scheme",
            EntityKind::PaymentMethod => "payment method",
            EntityKind::RewardConfig => "reward config",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const ALIAS_OPENERS: [char; 2] = ['(', '（'];
const ALIAS_CLOSERS: [char; 2] = [')', '）'];
const ALIAS_SEPARATORS: [char; 3] = [',', '，', '、'];

/// Parsed form of a channel display name such as `"全聯福利中心 (全聯, PX Mart)"`.
///
/// The base name is the text before a trailing parenthesised group and the
/// aliases are the comma-separated contents of that group. Lower-cased keys are
/// computed once here so matching never has to re-parse the display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelName {
    base: String,
    aliases: Vec<String>,
    base_key: String,
    alias_keys: Vec<String>,
    display_key: String,
}

impl ChannelName {
    pub fn parse(display_name: &str) -> Self {
        let trimmed = display_name.trim();
        let (base, aliases) = split_alias_group(trimmed)
            .unwrap_or_else(|| (trimmed.to_string(), Vec::new()));

        let base_key = match_key(&base);
        let alias_keys = aliases.iter().map(|alias| match_key(alias)).collect();

        Self {
            base,
            aliases,
            base_key,
            alias_keys,
            display_key: match_key(trimmed),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub(crate) fn base_key(&self) -> &str {
        &self.base_key
    }

    pub(crate) fn alias_keys(&self) -> &[String] {
        &self.alias_keys
    }

    pub(crate) fn display_key(&self) -> &str {
        &self.display_key
    }
}

fn split_alias_group(trimmed: &str) -> Option<(String, Vec<String>)> {
    let closer = trimmed.chars().last().filter(|c| ALIAS_CLOSERS.contains(c))?;
    let close_at = trimmed.len() - closer.len_utf8();

    // Outermost group: nested brackets stay inside the alias text.
    let mut depth = 0usize;
    let (open_at, opener) = trimmed[..close_at].char_indices().rev().find(|(_, c)| {
        if ALIAS_CLOSERS.contains(c) {
            depth += 1;
        } else if ALIAS_OPENERS.contains(c) {
            if depth == 0 {
                return true;
            }
            depth -= 1;
        }
        false
    })?;
    let opener_len = opener.len_utf8();

    let base = trimmed[..open_at].trim();
    if base.is_empty() {
        return None;
    }

    let aliases = trimmed[open_at + opener_len..close_at]
        .split(ALIAS_SEPARATORS)
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .map(str::to_string)
        .collect();

    Some((base.to_string(), aliases))
}

/// Case-folded, trimmed form used for every keyword comparison.
pub(crate) fn match_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Merchant or spending category that rewards apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChannelRow", into = "ChannelRow")]
pub struct Channel {
    pub id: ChannelId,
    display_name: String,
    name: ChannelName,
    pub is_common: bool,
    pub display_order: i32,
}

impl Channel {
    pub fn new(id: ChannelId, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let name = ChannelName::parse(&display_name);
        Self {
            id,
            display_name,
            name,
            is_common: false,
            display_order: 0,
        }
    }

    pub fn common(mut self, is_common: bool) -> Self {
        self.is_common = is_common;
        self
    }

    pub fn ordered(mut self, display_order: i32) -> Self {
        self.display_order = display_order;
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Renames the channel, re-deriving the cached alias projection.
    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        self.name = ChannelName::parse(&self.display_name);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelRow {
    id: ChannelId,
    display_name: String,
    #[serde(default)]
    is_common: bool,
    #[serde(default)]
    display_order: i32,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel::new(row.id, row.display_name)
            .common(row.is_common)
            .ordered(row.display_order)
    }
}

impl From<Channel> for ChannelRow {
    fn from(channel: Channel) -> Self {
        ChannelRow {
            id: channel.id,
            display_name: channel.display_name,
            is_common: channel.is_common,
            display_order: channel.display_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub display_order: i32,
}

/// Channel a scheme or payment method applies to, with an optional remark
/// such as "online orders only".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelApplication {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub note: Option<String>,
}

/// Reward plan belonging to a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    pub id: SchemeId,
    pub card_id: CardId,
    pub name: String,
    #[serde(default)]
    pub requires_switch: bool,
    #[serde(default)]
    pub activity_start: Option<NaiveDate>,
    #[serde(default)]
    pub activity_end: Option<NaiveDate>,
    #[serde(default)]
    pub shared_reward_group_id: Option<SchemeId>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub applications: Vec<ChannelApplication>,
    #[serde(default)]
    pub exclusions: Vec<ChannelId>,
}

impl Scheme {
    /// Whether `date` falls inside the activity window; open ends are unbounded.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        let started = self.activity_start.map_or(true, |start| date >= start);
        let not_ended = self.activity_end.map_or(true, |end| date <= end);
        started && not_ended
    }
}

/// Standalone payment method (mobile wallet, store-value card, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub name: String,
    #[serde(default)]
    pub own_reward_percentage: Decimal,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub applications: Vec<ChannelApplication>,
    #[serde(default)]
    pub linked_schemes: Vec<SchemeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMethod {
    #[default]
    Round,
    Floor,
    Ceil,
}

impl RoundingMethod {
    pub const fn label(self) -> &'static str {
        match self {
            RoundingMethod::Round => "round",
            RoundingMethod::Floor => "floor",
            RoundingMethod::Ceil => "ceil",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "round" => Some(Self::Round),
            "floor" => Some(Self::Floor),
            "ceil" | "ceiling" => Some(Self::Ceil),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalculationBasis {
    #[default]
    PerTransaction,
    StatementTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaRefreshType {
    #[default]
    None,
    Monthly,
    Date,
    Activity,
}

impl QuotaRefreshType {
    pub const fn label(self) -> &'static str {
        match self {
            QuotaRefreshType::None => "none",
            QuotaRefreshType::Monthly => "monthly",
            QuotaRefreshType::Date => "date",
            QuotaRefreshType::Activity => "activity",
        }
    }
}

/// Refresh rule with its parameter folded in, so a monthly rule always has a
/// day and a date rule always has a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaRefresh {
    None,
    Monthly { day: u32 },
    Date { on: NaiveDate },
    Activity,
}

impl QuotaRefresh {
    pub fn from_parts(
        reward_config_id: RewardConfigId,
        refresh_type: QuotaRefreshType,
        value: Option<u32>,
        date: Option<NaiveDate>,
    ) -> Result<Self, ValidationError> {
        let unexpected = || ValidationError::UnexpectedRefreshParameter {
            reward_config_id,
            refresh_type: refresh_type.label(),
        };

        match refresh_type {
            QuotaRefreshType::None | QuotaRefreshType::Activity => {
                if value.is_some() || date.is_some() {
                    return Err(unexpected());
                }
                Ok(if refresh_type == QuotaRefreshType::None {
                    QuotaRefresh::None
                } else {
                    QuotaRefresh::Activity
                })
            }
            QuotaRefreshType::Monthly => {
                if date.is_some() {
                    return Err(unexpected());
                }
                let day = value.ok_or(ValidationError::MissingRefreshDay { reward_config_id })?;
                if !(1..=31).contains(&day) {
                    return Err(ValidationError::RefreshDayOutOfRange {
                        reward_config_id,
                        day,
                    });
                }
                Ok(QuotaRefresh::Monthly { day })
            }
            QuotaRefreshType::Date => {
                if value.is_some() {
                    return Err(unexpected());
                }
                let on = date.ok_or(ValidationError::MissingRefreshDate { reward_config_id })?;
                Ok(QuotaRefresh::Date { on })
            }
        }
    }

    pub fn refresh_type(self) -> QuotaRefreshType {
        match self {
            QuotaRefresh::None => QuotaRefreshType::None,
            QuotaRefresh::Monthly { .. } => QuotaRefreshType::Monthly,
            QuotaRefresh::Date { .. } => QuotaRefreshType::Date,
            QuotaRefresh::Activity => QuotaRefreshType::Activity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RewardOwner {
    Scheme(SchemeId),
    PaymentMethod(PaymentMethodId),
}

/// One percentage/rounding/quota rule within a scheme or payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RewardConfigRow", into = "RewardConfigRow")]
pub struct RewardConfig {
    pub id: RewardConfigId,
    pub owner: RewardOwner,
    pub percentage: Decimal,
    pub calculation_method: RoundingMethod,
    pub quota_limit: Option<Decimal>,
    pub quota_refresh: QuotaRefresh,
    pub calculation_basis: CalculationBasis,
    pub display_order: i32,
}

impl RewardConfig {
    /// Re-checks the numeric invariants for configs built in code rather than
    /// converted from a row.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.percentage < Decimal::ZERO {
            return Err(ValidationError::NegativePercentage {
                value: self.percentage,
            });
        }
        if let Some(limit) = self.quota_limit {
            if limit < Decimal::ZERO {
                return Err(ValidationError::NegativeQuotaLimit {
                    reward_config_id: self.id,
                    value: limit,
                });
            }
        }
        if let QuotaRefresh::Monthly { day } = self.quota_refresh {
            if !(1..=31).contains(&day) {
                return Err(ValidationError::RefreshDayOutOfRange {
                    reward_config_id: self.id,
                    day,
                });
            }
        }
        Ok(())
    }
}

/// Flat administrative row as stored by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfigRow {
    pub id: RewardConfigId,
    #[serde(default)]
    pub scheme_id: Option<SchemeId>,
    #[serde(default)]
    pub payment_method_id: Option<PaymentMethodId>,
    pub percentage: Decimal,
    #[serde(default)]
    pub calculation_method: RoundingMethod,
    #[serde(default)]
    pub quota_limit: Option<Decimal>,
    #[serde(default)]
    pub quota_refresh_type: QuotaRefreshType,
    #[serde(default)]
    pub quota_refresh_value: Option<u32>,
    #[serde(default)]
    pub quota_refresh_date: Option<NaiveDate>,
    #[serde(default)]
    pub calculation_basis: CalculationBasis,
    #[serde(default)]
    pub display_order: i32,
}

impl TryFrom<RewardConfigRow> for RewardConfig {
    type Error = ValidationError;

    fn try_from(row: RewardConfigRow) -> Result<Self, Self::Error> {
        let owner = match (row.scheme_id, row.payment_method_id) {
            (Some(scheme_id), None) => RewardOwner::Scheme(scheme_id),
            (None, Some(payment_method_id)) => RewardOwner::PaymentMethod(payment_method_id),
            (None, None) => {
                return Err(ValidationError::RewardOwnerMissing {
                    reward_config_id: row.id,
                })
            }
            (Some(_), Some(_)) => {
                return Err(ValidationError::RewardOwnerAmbiguous {
                    reward_config_id: row.id,
                })
            }
        };

        let quota_refresh = QuotaRefresh::from_parts(
            row.id,
            row.quota_refresh_type,
            row.quota_refresh_value,
            row.quota_refresh_date,
        )?;

        let config = RewardConfig {
            id: row.id,
            owner,
            percentage: row.percentage,
            calculation_method: row.calculation_method,
            quota_limit: row.quota_limit,
            quota_refresh,
            calculation_basis: row.calculation_basis,
            display_order: row.display_order,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<RewardConfig> for RewardConfigRow {
    fn from(config: RewardConfig) -> Self {
        let (scheme_id, payment_method_id) = match config.owner {
            RewardOwner::Scheme(id) => (Some(id), None),
            RewardOwner::PaymentMethod(id) => (None, Some(id)),
        };
        let (quota_refresh_value, quota_refresh_date) = match config.quota_refresh {
            QuotaRefresh::Monthly { day } => (Some(day), None),
            QuotaRefresh::Date { on } => (None, Some(on)),
            QuotaRefresh::None | QuotaRefresh::Activity => (None, None),
        };

        RewardConfigRow {
            id: config.id,
            scheme_id,
            payment_method_id,
            percentage: config.percentage,
            calculation_method: config.calculation_method,
            quota_limit: config.quota_limit,
            quota_refresh_type: config.quota_refresh.refresh_type(),
            quota_refresh_value,
            quota_refresh_date,
            calculation_basis: config.calculation_basis,
            display_order: config.display_order,
        }
    }
}
