use std::fmt;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rewards::domain::{QuotaRefresh, RewardConfig};

/// Identifier of the refresh period a quota's usage belongs to.
///
/// Monthly periods are `YYYY-MM`, one-time refreshes are `before:DATE` or
/// `since:DATE`, activity-bound quotas are `active` or `ended:DATE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodMarker(String);

impl PeriodMarker {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Refresh inputs for one quota: the cap, the rule and, for activity-bound
/// rules, the end of the owning scheme's activity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub limit: Option<Decimal>,
    pub refresh: QuotaRefresh,
    pub activity_end: Option<NaiveDate>,
}

impl QuotaPolicy {
    pub fn for_config(config: &RewardConfig, activity_end: Option<NaiveDate>) -> Self {
        Self {
            limit: config.quota_limit,
            refresh: config.quota_refresh,
            activity_end,
        }
    }

    /// Period `as_of` falls into, or `None` when the rule never refreshes.
    pub fn marker(&self, as_of: NaiveDate) -> Option<PeriodMarker> {
        match self.refresh {
            QuotaRefresh::None => None,
            QuotaRefresh::Monthly { day } => Some(monthly_marker(day, as_of)),
            QuotaRefresh::Date { on } if as_of < on => Some(PeriodMarker(format!("before:{on}"))),
            QuotaRefresh::Date { on } => Some(PeriodMarker(format!("since:{on}"))),
            QuotaRefresh::Activity => Some(match self.activity_end {
                Some(end) if as_of > end => PeriodMarker(format!("ended:{end}")),
                _ => PeriodMarker("active".to_string()),
            }),
        }
    }
}

fn monthly_marker(day: u32, as_of: NaiveDate) -> PeriodMarker {
    let (year, month) = (as_of.year(), as_of.month());
    let boundary = day.min(days_in_month(year, month));
    let (year, month) = if as_of.day() >= boundary {
        (year, month)
    } else if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    };
    PeriodMarker(format!("{year:04}-{month:02}"))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}
