//! Reward resolution and quota accounting.
//!
//! Pure building blocks (matching, calculation, quota arithmetic, shared-group
//! resolution) sit underneath [`RewardResolutionService`], which reads a
//! [`CatalogSnapshot`] and quota rows through the repository traits.

pub mod calculator;
pub mod catalog;
pub mod domain;
pub mod matcher;
pub mod quota;
pub mod repository;
pub mod resolver;
pub mod router;
pub mod service;
pub mod validation;
pub mod views;

#[cfg(test)]
mod tests;

pub use calculator::{
    CalculationError, ComponentReward, RewardBreakdown, RewardCalculator, RewardComponent,
};
pub use catalog::CatalogSnapshot;
pub use domain::{
    CalculationBasis, Card, CardId, Channel, ChannelApplication, ChannelId, ChannelName,
    EntityKind, PaymentMethod, PaymentMethodId, QuotaRefresh, QuotaRefreshType, RewardConfig,
    RewardConfigId, RewardConfigRow, RewardOwner, RoundingMethod, Scheme, SchemeId,
};
pub use matcher::{ChannelMatcher, MatchTier, RankedMatch};
pub use quota::{LedgerError, PeriodMarker, Posting, QuotaKey, QuotaLedger, QuotaPolicy, QuotaState, QuotaView};
pub use repository::{QuotaStore, ReorderRequest, ReorderTarget, RepositoryError, RewardCatalog};
pub use resolver::{Applicability, SchemeRewardResolver};
pub use router::reward_router;
pub use service::{RewardResolutionService, RewardServiceError};
pub use validation::{
    check_payment_method_link, check_quota_pairing, check_reorder, check_shared_group_assignment,
    validate_snapshot, CycleError, IntegrityError, NotFoundError, ValidationError,
};
pub use views::{
    CalculationRequest, CandidateComponent, CandidateSource, ChannelQuery, ChannelQueryResult,
    ChannelRewards, ChannelSelector, EffectiveRewards, QuotaAdjustment, QuotaConsumption,
    QuotaPostingView, QuotaProjection, RewardCandidate, SchemeCalculation,
    SchemeCalculationRequest, SharedGroupAssignment,
};
