use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::calculator::{
    checked_sum, CalculationError, ComponentReward, RewardBreakdown, RewardCalculator, RewardComponent,
};
use super::catalog::CatalogSnapshot;
use super::domain::{
    CalculationBasis, Channel, PaymentMethod, PaymentMethodId, RewardConfig, RewardConfigId,
    RewardOwner, RoundingMethod, Scheme, SchemeId,
};
use super::matcher::{ChannelMatcher, MatchTier, RankedMatch};
use super::quota::{LedgerError, QuotaKey, QuotaLedger, QuotaPolicy, QuotaState, QuotaView};
use super::repository::{QuotaStore, RepositoryError, ReorderRequest, ReorderTarget, RewardCatalog};
use super::resolver::{Applicability, SchemeRewardResolver};
use super::validation::{
    check_payment_method_link, check_quota_pairing, check_reorder, CycleError, IntegrityError, NotFoundError,
    ValidationError,
};
use super::views::{
    CandidateComponent, CandidateSource, ChannelQuery, ChannelQueryResult, ChannelRewards,
    ChannelSelector, EffectiveRewards, QuotaAdjustment, QuotaConsumption, QuotaPostingView,
    QuotaProjection, RewardCandidate, SchemeCalculation, SchemeCalculationRequest,
};
use crate::config::EngineConfig;

/// Orchestrates matching, resolution, calculation and quota accounting over
/// the catalog and quota store. Holds no state of its own between calls.
pub struct RewardResolutionService<C, Q> {
    catalog: Arc<C>,
    quotas: Arc<Q>,
    utc_offset: FixedOffset,
}

impl<C, Q> RewardResolutionService<C, Q>
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    pub fn new(catalog: Arc<C>, quotas: Arc<Q>) -> Self {
        Self {
            catalog,
            quotas,
            utc_offset: EngineConfig::default().utc_offset,
        }
    }

    /// Calendar used for "today" when a request carries no `as_of` date.
    pub fn with_utc_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.utc_offset).date_naive()
    }

    /// Ranked channel matches for free text. No match is an empty list.
    pub fn resolve_channel(&self, keyword: &str) -> Result<Vec<RankedMatch>, RewardServiceError> {
        let snapshot = self.catalog.snapshot()?;
        let matches = ChannelMatcher::rank(keyword, &snapshot.channels);
        debug!(keyword, matches = matches.len(), "resolved channel keyword");
        Ok(matches)
    }

    pub fn query_by_channels(
        &self,
        query: &ChannelQuery,
    ) -> Result<Vec<ChannelQueryResult>, RewardServiceError> {
        if let Some(amount) = query.amount {
            non_negative("amount", amount)?;
        }
        let as_of = query.as_of.unwrap_or_else(|| self.today());
        let snapshot = self.catalog.snapshot()?;

        let mut results = Vec::with_capacity(query.channels.len());
        for selector in &query.channels {
            let channels: Vec<(&Channel, Option<MatchTier>)> = match selector {
                ChannelSelector::Id(id) => vec![(snapshot.channel(*id)?, None)],
                ChannelSelector::Keyword(keyword) => {
                    let mut resolved = Vec::new();
                    for ranked in ChannelMatcher::rank(keyword, &snapshot.channels) {
                        resolved.push((snapshot.channel(ranked.channel_id)?, Some(ranked.tier)));
                    }
                    resolved
                }
            };

            let matches = channels
                .into_iter()
                .map(|(channel, tier)| channel_rewards(&snapshot, channel, tier, query.amount, as_of))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(%selector, channels = matches.len(), "queried channel rewards");
            results.push(ChannelQueryResult {
                selector: selector.clone(),
                matches,
            });
        }

        Ok(results)
    }

    /// Ad-hoc breakdown without any scheme or quota.
    pub fn calculate(
        &self,
        amount: Decimal,
        components: &[RewardComponent],
    ) -> Result<RewardBreakdown, RewardServiceError> {
        non_negative("amount", amount)?;
        for component in components {
            if component.percentage < Decimal::ZERO {
                return Err(ValidationError::NegativePercentage {
                    value: component.percentage,
                }
                .into());
            }
        }
        Ok(RewardCalculator::breakdown(
            amount,
            components.iter().map(|component| (None, component)),
        )?)
    }

    /// Previews a transaction against a scheme and/or payment method,
    /// projecting every quota it would draw on. Nothing is persisted.
    pub fn calculate_with_scheme(
        &self,
        request: &SchemeCalculationRequest,
    ) -> Result<SchemeCalculation, RewardServiceError> {
        non_negative("amount", request.amount)?;
        let as_of = request.as_of.unwrap_or_else(|| self.today());
        let snapshot = self.catalog.snapshot()?;

        let mut targets: Vec<(&RewardConfig, Option<PaymentMethodId>)> = Vec::new();
        let mut baseline = None;

        match (request.scheme_id, request.payment_method_id) {
            (None, None) => return Err(ValidationError::MissingRewardTarget.into()),
            (Some(scheme_id), payment_method_id) => {
                let scheme = snapshot.scheme(scheme_id)?;
                if let Some(payment_method_id) = payment_method_id {
                    check_payment_method_link(&snapshot, payment_method_id, scheme_id)?;
                }
                let configs = SchemeRewardResolver::effective_rewards(
                    scheme,
                    snapshot.schemes_on_card(scheme.card_id),
                    &snapshot.reward_configs,
                )?;
                targets.extend(configs.into_iter().map(|config| (config, payment_method_id)));
            }
            (None, Some(_)) => {}
        }

        if let Some(payment_method_id) = request.payment_method_id {
            let method = snapshot.payment_method(payment_method_id)?;
            let own = snapshot.configs_owned_by(RewardOwner::PaymentMethod(payment_method_id));
            if own.is_empty() {
                baseline = Some(baseline_component(method));
            }
            targets.extend(own.into_iter().map(|config| (config, None)));
        }

        let mut breakdown = Vec::with_capacity(targets.len() + 1);
        let mut projection = Vec::with_capacity(targets.len());
        let mut total = Decimal::ZERO;
        let mut payable_total = Decimal::ZERO;

        for (config, payment_method_id) in targets {
            let key = QuotaKey::new(config.id, payment_method_id);
            let state = self.load_state(key)?;
            let policy = policy_for(&snapshot, config);
            let posting = QuotaLedger::post(&state, config, &policy, request.amount, as_of)?;

            total = checked_total(total, posting.reward, request.amount, config.percentage)?;
            payable_total =
                checked_total(payable_total, posting.payable, request.amount, config.percentage)?;
            breakdown.push(ComponentReward {
                reward_config_id: Some(config.id),
                percentage: config.percentage,
                method: config.calculation_method,
                reward: posting.reward,
            });
            projection.push(QuotaProjection {
                reward_config_id: config.id,
                payment_method_id,
                quota_limit: policy.limit,
                used_before: posting.before.used_amount,
                remaining_before: QuotaLedger::remaining(&posting.before, policy.limit),
                used_after: posting.after.used_amount,
                remaining_after: QuotaLedger::remaining(&posting.after, policy.limit),
                reward: posting.reward,
                payable: posting.payable,
                refreshed: posting.refreshed,
            });
        }

        if let Some(component) = baseline {
            let reward =
                RewardCalculator::calculate(request.amount, component.percentage, component.method)?;
            total = checked_total(total, reward, request.amount, component.percentage)?;
            payable_total = checked_total(payable_total, reward, request.amount, component.percentage)?;
            breakdown.push(ComponentReward {
                reward_config_id: None,
                percentage: component.percentage,
                method: component.method,
                reward,
            });
        }

        debug!(
            scheme_id = ?request.scheme_id,
            payment_method_id = ?request.payment_method_id,
            %total,
            "calculated scheme reward preview"
        );

        Ok(SchemeCalculation {
            amount: request.amount,
            as_of,
            scheme_id: request.scheme_id,
            payment_method_id: request.payment_method_id,
            breakdown,
            total,
            payable_total,
            quota_projection: projection,
        })
    }

    /// Posts a transaction against one quota and persists the new state.
    pub fn consume_quota(
        &self,
        request: &QuotaConsumption,
    ) -> Result<QuotaPostingView, RewardServiceError> {
        non_negative("amount", request.amount)?;
        let as_of = request.as_of.unwrap_or_else(|| self.today());
        let snapshot = self.catalog.snapshot()?;
        let (config, policy) = quota_target(&snapshot, request.reward_config_id, request.payment_method_id)?;

        let key = QuotaKey::new(config.id, request.payment_method_id);
        let state = self.load_state(key)?;
        let posting = QuotaLedger::post(&state, config, &policy, request.amount, as_of)?;
        let stored = self.persist(state.version, posting.after)?;

        info!(
            reward_config_id = config.id.0,
            payment_method_id = ?request.payment_method_id,
            amount = %request.amount,
            reward = %posting.reward,
            used = %stored.used_amount,
            "consumed quota"
        );

        Ok(QuotaPostingView {
            reward: posting.reward,
            payable: posting.payable,
            quota: QuotaLedger::view(&stored, &policy, posting.refreshed),
        })
    }

    /// Applies a signed manual correction to a quota's used amount.
    pub fn adjust_quota(&self, request: &QuotaAdjustment) -> Result<QuotaView, RewardServiceError> {
        let as_of = request.as_of.unwrap_or_else(|| self.today());
        let snapshot = self.catalog.snapshot()?;
        let (config, policy) = quota_target(&snapshot, request.reward_config_id, request.payment_method_id)?;

        let key = QuotaKey::new(config.id, request.payment_method_id);
        let state = self.load_state(key)?;
        let refreshed = QuotaLedger::should_refresh(&state, &policy, as_of);
        let current = QuotaLedger::refreshed(&state, &policy, as_of);
        let adjusted = QuotaLedger::apply_adjustment(&current, request.delta)?;
        let stored = self.persist(state.version, adjusted)?;

        info!(
            reward_config_id = config.id.0,
            payment_method_id = ?request.payment_method_id,
            delta = %request.delta,
            used = %stored.used_amount,
            "adjusted quota"
        );

        Ok(QuotaLedger::view(&stored, &policy, refreshed))
    }

    /// Current usage after lazy refresh. Reads never write the refresh back.
    pub fn quota_status(
        &self,
        key: QuotaKey,
        as_of: Option<NaiveDate>,
    ) -> Result<QuotaView, RewardServiceError> {
        let as_of = as_of.unwrap_or_else(|| self.today());
        let snapshot = self.catalog.snapshot()?;
        let (_, policy) = quota_target(&snapshot, key.reward_config_id, key.payment_method_id)?;

        let state = self.load_state(key)?;
        let refreshed = QuotaLedger::should_refresh(&state, &policy, as_of);
        let current = QuotaLedger::refreshed(&state, &policy, as_of);
        Ok(QuotaLedger::view(&current, &policy, refreshed))
    }

    pub fn effective_rewards(&self, scheme_id: SchemeId) -> Result<EffectiveRewards, RewardServiceError> {
        let snapshot = self.catalog.snapshot()?;
        let scheme = snapshot.scheme(scheme_id)?;
        let source = SchemeRewardResolver::source_scheme(scheme, snapshot.schemes_on_card(scheme.card_id))?;
        let configs = snapshot
            .configs_owned_by(RewardOwner::Scheme(source.id))
            .into_iter()
            .cloned()
            .collect();

        Ok(EffectiveRewards {
            scheme_id,
            source_scheme_id: source.id,
            is_shared: source.id != scheme_id,
            configs,
        })
    }

    /// Sets or clears a scheme's shared-reward source, enforcing the one-hop rule.
    pub fn assign_shared_group(
        &self,
        scheme_id: SchemeId,
        source_id: Option<SchemeId>,
    ) -> Result<Scheme, RewardServiceError> {
        let scheme = self.catalog.set_shared_reward_group(scheme_id, source_id)?;
        info!(scheme_id = scheme_id.0, source_id = ?source_id.map(|id| id.0), "assigned shared reward group");
        Ok(scheme)
    }

    /// Validates a full permutation of the rows in scope, then applies it in one write.
    pub fn reorder(&self, request: &ReorderRequest) -> Result<(), RewardServiceError> {
        let snapshot = self.catalog.snapshot()?;
        match request.target {
            ReorderTarget::Schemes { card_id } => {
                snapshot.card(card_id)?;
            }
            ReorderTarget::RewardConfigs {
                owner: RewardOwner::Scheme(scheme_id),
            } => {
                snapshot.scheme(scheme_id)?;
            }
            ReorderTarget::RewardConfigs {
                owner: RewardOwner::PaymentMethod(payment_method_id),
            } => {
                snapshot.payment_method(payment_method_id)?;
            }
            ReorderTarget::Cards | ReorderTarget::Channels | ReorderTarget::PaymentMethods => {}
        }

        let in_scope = request.target.ids_in(&snapshot);
        check_reorder(request.target.kind(), &in_scope, &request.ordered_ids)?;
        self.catalog.reorder(&request.target, &request.ordered_ids)?;
        info!(reorder_target = ?request.target, rows = request.ordered_ids.len(), "reordered rows");
        Ok(())
    }

    fn load_state(&self, key: QuotaKey) -> Result<QuotaState, RewardServiceError> {
        Ok(self
            .quotas
            .load(&key)?
            .unwrap_or_else(|| QuotaState::new(key)))
    }

    fn persist(&self, expected_version: u64, next: QuotaState) -> Result<QuotaState, RewardServiceError> {
        let key = next.key;
        self.quotas
            .compare_and_swap(expected_version, next)
            .map_err(|error| match error {
                RepositoryError::Conflict => {
                    warn!(
                        reward_config_id = key.reward_config_id.0,
                        payment_method_id = ?key.payment_method_id,
                        expected_version,
                        "quota changed concurrently"
                    );
                    RewardServiceError::QuotaConflict { key }
                }
                other => other.into(),
            })
    }
}

fn non_negative(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::NegativeAmount { field, value });
    }
    Ok(())
}

fn checked_total(
    total: Decimal,
    reward: Decimal,
    amount: Decimal,
    percentage: Decimal,
) -> Result<Decimal, CalculationError> {
    total
        .checked_add(reward)
        .ok_or(CalculationError::Overflow { amount, percentage })
}

/// Payment methods without configs still pay their own baseline rate.
fn baseline_component(method: &PaymentMethod) -> RewardComponent {
    RewardComponent::new(method.own_reward_percentage, RoundingMethod::Round)
}

fn policy_for(snapshot: &CatalogSnapshot, config: &RewardConfig) -> QuotaPolicy {
    let activity_end = match config.owner {
        RewardOwner::Scheme(scheme_id) => snapshot
            .scheme(scheme_id)
            .ok()
            .and_then(|scheme| scheme.activity_end),
        RewardOwner::PaymentMethod(_) => None,
    };
    QuotaPolicy::for_config(config, activity_end)
}

fn quota_target(
    snapshot: &CatalogSnapshot,
    reward_config_id: RewardConfigId,
    payment_method_id: Option<PaymentMethodId>,
) -> Result<(&RewardConfig, QuotaPolicy), RewardServiceError> {
    let config = snapshot.reward_config(reward_config_id)?;
    check_quota_pairing(snapshot, config, payment_method_id)?;
    Ok((config, policy_for(snapshot, config)))
}

fn channel_rewards(
    snapshot: &CatalogSnapshot,
    channel: &Channel,
    match_tier: Option<MatchTier>,
    amount: Option<Decimal>,
    as_of: NaiveDate,
) -> Result<ChannelRewards, RewardServiceError> {
    let mut excluded = Vec::new();
    let mut included = Vec::new();

    for scheme in &snapshot.schemes {
        match SchemeRewardResolver::scheme_applicability(scheme, channel.id) {
            Applicability::NotApplicable => {}
            Applicability::Excluded => {
                excluded.push(scheme_candidate(snapshot, scheme, None, true, amount, as_of)?)
            }
            Applicability::Included { note } => {
                included.push(scheme_candidate(snapshot, scheme, note, false, amount, as_of)?)
            }
        }
    }

    for method in &snapshot.payment_methods {
        if let Applicability::Included { note } =
            SchemeRewardResolver::payment_method_applicability(method, channel.id)
        {
            included.push(payment_method_candidate(snapshot, method, note, amount)?);
        }
    }

    included.sort_by(|left, right| right.total_percentage.cmp(&left.total_percentage));

    Ok(ChannelRewards {
        channel_id: channel.id,
        display_name: channel.display_name().to_string(),
        match_tier,
        excluded,
        included,
    })
}

fn scheme_candidate(
    snapshot: &CatalogSnapshot,
    scheme: &Scheme,
    note: Option<String>,
    is_excluded: bool,
    amount: Option<Decimal>,
    as_of: NaiveDate,
) -> Result<RewardCandidate, RewardServiceError> {
    let card = snapshot.card(scheme.card_id)?;
    let source = SchemeRewardResolver::source_scheme(scheme, snapshot.schemes_on_card(scheme.card_id))?;
    let components = snapshot
        .configs_owned_by(RewardOwner::Scheme(source.id))
        .into_iter()
        .map(|config| {
            component_view(
                Some(config),
                config.percentage,
                config.calculation_method,
                amount,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let total_percentage = total_percentage(&components)?;
    let total_reward = total_reward(&components)?;
    Ok(RewardCandidate {
        source: CandidateSource::Scheme {
            scheme_id: scheme.id,
            card_id: card.id,
            card_name: card.name.clone(),
            shared_from: scheme.shared_reward_group_id,
        },
        name: scheme.name.clone(),
        total_percentage,
        total_reward,
        components,
        is_excluded,
        excluded_by: is_excluded.then(|| scheme.name.clone()),
        requires_switch: scheme.requires_switch,
        is_active: scheme.is_active_on(as_of),
        activity_end: scheme.activity_end,
        note,
    })
}

fn payment_method_candidate(
    snapshot: &CatalogSnapshot,
    method: &PaymentMethod,
    note: Option<String>,
    amount: Option<Decimal>,
) -> Result<RewardCandidate, RewardServiceError> {
    let own = snapshot.configs_owned_by(RewardOwner::PaymentMethod(method.id));
    let components = if own.is_empty() {
        let baseline = baseline_component(method);
        vec![component_view(None, baseline.percentage, baseline.method, amount)?]
    } else {
        own.into_iter()
            .map(|config| {
                component_view(
                    Some(config),
                    config.percentage,
                    config.calculation_method,
                    amount,
                )
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let total_percentage = total_percentage(&components)?;
    let total_reward = total_reward(&components)?;
    Ok(RewardCandidate {
        source: CandidateSource::PaymentMethod {
            payment_method_id: method.id,
        },
        name: method.name.clone(),
        total_percentage,
        total_reward,
        components,
        is_excluded: false,
        excluded_by: None,
        requires_switch: false,
        is_active: true,
        activity_end: None,
        note,
    })
}

fn component_view(
    config: Option<&RewardConfig>,
    percentage: Decimal,
    method: RoundingMethod,
    amount: Option<Decimal>,
) -> Result<CandidateComponent, CalculationError> {
    let reward = amount
        .map(|amount| RewardCalculator::calculate(amount, percentage, method))
        .transpose()?;
    Ok(CandidateComponent {
        reward_config_id: config.map(|config| config.id),
        percentage,
        method,
        calculation_basis: config.map_or(CalculationBasis::PerTransaction, |config| {
            config.calculation_basis
        }),
        quota_limit: config.and_then(|config| config.quota_limit),
        reward,
    })
}

fn total_percentage(components: &[CandidateComponent]) -> Result<Decimal, CalculationError> {
    components
        .iter()
        .try_fold(Decimal::ZERO, |total, component| {
            checked_sum(total, component.percentage)
        })
        .map(|total| total.normalize())
}

/// `None` when no amount was given, so no component carries a reward.
fn total_reward(components: &[CandidateComponent]) -> Result<Option<Decimal>, CalculationError> {
    let mut total = Decimal::ZERO;
    for component in components {
        let Some(reward) = component.reward else {
            return Ok(None);
        };
        total = checked_sum(total, reward)?;
    }
    Ok(Some(total))
}

/// Error raised by the reward resolution service.
#[derive(Debug, thiserror::Error)]
pub enum RewardServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Calculation(#[from] CalculationError),
    #[error("quota for reward config {} was updated concurrently; retry", .key.reward_config_id.0)]
    QuotaConflict { key: QuotaKey },
    #[error(transparent)]
    Repository(RepositoryError),
}

impl RewardServiceError {
    /// Only optimistic-concurrency conflicts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RewardServiceError::QuotaConflict { .. })
    }
}

impl From<RepositoryError> for RewardServiceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Rejected(error) => error.into(),
            other => Self::Repository(other),
        }
    }
}

impl From<LedgerError> for RewardServiceError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Validation(error) => Self::Validation(error),
            LedgerError::Calculation(error) => Self::Calculation(error),
        }
    }
}

impl From<IntegrityError> for RewardServiceError {
    fn from(value: IntegrityError) -> Self {
        match value {
            IntegrityError::Validation(error) => Self::Validation(error),
            IntegrityError::NotFound(error) => Self::NotFound(error),
            IntegrityError::Cycle(error) => Self::Cycle(error),
        }
    }
}
