use std::collections::HashSet;
use std::hash::Hash;

use rust_decimal::Decimal;

use super::catalog::CatalogSnapshot;
use super::domain::{
    EntityKind, PaymentMethodId, RewardConfig, RewardConfigId, RewardOwner, Scheme, SchemeId,
};

/// Malformed input to a public operation. Deterministic, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must not be negative (found {value})")]
    NegativeAmount { field: &'static str, value: Decimal },
    #[error("reward percentage must not be negative (found {value})")]
    NegativePercentage { value: Decimal },
    #[error("reward config {} has neither a scheme nor a payment method owner", .reward_config_id.0)]
    RewardOwnerMissing { reward_config_id: RewardConfigId },
    #[error("reward config {} cannot belong to both a scheme and a payment method", .reward_config_id.0)]
    RewardOwnerAmbiguous { reward_config_id: RewardConfigId },
    #[error("reward config {} uses monthly refresh without a day of month", .reward_config_id.0)]
    MissingRefreshDay { reward_config_id: RewardConfigId },
    #[error("reward config {} refresh day {day} is outside 1..=31", .reward_config_id.0)]
    RefreshDayOutOfRange {
        reward_config_id: RewardConfigId,
        day: u32,
    },
    #[error("reward config {} uses date refresh without a refresh date", .reward_config_id.0)]
    MissingRefreshDate { reward_config_id: RewardConfigId },
    #[error("reward config {} carries a refresh parameter that {refresh_type} refresh does not use", .reward_config_id.0)]
    UnexpectedRefreshParameter {
        reward_config_id: RewardConfigId,
        refresh_type: &'static str,
    },
    #[error("reward config {} quota limit must not be negative (found {value})", .reward_config_id.0)]
    NegativeQuotaLimit {
        reward_config_id: RewardConfigId,
        value: Decimal,
    },
    #[error("scheme {} cannot share rewards with itself", .scheme_id.0)]
    SharedGroupSelfReference { scheme_id: SchemeId },
    #[error("scheme {} can only share rewards with a scheme on the same card (scheme {} is on another card)", .scheme_id.0, .source_id.0)]
    SharedGroupCrossCard {
        scheme_id: SchemeId,
        source_id: SchemeId,
    },
    #[error("payment method {} is not linked to scheme {}", .payment_method_id.0, .scheme_id.0)]
    PaymentMethodNotLinked {
        payment_method_id: PaymentMethodId,
        scheme_id: SchemeId,
    },
    #[error("reward config {} belongs to payment method {} and is tracked without a payment-method key", .reward_config_id.0, .owner_id.0)]
    PaymentMethodKeyOnOwnConfig {
        reward_config_id: RewardConfigId,
        owner_id: PaymentMethodId,
    },
    #[error("a scheme or a payment method must be provided")]
    MissingRewardTarget,
    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: EntityKind, id: i64 },
    #[error("{kind} {id} references unknown {target} {target_id}")]
    DanglingReference {
        kind: EntityKind,
        id: i64,
        target: EntityKind,
        target_id: i64,
    },
    #[error("reorder lists {kind} {id} more than once")]
    ReorderDuplicate { kind: EntityKind, id: i64 },
    #[error("reorder must list all {expected} {kind} rows in scope (found {found})")]
    ReorderIncomplete {
        kind: EntityKind,
        expected: usize,
        found: usize,
    },
}

/// Reference to an id that does not exist. Distinct from a search with no hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} {id} not found")]
pub struct NotFoundError {
    pub kind: EntityKind,
    pub id: i64,
}

impl NotFoundError {
    pub const fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}

/// Shared-reward links are a single hop to a non-shared source scheme.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("scheme {} cannot share from scheme {} because it already shares from scheme {}", .scheme_id.0, .source_id.0, .upstream_id.0)]
    SourceIsShared {
        scheme_id: SchemeId,
        source_id: SchemeId,
        upstream_id: SchemeId,
    },
    #[error("scheme {} is the reward source for {} other scheme(s) and cannot share from another scheme", .scheme_id.0, .dependents.len())]
    SchemeHasDependents {
        scheme_id: SchemeId,
        dependents: Vec<SchemeId>,
    },
    #[error("schemes {} and {} share rewards with each other", .scheme_id.0, .source_id.0)]
    Mutual {
        scheme_id: SchemeId,
        source_id: SchemeId,
    },
}

/// Catalog consistency failure: shared-group assignment, reorder or snapshot load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Checks that pointing `scheme_id` at `source_id` keeps every chain one hop long.
pub fn check_shared_group_assignment(
    snapshot: &CatalogSnapshot,
    scheme_id: SchemeId,
    source_id: Option<SchemeId>,
) -> Result<(), IntegrityError> {
    let scheme = snapshot.scheme(scheme_id)?;
    let Some(source_id) = source_id else {
        return Ok(());
    };

    if source_id == scheme_id {
        return Err(ValidationError::SharedGroupSelfReference { scheme_id }.into());
    }

    let source = snapshot.scheme(source_id)?;
    if source.card_id != scheme.card_id {
        return Err(ValidationError::SharedGroupCrossCard {
            scheme_id,
            source_id,
        }
        .into());
    }

    if let Some(upstream_id) = source.shared_reward_group_id {
        if upstream_id == scheme_id {
            return Err(CycleError::Mutual {
                scheme_id,
                source_id,
            }
            .into());
        }
        return Err(CycleError::SourceIsShared {
            scheme_id,
            source_id,
            upstream_id,
        }
        .into());
    }

    let dependents = dependents_of(snapshot, scheme_id);
    if !dependents.is_empty() {
        return Err(CycleError::SchemeHasDependents {
            scheme_id,
            dependents,
        }
        .into());
    }

    Ok(())
}

fn dependents_of(snapshot: &CatalogSnapshot, scheme_id: SchemeId) -> Vec<SchemeId> {
    snapshot
        .schemes
        .iter()
        .filter(|other| other.shared_reward_group_id == Some(scheme_id))
        .map(|other| other.id)
        .collect()
}

/// Fails unless `payment_method_id` is linked to `scheme_id`.
pub fn check_payment_method_link(
    snapshot: &CatalogSnapshot,
    payment_method_id: PaymentMethodId,
    scheme_id: SchemeId,
) -> Result<(), IntegrityError> {
    let method = snapshot.payment_method(payment_method_id)?;
    if !method.linked_schemes.contains(&scheme_id) {
        return Err(ValidationError::PaymentMethodNotLinked {
            payment_method_id,
            scheme_id,
        }
        .into());
    }
    Ok(())
}

/// Checks that a quota row key is one a scheme preview would read.
///
/// Payment-method configs are keyed without a payment method. A scheme config
/// keyed with a payment method needs that method linked to the owning scheme
/// or to a scheme sharing its rewards.
pub fn check_quota_pairing(
    snapshot: &CatalogSnapshot,
    config: &RewardConfig,
    payment_method_id: Option<PaymentMethodId>,
) -> Result<(), IntegrityError> {
    let Some(payment_method_id) = payment_method_id else {
        return Ok(());
    };

    match config.owner {
        RewardOwner::PaymentMethod(owner_id) => {
            snapshot.payment_method(payment_method_id)?;
            Err(ValidationError::PaymentMethodKeyOnOwnConfig {
                reward_config_id: config.id,
                owner_id,
            }
            .into())
        }
        RewardOwner::Scheme(owner_id) => {
            let linked_via_share = dependents_of(snapshot, owner_id).into_iter().any(|dependent| {
                check_payment_method_link(snapshot, payment_method_id, dependent).is_ok()
            });
            if linked_via_share {
                return Ok(());
            }
            check_payment_method_link(snapshot, payment_method_id, owner_id)
        }
    }
}

/// Validates a reorder request against the ids currently in scope.
pub fn check_reorder<T>(kind: EntityKind, in_scope: &[T], requested: &[T]) -> Result<(), IntegrityError>
where
    T: Copy + Eq + Hash + Into<i64>,
{
    let mut seen = HashSet::with_capacity(requested.len());
    for id in requested {
        if !seen.insert(*id) {
            return Err(ValidationError::ReorderDuplicate {
                kind,
                id: (*id).into(),
            }
            .into());
        }
        if !in_scope.contains(id) {
            return Err(NotFoundError::new(kind, (*id).into()).into());
        }
    }

    if requested.len() != in_scope.len() {
        return Err(ValidationError::ReorderIncomplete {
            kind,
            expected: in_scope.len(),
            found: requested.len(),
        }
        .into());
    }

    Ok(())
}

/// Full consistency check of a catalog snapshot as loaded from storage.
pub fn validate_snapshot(snapshot: &CatalogSnapshot) -> Result<(), IntegrityError> {
    unique(EntityKind::Channel, snapshot.channels.iter().map(|c| c.id.0))?;
    unique(EntityKind::Card, snapshot.cards.iter().map(|c| c.id.0))?;
    unique(EntityKind::Scheme, snapshot.schemes.iter().map(|s| s.id.0))?;
    unique(
        EntityKind::PaymentMethod,
        snapshot.payment_methods.iter().map(|p| p.id.0),
    )?;
    unique(
        EntityKind::RewardConfig,
        snapshot.reward_configs.iter().map(|r| r.id.0),
    )?;

    for scheme in &snapshot.schemes {
        if snapshot.card(scheme.card_id).is_err() {
            return Err(dangling(EntityKind::Scheme, scheme.id.0, EntityKind::Card, scheme.card_id.0));
        }
        check_channel_refs(snapshot, EntityKind::Scheme, scheme.id.0, scheme_channel_ids(scheme))?;
        check_stored_link(snapshot, scheme)?;
    }

    for method in &snapshot.payment_methods {
        if method.own_reward_percentage < Decimal::ZERO {
            return Err(ValidationError::NegativePercentage {
                value: method.own_reward_percentage,
            }
            .into());
        }
        check_channel_refs(
            snapshot,
            EntityKind::PaymentMethod,
            method.id.0,
            method.applications.iter().map(|a| a.channel_id.0).collect(),
        )?;
        for linked in &method.linked_schemes {
            if snapshot.scheme(*linked).is_err() {
                return Err(dangling(
                    EntityKind::PaymentMethod,
                    method.id.0,
                    EntityKind::Scheme,
                    linked.0,
                ));
            }
        }
    }

    for config in &snapshot.reward_configs {
        config.validate()?;
        let missing = match config.owner {
            RewardOwner::Scheme(id) => snapshot
                .scheme(id)
                .err()
                .map(|_| (EntityKind::Scheme, id.0)),
            RewardOwner::PaymentMethod(id) => snapshot
                .payment_method(id)
                .err()
                .map(|_| (EntityKind::PaymentMethod, id.0)),
        };
        if let Some((target, target_id)) = missing {
            return Err(dangling(EntityKind::RewardConfig, config.id.0, target, target_id));
        }
    }

    Ok(())
}

fn scheme_channel_ids(scheme: &Scheme) -> Vec<i64> {
    scheme
        .applications
        .iter()
        .map(|application| application.channel_id.0)
        .chain(scheme.exclusions.iter().map(|id| id.0))
        .collect()
}

fn check_channel_refs(
    snapshot: &CatalogSnapshot,
    kind: EntityKind,
    id: i64,
    channel_ids: Vec<i64>,
) -> Result<(), IntegrityError> {
    for channel_id in channel_ids {
        if !snapshot.channels.iter().any(|channel| channel.id.0 == channel_id) {
            return Err(dangling(kind, id, EntityKind::Channel, channel_id));
        }
    }
    Ok(())
}

/// A stored link is checked as the one-hop rule would have checked it at write time.
fn check_stored_link(snapshot: &CatalogSnapshot, scheme: &Scheme) -> Result<(), IntegrityError> {
    let Some(source_id) = scheme.shared_reward_group_id else {
        return Ok(());
    };
    let source = snapshot.scheme(source_id).map_err(|_| {
        dangling(EntityKind::Scheme, scheme.id.0, EntityKind::Scheme, source_id.0)
    })?;

    if source.id == scheme.id {
        return Err(ValidationError::SharedGroupSelfReference {
            scheme_id: scheme.id,
        }
        .into());
    }
    if source.card_id != scheme.card_id {
        return Err(ValidationError::SharedGroupCrossCard {
            scheme_id: scheme.id,
            source_id,
        }
        .into());
    }
    match source.shared_reward_group_id {
        Some(upstream_id) if upstream_id == scheme.id => Err(CycleError::Mutual {
            scheme_id: scheme.id,
            source_id,
        }
        .into()),
        Some(upstream_id) => Err(CycleError::SourceIsShared {
            scheme_id: scheme.id,
            source_id,
            upstream_id,
        }
        .into()),
        None => Ok(()),
    }
}

fn unique(kind: EntityKind, ids: impl Iterator<Item = i64>) -> Result<(), IntegrityError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateId { kind, id }.into());
        }
    }
    Ok(())
}

fn dangling(kind: EntityKind, id: i64, target: EntityKind, target_id: i64) -> IntegrityError {
    ValidationError::DanglingReference {
        kind,
        id,
        target,
        target_id,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::domain::{Card, CardId, Channel, ChannelId};

    fn scheme(id: i64, card: i64, shared: Option<i64>) -> Scheme {
        Scheme {
            id: SchemeId(id),
            card_id: CardId(card),
            name: format!("scheme-{id}"),
            requires_switch: false,
            activity_start: None,
            activity_end: None,
            shared_reward_group_id: shared.map(SchemeId),
            display_order: 0,
            applications: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    fn snapshot(schemes: Vec<Scheme>) -> CatalogSnapshot {
        CatalogSnapshot {
            channels: vec![Channel::new(ChannelId(1), "Costco")],
            cards: vec![
                Card {
                    id: CardId(1),
                    name: "Card one".to_string(),
                    note: None,
                    display_order: 0,
                },
                Card {
                    id: CardId(2),
                    name: "Card two".to_string(),
                    note: None,
                    display_order: 1,
                },
            ],
            schemes,
            ..CatalogSnapshot::default()
        }
    }

    #[test]
    fn assignment_to_plain_sibling_is_allowed() {
        let snapshot = snapshot(vec![scheme(1, 1, None), scheme(2, 1, None)]);
        check_shared_group_assignment(&snapshot, SchemeId(2), Some(SchemeId(1)))
            .expect("one hop is fine");
        check_shared_group_assignment(&snapshot, SchemeId(2), None).expect("clearing is fine");
    }

    #[test]
    fn assignment_rejects_self_and_cross_card() {
        let snapshot = snapshot(vec![scheme(1, 1, None), scheme(3, 2, None)]);
        assert!(matches!(
            check_shared_group_assignment(&snapshot, SchemeId(1), Some(SchemeId(1))),
            Err(IntegrityError::Validation(
                ValidationError::SharedGroupSelfReference { .. }
            ))
        ));
        assert!(matches!(
            check_shared_group_assignment(&snapshot, SchemeId(1), Some(SchemeId(3))),
            Err(IntegrityError::Validation(
                ValidationError::SharedGroupCrossCard { .. }
            ))
        ));
    }

    #[test]
    fn assignment_rejects_chains_and_cycles() {
        let snapshot = snapshot(vec![
            scheme(1, 1, None),
            scheme(2, 1, Some(1)),
            scheme(3, 1, None),
        ]);

        match check_shared_group_assignment(&snapshot, SchemeId(3), Some(SchemeId(2))) {
            Err(IntegrityError::Cycle(CycleError::SourceIsShared { upstream_id, .. })) => {
                assert_eq!(upstream_id, SchemeId(1))
            }
            other => panic!("expected chain rejection, got {other:?}"),
        }

        match check_shared_group_assignment(&snapshot, SchemeId(1), Some(SchemeId(2))) {
            Err(IntegrityError::Cycle(CycleError::Mutual { .. })) => {}
            other => panic!("expected mutual cycle, got {other:?}"),
        }

        match check_shared_group_assignment(&snapshot, SchemeId(1), Some(SchemeId(3))) {
            Err(IntegrityError::Cycle(CycleError::SchemeHasDependents { dependents, .. })) => {
                assert_eq!(dependents, vec![SchemeId(2)])
            }
            other => panic!("expected dependents rejection, got {other:?}"),
        }
    }

    #[test]
    fn assignment_reports_unknown_schemes() {
        let snapshot = snapshot(vec![scheme(1, 1, None)]);
        assert_eq!(
            check_shared_group_assignment(&snapshot, SchemeId(1), Some(SchemeId(99))),
            Err(IntegrityError::NotFound(NotFoundError::new(
                EntityKind::Scheme,
                99
            )))
        );
    }

    #[test]
    fn reorder_requires_full_permutation() {
        let scope = [SchemeId(1), SchemeId(2), SchemeId(3)];
        check_reorder(EntityKind::Scheme, &scope, &[SchemeId(3), SchemeId(1), SchemeId(2)])
            .expect("permutation accepted");

        assert!(matches!(
            check_reorder(EntityKind::Scheme, &scope, &[SchemeId(1), SchemeId(1), SchemeId(2)]),
            Err(IntegrityError::Validation(ValidationError::ReorderDuplicate { id: 1, .. }))
        ));
        assert!(matches!(
            check_reorder(EntityKind::Scheme, &scope, &[SchemeId(1), SchemeId(2)]),
            Err(IntegrityError::Validation(ValidationError::ReorderIncomplete {
                expected: 3,
                found: 2,
                ..
            }))
        ));
        assert!(matches!(
            check_reorder(EntityKind::Scheme, &scope, &[SchemeId(1), SchemeId(2), SchemeId(9)]),
            Err(IntegrityError::NotFound(_))
        ));
    }

    #[test]
    fn snapshot_validation_flags_mutual_links() {
        let broken = snapshot(vec![scheme(1, 1, Some(2)), scheme(2, 1, Some(1))]);
        assert!(matches!(
            validate_snapshot(&broken),
            Err(IntegrityError::Cycle(CycleError::Mutual { .. }))
        ));
    }

    #[test]
    fn snapshot_validation_flags_dangling_channels_and_duplicates() {
        let mut dangling = snapshot(vec![scheme(1, 1, None)]);
        dangling.schemes[0].exclusions.push(ChannelId(404));
        assert!(matches!(
            validate_snapshot(&dangling),
            Err(IntegrityError::Validation(ValidationError::DanglingReference {
                target: EntityKind::Channel,
                target_id: 404,
                ..
            }))
        ));

        let duplicated = snapshot(vec![scheme(1, 1, None), scheme(1, 1, None)]);
        assert!(matches!(
            validate_snapshot(&duplicated),
            Err(IntegrityError::Validation(ValidationError::DuplicateId {
                kind: EntityKind::Scheme,
                id: 1
            }))
        ));

        validate_snapshot(&snapshot(vec![scheme(1, 1, None), scheme(2, 1, Some(1))]))
            .expect("valid snapshot");
    }
}
