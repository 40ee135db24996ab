use serde::{Deserialize, Serialize};

use super::catalog::CatalogSnapshot;
use super::domain::{CardId, EntityKind, RewardOwner, Scheme, SchemeId};
use super::quota::{QuotaKey, QuotaState};
use super::validation::IntegrityError;

/// Read access to the administrative catalog plus the two writes the engine owns.
pub trait RewardCatalog: Send + Sync {
    fn snapshot(&self) -> Result<CatalogSnapshot, RepositoryError>;

    /// Points `scheme_id` at `source_id`, or clears the link. The one-hop
    /// check runs against the stored catalog atomically with the write
    /// (`CatalogSnapshot::assign_shared_group`); a violation is `Rejected`.
    fn set_shared_reward_group(
        &self,
        scheme_id: SchemeId,
        source_id: Option<SchemeId>,
    ) -> Result<Scheme, RepositoryError>;

    /// Rewrites `display_order` for every row in scope. All or nothing.
    fn reorder(&self, target: &ReorderTarget, ordered_ids: &[i64]) -> Result<(), RepositoryError>;
}

/// Quota rows with optimistic concurrency.
pub trait QuotaStore: Send + Sync {
    fn load(&self, key: &QuotaKey) -> Result<Option<QuotaState>, RepositoryError>;

    /// Stores `next` only if the row is still at `expected_version` (an absent
    /// row is version 0). Returns the stored row with its new version, or
    /// `RepositoryError::Conflict` when another writer got there first.
    fn compare_and_swap(
        &self,
        expected_version: u64,
        next: QuotaState,
    ) -> Result<QuotaState, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record was modified concurrently")]
    Conflict,
    #[error("write rejected: {0}")]
    Rejected(#[from] IntegrityError),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Set of rows a reorder request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum ReorderTarget {
    Cards,
    Channels,
    PaymentMethods,
    Schemes { card_id: CardId },
    RewardConfigs { owner: RewardOwner },
}

impl ReorderTarget {
    pub const fn kind(&self) -> EntityKind {
        match self {
            ReorderTarget::Cards => EntityKind::Card,
            ReorderTarget::Channels => EntityKind::Channel,
            ReorderTarget::PaymentMethods => EntityKind::PaymentMethod,
            ReorderTarget::Schemes { .. } => EntityKind::Scheme,
            ReorderTarget::RewardConfigs { .. } => EntityKind::RewardConfig,
        }
    }

    /// Ids currently in scope, in display order.
    pub fn ids_in(&self, snapshot: &CatalogSnapshot) -> Vec<i64> {
        match self {
            ReorderTarget::Cards => snapshot.cards.iter().map(|card| card.id.0).collect(),
            ReorderTarget::Channels => snapshot.channels.iter().map(|channel| channel.id.0).collect(),
            ReorderTarget::PaymentMethods => snapshot
                .payment_methods
                .iter()
                .map(|method| method.id.0)
                .collect(),
            ReorderTarget::Schemes { card_id } => snapshot
                .schemes_on_card(*card_id)
                .into_iter()
                .map(|scheme| scheme.id.0)
                .collect(),
            ReorderTarget::RewardConfigs { owner } => snapshot
                .configs_owned_by(*owner)
                .into_iter()
                .map(|config| config.id.0)
                .collect(),
        }
    }

    /// Writes the new order into `snapshot`. Callers validate `ordered_ids` first.
    pub fn apply(&self, snapshot: &mut CatalogSnapshot, ordered_ids: &[i64]) {
        let position = |id: i64| {
            ordered_ids
                .iter()
                .position(|candidate| *candidate == id)
                .and_then(|index| i32::try_from(index).ok())
        };

        match self {
            ReorderTarget::Cards => {
                for card in &mut snapshot.cards {
                    if let Some(order) = position(card.id.0) {
                        card.display_order = order;
                    }
                }
            }
            ReorderTarget::Channels => {
                for channel in &mut snapshot.channels {
                    if let Some(order) = position(channel.id.0) {
                        channel.display_order = order;
                    }
                }
            }
            ReorderTarget::PaymentMethods => {
                for method in &mut snapshot.payment_methods {
                    if let Some(order) = position(method.id.0) {
                        method.display_order = order;
                    }
                }
            }
            ReorderTarget::Schemes { card_id } => {
                for scheme in snapshot.schemes.iter_mut().filter(|s| s.card_id == *card_id) {
                    if let Some(order) = position(scheme.id.0) {
                        scheme.display_order = order;
                    }
                }
            }
            ReorderTarget::RewardConfigs { owner } => {
                for config in snapshot.reward_configs.iter_mut().filter(|c| c.owner == *owner) {
                    if let Some(order) = position(config.id.0) {
                        config.display_order = order;
                    }
                }
            }
        }
    }
}

/// Body of a reorder request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderRequest {
    #[serde(flatten)]
    pub target: ReorderTarget,
    pub ordered_ids: Vec<i64>,
}
