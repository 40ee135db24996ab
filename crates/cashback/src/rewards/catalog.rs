use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::domain::{
    Card, CardId, Channel, ChannelId, EntityKind, PaymentMethod, PaymentMethodId, RewardConfig,
    RewardConfigId, RewardOwner, Scheme, SchemeId,
};
use super::validation::{
    check_shared_group_assignment, validate_snapshot, IntegrityError, NotFoundError,
};
use crate::error::CatalogLoadError;

/// Point-in-time copy of everything the engine reads from the administrative
/// layer. Every collection is kept in display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub schemes: Vec<Scheme>,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethod>,
    #[serde(default)]
    pub reward_configs: Vec<RewardConfig>,
}

impl CatalogSnapshot {
    /// Reads a JSON snapshot, validates it and sorts it into display order.
    pub fn from_path(path: &Path) -> Result<Self, CatalogLoadError> {
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| CatalogLoadError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&display, &raw)
    }

    /// Parses and validates a JSON snapshot; `origin` names it in errors.
    pub fn from_json(origin: &str, raw: &str) -> Result<Self, CatalogLoadError> {
        let snapshot: CatalogSnapshot =
            serde_json::from_str(raw).map_err(|source| CatalogLoadError::Parse {
                path: origin.to_string(),
                source,
            })?;
        validate_snapshot(&snapshot).map_err(|source| CatalogLoadError::Integrity {
            path: origin.to_string(),
            source,
        })?;
        Ok(snapshot.sorted())
    }

    /// Sorts every collection by `display_order`, keeping insertion order for ties.
    pub fn sorted(mut self) -> Self {
        self.channels.sort_by_key(|channel| channel.display_order);
        self.cards.sort_by_key(|card| card.display_order);
        self.schemes.sort_by_key(|scheme| scheme.display_order);
        self.payment_methods.sort_by_key(|method| method.display_order);
        self.reward_configs.sort_by_key(|config| config.display_order);
        self
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel, NotFoundError> {
        self.channels
            .iter()
            .find(|channel| channel.id == id)
            .ok_or(NotFoundError::new(EntityKind::Channel, id.0))
    }

    pub fn card(&self, id: CardId) -> Result<&Card, NotFoundError> {
        self.cards
            .iter()
            .find(|card| card.id == id)
            .ok_or(NotFoundError::new(EntityKind::Card, id.0))
    }

    pub fn scheme(&self, id: SchemeId) -> Result<&Scheme, NotFoundError> {
        self.schemes
            .iter()
            .find(|scheme| scheme.id == id)
            .ok_or(NotFoundError::new(EntityKind::Scheme, id.0))
    }

    pub fn payment_method(&self, id: PaymentMethodId) -> Result<&PaymentMethod, NotFoundError> {
        self.payment_methods
            .iter()
            .find(|method| method.id == id)
            .ok_or(NotFoundError::new(EntityKind::PaymentMethod, id.0))
    }

    pub fn reward_config(&self, id: RewardConfigId) -> Result<&RewardConfig, NotFoundError> {
        self.reward_configs
            .iter()
            .find(|config| config.id == id)
            .ok_or(NotFoundError::new(EntityKind::RewardConfig, id.0))
    }

    pub fn schemes_on_card(&self, card_id: CardId) -> Vec<&Scheme> {
        self.schemes
            .iter()
            .filter(|scheme| scheme.card_id == card_id)
            .collect()
    }

    /// Reward configs owned directly by `owner`, in display order.
    pub fn configs_owned_by(&self, owner: RewardOwner) -> Vec<&RewardConfig> {
        self.reward_configs
            .iter()
            .filter(|config| config.owner == owner)
            .collect()
    }

    /// Removes a card together with its schemes and their reward configs.
    /// Payment-method links to the removed schemes are dropped as well.
    pub fn remove_card(&mut self, card_id: CardId) -> Result<Card, NotFoundError> {
        let position = self
            .cards
            .iter()
            .position(|card| card.id == card_id)
            .ok_or(NotFoundError::new(EntityKind::Card, card_id.0))?;
        let card = self.cards.remove(position);

        let removed: Vec<SchemeId> = self
            .schemes
            .iter()
            .filter(|scheme| scheme.card_id == card_id)
            .map(|scheme| scheme.id)
            .collect();

        self.schemes.retain(|scheme| scheme.card_id != card_id);
        self.reward_configs.retain(|config| match config.owner {
            RewardOwner::Scheme(id) => !removed.contains(&id),
            RewardOwner::PaymentMethod(_) => true,
        });
        for method in &mut self.payment_methods {
            method.linked_schemes.retain(|id| !removed.contains(id));
        }

        Ok(card)
    }

    /// Points `scheme_id` at `source_id` (or clears it) after checking the
    /// one-hop rule against this snapshot. Stores call this under the same
    /// lock or transaction as the write.
    pub fn assign_shared_group(
        &mut self,
        scheme_id: SchemeId,
        source_id: Option<SchemeId>,
    ) -> Result<Scheme, IntegrityError> {
        check_shared_group_assignment(self, scheme_id, source_id)?;
        let scheme = self
            .schemes
            .iter_mut()
            .find(|scheme| scheme.id == scheme_id)
            .ok_or(NotFoundError::new(EntityKind::Scheme, scheme_id.0))?;
        scheme.shared_reward_group_id = source_id;
        Ok(scheme.clone())
    }
}
