use serde::{Deserialize, Serialize};

use super::domain::{
    ChannelApplication, ChannelId, EntityKind, PaymentMethod, RewardConfig, RewardOwner, Scheme,
};
use super::validation::{CycleError, IntegrityError, NotFoundError, ValidationError};

/// How a scheme or payment method relates to one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Applicability {
    Included {
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Excluded,
    NotApplicable,
}

/// Resolves the reward configs a scheme actually pays out and whether it
/// applies to a channel.
pub struct SchemeRewardResolver;

impl SchemeRewardResolver {
    /// Scheme whose configs `scheme` pays out: itself, or its shared-group
    /// source one hop away. Longer chains are rejected rather than walked.
    pub fn source_scheme<'a, I>(scheme: &'a Scheme, schemes_on_card: I) -> Result<&'a Scheme, IntegrityError>
    where
        I: IntoIterator<Item = &'a Scheme>,
    {
        let Some(source_id) = scheme.shared_reward_group_id else {
            return Ok(scheme);
        };

        let source = schemes_on_card
            .into_iter()
            .find(|candidate| candidate.id == source_id)
            .ok_or(NotFoundError::new(EntityKind::Scheme, source_id.0))?;

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
            None => Ok(source),
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
        }
    }

    /// Configs paid out by `scheme`, in the order supplied.
    pub fn effective_rewards<'a, S, R>(
        scheme: &'a Scheme,
        schemes_on_card: S,
        configs: R,
    ) -> Result<Vec<&'a RewardConfig>, IntegrityError>
    where
        S: IntoIterator<Item = &'a Scheme>,
        R: IntoIterator<Item = &'a RewardConfig>,
    {
        let source = Self::source_scheme(scheme, schemes_on_card)?;
        let owner = RewardOwner::Scheme(source.id);
        Ok(configs
            .into_iter()
            .filter(|config| config.owner == owner)
            .collect())
    }

    /// Exclusions win over inclusions; an empty application set applies everywhere.
    pub fn scheme_applicability(scheme: &Scheme, channel_id: ChannelId) -> Applicability {
        if scheme.exclusions.contains(&channel_id) {
            return Applicability::Excluded;
        }
        included(&scheme.applications, channel_id)
    }

    pub fn payment_method_applicability(
        method: &PaymentMethod,
        channel_id: ChannelId,
    ) -> Applicability {
        included(&method.applications, channel_id)
    }
}

fn included(applications: &[ChannelApplication], channel_id: ChannelId) -> Applicability {
    if applications.is_empty() {
        return Applicability::Included { note: None };
    }
    applications
        .iter()
        .find(|application| application.channel_id == channel_id)
        .map_or(Applicability::NotApplicable, |application| {
            Applicability::Included {
                note: application.note.clone(),
            }
        })
}
