use serde::{Deserialize, Serialize};

use super::domain::{match_key, Channel, ChannelId};

/// Match quality, best first. Ordering follows the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    ExactName,
    ExactAlias,
    AliasContains,
    NameContains,
}

impl MatchTier {
    pub const fn rank(self) -> u8 {
        match self {
            MatchTier::ExactName => 0,
            MatchTier::ExactAlias => 1,
            MatchTier::AliasContains => 2,
            MatchTier::NameContains => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub channel_id: ChannelId,
    pub display_name: String,
    pub tier: MatchTier,
    /// Alias that produced an alias-tier match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_alias: Option<String>,
}

/// Resolves free-text merchant names to channels.
///
/// Results are ranked by tier; channels on the same tier keep the order in
/// which they were supplied.
pub struct ChannelMatcher;

impl ChannelMatcher {
    pub fn rank<'a, I>(keyword: &str, channels: I) -> Vec<RankedMatch>
    where
        I: IntoIterator<Item = &'a Channel>,
    {
        let key = match_key(keyword);
        if key.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<RankedMatch> = channels
            .into_iter()
            .filter_map(|channel| classify(&key, channel))
            .collect();
        matches.sort_by_key(|ranked| ranked.tier);
        matches
    }

    /// Best match only, if any.
    pub fn best<'a, I>(keyword: &str, channels: I) -> Option<RankedMatch>
    where
        I: IntoIterator<Item = &'a Channel>,
    {
        Self::rank(keyword, channels).into_iter().next()
    }
}

fn classify(key: &str, channel: &Channel) -> Option<RankedMatch> {
    let name = channel.name();
    let found = |tier: MatchTier, alias: Option<usize>| RankedMatch {
        channel_id: channel.id,
        display_name: channel.display_name().to_string(),
        tier,
        matched_alias: alias.map(|index| name.aliases()[index].clone()),
    };

    if name.base_key() == key {
        return Some(found(MatchTier::ExactName, None));
    }
    if let Some(index) = name.alias_keys().iter().position(|alias| alias == key) {
        return Some(found(MatchTier::ExactAlias, Some(index)));
    }
    if let Some(index) = name.alias_keys().iter().position(|alias| alias.contains(key)) {
        return Some(found(MatchTier::AliasContains, Some(index)));
    }
    if name.base_key().contains(key) || name.display_key().contains(key) {
        return Some(found(MatchTier::NameContains, None));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<Channel> {
        vec![
            Channel::new(ChannelId(1), "全聯福利中心 (全聯, PX Mart)"),
            Channel::new(ChannelId(2), "Uber Eats (UberEats)"),
            Channel::new(ChannelId(3), "Uber"),
            Channel::new(ChannelId(4), "全聯"),
        ]
    }

    fn tiers(keyword: &str) -> Vec<(i64, u8)> {
        ChannelMatcher::rank(keyword, &channels())
            .into_iter()
            .map(|ranked| (ranked.channel_id.0, ranked.tier.rank()))
            .collect()
    }

    #[test]
    fn base_name_alias_and_substring_tiers() {
        let catalog = vec![Channel::new(ChannelId(9), "Base (alpha, beta)")];

        let exact = ChannelMatcher::best("Base", &catalog).expect("base match");
        assert_eq!(exact.tier, MatchTier::ExactName);

        let alias = ChannelMatcher::best("alpha", &catalog).expect("alias match");
        assert_eq!(alias.tier, MatchTier::ExactAlias);
        assert_eq!(alias.matched_alias.as_deref(), Some("alpha"));

        let partial_alias = ChannelMatcher::best("lph", &catalog).expect("partial alias");
        assert_eq!(partial_alias.tier, MatchTier::AliasContains);

        let partial_name = ChannelMatcher::best("as", &catalog).expect("partial name");
        assert_eq!(partial_name.tier, MatchTier::NameContains);
    }

    #[test]
    fn matching_is_case_insensitive_and_trimmed() {
        assert_eq!(tiers("  uber eats "), vec![(2, 0)]);
        assert_eq!(tiers("px mart"), vec![(1, 1)]);
    }

    #[test]
    fn ties_keep_source_order() {
        // "uber" is an exact base name for 3, an alias substring for 2.
        assert_eq!(tiers("UBER"), vec![(3, 0), (2, 2)]);

        // "全聯" is the exact base of 4 and an exact alias of 1.
        assert_eq!(tiers("全聯"), vec![(4, 0), (1, 1)]);

        let swapped = vec![
            Channel::new(ChannelId(20), "Costco Online"),
            Channel::new(ChannelId(10), "Costco Warehouse"),
        ];
        let ranked: Vec<i64> = ChannelMatcher::rank("costco", &swapped)
            .into_iter()
            .map(|ranked| ranked.channel_id.0)
            .collect();
        assert_eq!(ranked, vec![20, 10]);
    }

    #[test]
    fn empty_keyword_matches_nothing() {
        assert!(ChannelMatcher::rank("", &channels()).is_empty());
        assert!(ChannelMatcher::rank("   ", &channels()).is_empty());
    }

    #[test]
    fn unknown_keyword_yields_empty_result() {
        assert!(ChannelMatcher::rank("family mart", &channels()).is_empty());
    }
}
