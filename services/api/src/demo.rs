use crate::cli::{CalculateArgs, CatalogArgs, DemoArgs, QueryArgs, ResolveArgs};
use crate::infra::{build_engine, demo_catalog, load_catalog, EngineService};
use cashback::config::{AppConfig, EngineConfig};
use cashback::error::AppError;
use cashback::rewards::{
    ChannelQuery, ChannelRewards, ChannelSelector, PaymentMethodId, QuotaConsumption, QuotaKey,
    QuotaView, RankedMatch, RewardBreakdown, RewardCandidate, RewardConfigId,
    SchemeCalculation, SchemeCalculationRequest, SchemeId,
};
use cashback::telemetry;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

fn engine_for(catalog: CatalogArgs) -> Result<Arc<EngineService>, AppError> {
    telemetry::init_for_cli()?;
    let mut config = AppConfig::load()?;
    if let Some(path) = catalog.path {
        config.engine.catalog_path = Some(path);
    }
    let snapshot = load_catalog(config.engine.catalog_path.as_deref())?;
    Ok(build_engine(&config.engine, snapshot))
}

pub(crate) fn run_resolve(args: ResolveArgs) -> Result<(), AppError> {
    let service = engine_for(args.catalog)?;
    let matches = service.resolve_channel(&args.keyword)?;
    render_matches(&args.keyword, &matches);
    Ok(())
}

pub(crate) fn run_query(args: QueryArgs) -> Result<(), AppError> {
    let QueryArgs {
        channels,
        amount,
        as_of,
        json,
        catalog,
    } = args;

    let service = engine_for(catalog)?;
    let query = ChannelQuery {
        channels: channels
            .iter()
            .map(|raw| ChannelSelector::parse(raw))
            .collect(),
        amount,
        as_of,
    };
    let results = service.query_by_channels(&query)?;

    if json {
        match serde_json::to_string_pretty(&results) {
            Ok(payload) => println!("{payload}"),
            Err(err) => println!("Query result unavailable as JSON: {err}"),
        }
        return Ok(());
    }

    for result in &results {
        if result.matches.is_empty() {
            println!("\n{}: no matching channel", result.selector);
            continue;
        }
        for channel in &result.matches {
            render_channel_rewards(channel);
        }
    }
    Ok(())
}

pub(crate) fn run_calculate(args: CalculateArgs) -> Result<(), AppError> {
    let CalculateArgs {
        amount,
        components,
        scheme,
        payment_method,
        as_of,
        catalog,
    } = args;

    let service = engine_for(catalog)?;
    if scheme.is_none() && payment_method.is_none() {
        let breakdown = service.calculate(amount, &components)?;
        render_breakdown(&breakdown);
        return Ok(());
    }

    let calculation = service.calculate_with_scheme(&SchemeCalculationRequest {
        amount,
        scheme_id: scheme.map(SchemeId),
        payment_method_id: payment_method.map(PaymentMethodId),
        as_of,
    })?;
    render_scheme_calculation(&calculation);
    Ok(())
}

/// Scripted tour of the built-in catalog. Quota state lives only for the run.
pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let as_of = args.as_of.unwrap_or_else(default_demo_date);
    let service = build_engine(&EngineConfig::default(), demo_catalog()?);

    println!("Cashback engine demo (as of {as_of})");

    for keyword in ["優食", "7-11", "costco"] {
        match service.resolve_channel(keyword) {
            Ok(matches) => render_matches(keyword, &matches),
            Err(err) => println!("  Resolution unavailable: {err}"),
        }
    }

    println!("\nBest rewards for a 1000 purchase");
    let query = ChannelQuery {
        channels: vec![
            ChannelSelector::parse("uber"),
            ChannelSelector::parse("好市多"),
        ],
        amount: Some(Decimal::ONE_THOUSAND),
        as_of: Some(as_of),
    };
    match service.query_by_channels(&query) {
        Ok(results) => results
            .iter()
            .flat_map(|result| result.matches.iter())
            .for_each(render_channel_rewards),
        Err(err) => println!("  Query unavailable: {err}"),
    }

    println!("\nPreview: Digital scheme paid through LINE Pay");
    match service.calculate_with_scheme(&SchemeCalculationRequest {
        amount: Decimal::ONE_THOUSAND,
        scheme_id: Some(SchemeId(10)),
        payment_method_id: Some(PaymentMethodId(1)),
        as_of: Some(as_of),
    }) {
        Ok(calculation) => render_scheme_calculation(&calculation),
        Err(err) => println!("  Preview unavailable: {err}"),
    }

    println!("\nStatement-total quota: two 150 purchases on Top Merchants");
    for _ in 0..2 {
        let posted = service.consume_quota(&QuotaConsumption {
            reward_config_id: RewardConfigId(200),
            payment_method_id: None,
            amount: Decimal::from(150),
            as_of: Some(as_of),
        });
        match posted {
            Ok(posting) => println!(
                "- earned {} (payable {}) | used {} of {}",
                posting.reward,
                posting.payable,
                posting.quota.used_amount,
                limit_label(posting.quota.quota_limit)
            ),
            Err(err) => println!("  Consumption rejected: {err}"),
        }
    }
    match service.quota_status(QuotaKey::new(RewardConfigId(200), None), Some(as_of)) {
        Ok(view) => render_quota(&view),
        Err(err) => println!("  Quota status unavailable: {err}"),
    }

    println!("\nShared reward group");
    match service.effective_rewards(SchemeId(13)) {
        Ok(rewards) => println!(
            "- scheme {} uses scheme {}'s {} reward config(s)",
            rewards.scheme_id.0,
            rewards.source_scheme_id.0,
            rewards.configs.len()
        ),
        Err(err) => println!("  Effective rewards unavailable: {err}"),
    }

    Ok(())
}

fn default_demo_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap_or(NaiveDate::MIN)
}

fn render_matches(keyword: &str, matches: &[RankedMatch]) {
    if matches.is_empty() {
        println!("'{keyword}' matched no channel");
        return;
    }
    println!("'{keyword}' matched {} channel(s):", matches.len());
    for ranked in matches {
        match &ranked.matched_alias {
            Some(alias) => println!(
                "  - #{} {} ({:?} via '{}')",
                ranked.channel_id.0, ranked.display_name, ranked.tier, alias
            ),
            None => println!(
                "  - #{} {} ({:?})",
                ranked.channel_id.0, ranked.display_name, ranked.tier
            ),
        }
    }
}

fn render_channel_rewards(channel: &ChannelRewards) {
    println!("\n{} (#{})", channel.display_name, channel.channel_id.0);
    if channel.included.is_empty() {
        println!("  No applicable rewards");
    }
    for candidate in &channel.included {
        println!("  - {}", candidate_line(candidate));
    }
    for candidate in &channel.excluded {
        println!(
            "  x {} excludes this channel",
            candidate.excluded_by.as_deref().unwrap_or(&candidate.name)
        );
    }
}

fn candidate_line(candidate: &RewardCandidate) -> String {
    let mut line = format!("{} {}%", candidate.name, candidate.total_percentage);
    if let Some(reward) = candidate.total_reward {
        line.push_str(&format!(" -> {reward}"));
    }
    if candidate.requires_switch {
        line.push_str(" [switch required]");
    }
    if !candidate.is_active {
        line.push_str(" [inactive]");
    }
    if let Some(note) = &candidate.note {
        line.push_str(&format!(" ({note})"));
    }
    line
}

fn render_breakdown(breakdown: &RewardBreakdown) {
    println!("Amount {}", breakdown.amount);
    for component in &breakdown.components {
        println!(
            "  - {}% {} -> {}",
            component.percentage,
            component.method.label(),
            component.reward
        );
    }
    println!(
        "Total {}% -> {}",
        breakdown.total_percentage, breakdown.total
    );
}

fn render_scheme_calculation(calculation: &SchemeCalculation) {
    println!("Amount {} on {}", calculation.amount, calculation.as_of);
    for component in &calculation.breakdown {
        let source = component
            .reward_config_id
            .map_or_else(|| "baseline".to_string(), |id| format!("config {}", id.0));
        println!(
            "  - {}: {}% {} -> {}",
            source,
            component.percentage,
            component.method.label(),
            component.reward
        );
    }
    for projection in &calculation.quota_projection {
        println!(
            "  quota {}: used {} -> {} of {}",
            projection.reward_config_id.0,
            projection.used_before,
            projection.used_after,
            limit_label(projection.quota_limit)
        );
    }
    println!(
        "Total {} | payable {}",
        calculation.total, calculation.payable_total
    );
}

fn render_quota(view: &QuotaView) {
    println!(
        "- quota {} ({}) | used {} | remaining {} | basis {}",
        view.reward_config_id.0,
        view.refresh_type.label(),
        view.used_amount,
        view.remaining_amount
            .map_or_else(|| "unlimited".to_string(), |remaining| remaining.to_string()),
        view.basis_amount
    );
}

fn limit_label(limit: Option<Decimal>) -> String {
    limit.map_or_else(|| "unlimited".to_string(), |limit| limit.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn demo_walkthrough_completes() {
        run_demo(DemoArgs::default()).expect("demo runs");
    }

    #[test]
    fn candidate_line_flags_switch_and_inactive_schemes() {
        let service = build_engine(
            &EngineConfig::default(),
            demo_catalog().expect("demo catalog loads"),
        );
        let results = service
            .query_by_channels(&ChannelQuery {
                channels: vec![ChannelSelector::parse("5")],
                amount: Some(dec!(1000)),
                as_of: NaiveDate::from_ymd_opt(2025, 8, 1),
            })
            .expect("query succeeds");

        let promo = &results[0].matches[0].included[0];
        assert_eq!(
            candidate_line(promo),
            "Wholesale Promo 2% -> 20 [switch required] [inactive]"
        );
    }

    #[test]
    fn limit_label_marks_unlimited_quotas() {
        assert_eq!(limit_label(None), "unlimited");
        assert_eq!(limit_label(Some(dec!(300))), "300");
    }
}
