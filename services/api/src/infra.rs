use cashback::config::EngineConfig;
use cashback::error::AppError;
use cashback::rewards::{
    CatalogSnapshot, QuotaKey, QuotaState, QuotaStore, ReorderTarget, RepositoryError,
    RewardCatalog, RewardComponent, RewardResolutionService, RoundingMethod, Scheme, SchemeId,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

const DEMO_CATALOG: &str = include_str!("../../../crates/cashback/data/demo_catalog.json");

pub(crate) type EngineService = RewardResolutionService<InMemoryCatalog, InMemoryQuotaStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Catalog held in process memory, loaded once at startup.
#[derive(Default, Clone)]
pub(crate) struct InMemoryCatalog {
    snapshot: Arc<Mutex<CatalogSnapshot>>,
}

impl InMemoryCatalog {
    pub(crate) fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(snapshot.sorted())),
        }
    }
}

impl RewardCatalog for InMemoryCatalog {
    fn snapshot(&self) -> Result<CatalogSnapshot, RepositoryError> {
        let guard = self.snapshot.lock().expect("catalog mutex poisoned");
        Ok(guard.clone().sorted())
    }

    fn set_shared_reward_group(
        &self,
        scheme_id: SchemeId,
        source_id: Option<SchemeId>,
    ) -> Result<Scheme, RepositoryError> {
        let mut guard = self.snapshot.lock().expect("catalog mutex poisoned");
        Ok(guard.assign_shared_group(scheme_id, source_id)?)
    }

    fn reorder(&self, target: &ReorderTarget, ordered_ids: &[i64]) -> Result<(), RepositoryError> {
        let mut guard = self.snapshot.lock().expect("catalog mutex poisoned");
        target.apply(&mut guard, ordered_ids);
        Ok(())
    }
}

/// Versioned quota rows; a write only lands when the caller saw the latest version.
#[derive(Default, Clone)]
pub(crate) struct InMemoryQuotaStore {
    rows: Arc<Mutex<HashMap<QuotaKey, QuotaState>>>,
}

impl QuotaStore for InMemoryQuotaStore {
    fn load(&self, key: &QuotaKey) -> Result<Option<QuotaState>, RepositoryError> {
        let guard = self.rows.lock().expect("quota mutex poisoned");
        Ok(guard.get(key).cloned())
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        mut next: QuotaState,
    ) -> Result<QuotaState, RepositoryError> {
        let mut guard = self.rows.lock().expect("quota mutex poisoned");
        let current = guard.get(&next.key).map_or(0, |row| row.version);
        if current != expected_version {
            return Err(RepositoryError::Conflict);
        }
        next.version = expected_version + 1;
        guard.insert(next.key, next.clone());
        Ok(next)
    }
}

/// Reads the configured snapshot, or the bundled demo catalog when none is set.
pub(crate) fn load_catalog(path: Option<&Path>) -> Result<CatalogSnapshot, AppError> {
    let snapshot = match path {
        Some(path) => CatalogSnapshot::from_path(path)?,
        None => demo_catalog()?,
    };
    info!(
        source = %path.map_or_else(|| "built-in".to_string(), |path| path.display().to_string()),
        channels = snapshot.channels.len(),
        schemes = snapshot.schemes.len(),
        payment_methods = snapshot.payment_methods.len(),
        "catalog loaded"
    );
    Ok(snapshot)
}

pub(crate) fn demo_catalog() -> Result<CatalogSnapshot, AppError> {
    Ok(CatalogSnapshot::from_json("built-in demo catalog", DEMO_CATALOG)?)
}

pub(crate) fn build_engine(
    config: &EngineConfig,
    snapshot: CatalogSnapshot,
) -> Arc<EngineService> {
    let catalog = Arc::new(InMemoryCatalog::new(snapshot));
    let quotas = Arc::new(InMemoryQuotaStore::default());
    Arc::new(RewardResolutionService::new(catalog, quotas).with_utc_offset(config.utc_offset))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|err| format!("failed to parse '{raw}' as a decimal ({err})"))
}

/// Parses `PERCENT[:METHOD]`, e.g. `2.7` or `3:floor`. The method defaults to round.
pub(crate) fn parse_component(raw: &str) -> Result<RewardComponent, String> {
    let (percentage, method) = match raw.split_once(':') {
        Some((percentage, method)) => {
            let method = RoundingMethod::parse(method).ok_or_else(|| {
                format!("unknown rounding method '{method}' (expected round, floor or ceil)")
            })?;
            (percentage, method)
        }
        None => (raw, RoundingMethod::Round),
    };
    Ok(RewardComponent::new(parse_decimal(percentage)?, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn component_argument_defaults_to_round() {
        assert_eq!(
            parse_component("2.7").expect("parses"),
            RewardComponent::new(dec!(2.7), RoundingMethod::Round)
        );
        assert_eq!(
            parse_component("3:floor").expect("parses"),
            RewardComponent::new(dec!(3), RoundingMethod::Floor)
        );
        assert!(parse_component("3:banker").is_err());
        assert!(parse_component("abc").is_err());
    }

    #[test]
    fn built_in_catalog_is_valid() {
        let snapshot = load_catalog(None).expect("demo catalog loads");
        assert!(!snapshot.channels.is_empty());
        assert!(!snapshot.reward_configs.is_empty());
    }

    #[test]
    fn missing_catalog_file_is_reported() {
        let error = load_catalog(Some(Path::new("/nonexistent/catalog.json")))
            .expect_err("missing file fails");
        assert!(matches!(error, AppError::Catalog(_)));
    }

    #[test]
    fn quota_store_rejects_stale_versions() {
        let store = InMemoryQuotaStore::default();
        let key = QuotaKey::new(cashback::rewards::RewardConfigId(1), None);

        let stored = store
            .compare_and_swap(0, QuotaState::new(key))
            .expect("first write");
        assert_eq!(stored.version, 1);
        assert!(matches!(
            store.compare_and_swap(0, QuotaState::new(key)),
            Err(RepositoryError::Conflict)
        ));
        assert_eq!(store.load(&key).expect("loads").map(|row| row.version), Some(1));
    }
}
