#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use cashback::rewards::{
    CatalogSnapshot, QuotaKey, QuotaState, QuotaStore, ReorderTarget, RepositoryError,
    RewardCatalog, RewardResolutionService, Scheme, SchemeId,
};

pub type DemoService = RewardResolutionService<SnapshotCatalog, VersionedQuotaStore>;

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub fn demo_catalog() -> CatalogSnapshot {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/demo_catalog.json");
    CatalogSnapshot::from_path(&path).expect("demo catalog loads")
}

pub fn demo_service() -> (DemoService, Arc<SnapshotCatalog>, Arc<VersionedQuotaStore>) {
    let catalog = Arc::new(SnapshotCatalog::new(demo_catalog()));
    let quotas = Arc::new(VersionedQuotaStore::default());
    let service = RewardResolutionService::new(catalog.clone(), quotas.clone());
    (service, catalog, quotas)
}

pub struct SnapshotCatalog {
    snapshot: Mutex<CatalogSnapshot>,
}

impl SnapshotCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }
}

impl RewardCatalog for SnapshotCatalog {
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

#[derive(Default)]
pub struct VersionedQuotaStore {
    rows: Mutex<HashMap<QuotaKey, QuotaState>>,
}

impl VersionedQuotaStore {
    pub fn row(&self, key: QuotaKey) -> Option<QuotaState> {
        self.rows
            .lock()
            .expect("quota mutex poisoned")
            .get(&key)
            .cloned()
    }
}

impl QuotaStore for VersionedQuotaStore {
    fn load(&self, key: &QuotaKey) -> Result<Option<QuotaState>, RepositoryError> {
        Ok(self.row(*key))
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
