use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::rewards::domain::{
    CalculationBasis, Card, CardId, Channel, ChannelApplication, ChannelId, PaymentMethod,
    PaymentMethodId, QuotaRefresh, RewardConfig, RewardConfigId, RewardOwner, RoundingMethod,
    Scheme, SchemeId,
};
use crate::rewards::quota::{QuotaKey, QuotaState};
use crate::rewards::repository::{QuotaStore, ReorderTarget, RepositoryError, RewardCatalog};
use crate::rewards::{reward_router, CatalogSnapshot, RewardResolutionService};

pub(super) const PX_MART: ChannelId = ChannelId(1);
pub(super) const UBER_EATS: ChannelId = ChannelId(2);
pub(super) const SHOPEE: ChannelId = ChannelId(3);
pub(super) const COSTCO: ChannelId = ChannelId(4);

pub(super) const EVERYDAY: SchemeId = SchemeId(10);
pub(super) const ONLINE: SchemeId = SchemeId(11);
pub(super) const DELIVERY: SchemeId = SchemeId(12);
pub(super) const SUPERMARKET: SchemeId = SchemeId(20);

pub(super) const LINE_PAY: PaymentMethodId = PaymentMethodId(5);
pub(super) const JKOPAY: PaymentMethodId = PaymentMethodId(6);

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

fn application(channel_id: ChannelId, note: Option<&str>) -> ChannelApplication {
    ChannelApplication {
        channel_id,
        note: note.map(str::to_string),
    }
}

fn scheme(id: SchemeId, card_id: i64, name: &str, order: i32) -> Scheme {
    Scheme {
        id,
        card_id: CardId(card_id),
        name: name.to_string(),
        requires_switch: false,
        activity_start: None,
        activity_end: None,
        shared_reward_group_id: None,
        display_order: order,
        applications: Vec::new(),
        exclusions: Vec::new(),
    }
}

pub(super) fn reward(
    id: i64,
    owner: RewardOwner,
    percentage: Decimal,
    method: RoundingMethod,
) -> RewardConfig {
    RewardConfig {
        id: RewardConfigId(id),
        owner,
        percentage,
        calculation_method: method,
        quota_limit: None,
        quota_refresh: QuotaRefresh::None,
        calculation_basis: CalculationBasis::PerTransaction,
        display_order: 0,
    }
}

/// Two cards, four channels, four schemes and two payment methods.
///
/// * Everyday (10) applies everywhere except PX Mart: 0.3% + 2.7%, the
///   2.7% part capped at 300 and refreshed on the 1st.
/// * Online Shopping (11) covers Shopee and Uber Eats: 3% floor, capped at
///   200 and refreshed on the 15th.
/// * Food Delivery (12) covers Uber Eats and shares Online Shopping's rewards.
/// * Supermarket (20) on the second card covers PX Mart and Costco until the
///   end of 2024: 2%, capped at 100 for the activity.
/// * LINE Pay (5) has no configs and pays its 0.5% baseline; it is linked to
///   Online Shopping. Jkopay (6) covers PX Mart with a 1% floor config.
pub(super) fn snapshot() -> CatalogSnapshot {
    let mut everyday = scheme(EVERYDAY, 1, "Everyday", 0);
    everyday.exclusions.push(PX_MART);

    let mut online = scheme(ONLINE, 1, "Online Shopping", 1);
    online.applications = vec![
        application(SHOPEE, Some("app orders only")),
        application(UBER_EATS, None),
    ];

    let mut delivery = scheme(DELIVERY, 1, "Food Delivery", 2);
    delivery.applications = vec![application(UBER_EATS, None)];
    delivery.shared_reward_group_id = Some(ONLINE);
    delivery.requires_switch = true;
    delivery.activity_start = Some(date(2024, 1, 1));
    delivery.activity_end = Some(date(2024, 6, 30));

    let mut supermarket = scheme(SUPERMARKET, 2, "Supermarket", 0);
    supermarket.applications = vec![application(PX_MART, None), application(COSTCO, None)];
    supermarket.activity_end = Some(date(2024, 12, 31));

    let mut everyday_capped = reward(
        101,
        RewardOwner::Scheme(EVERYDAY),
        dec!(2.7),
        RoundingMethod::Round,
    );
    everyday_capped.quota_limit = Some(dec!(300));
    everyday_capped.quota_refresh = QuotaRefresh::Monthly { day: 1 };
    everyday_capped.display_order = 1;

    let mut online_config = reward(
        110,
        RewardOwner::Scheme(ONLINE),
        dec!(3),
        RoundingMethod::Floor,
    );
    online_config.quota_limit = Some(dec!(200));
    online_config.quota_refresh = QuotaRefresh::Monthly { day: 15 };

    let mut supermarket_config = reward(
        200,
        RewardOwner::Scheme(SUPERMARKET),
        dec!(2),
        RoundingMethod::Round,
    );
    supermarket_config.quota_limit = Some(dec!(100));
    supermarket_config.quota_refresh = QuotaRefresh::Activity;

    CatalogSnapshot {
        channels: vec![
            Channel::new(PX_MART, "全聯福利中心 (全聯, PX Mart)")
                .common(true)
                .ordered(0),
            Channel::new(UBER_EATS, "Uber Eats (UberEats)").ordered(1),
            Channel::new(SHOPEE, "Shopee (蝦皮)").ordered(2),
            Channel::new(COSTCO, "Costco").ordered(3),
        ],
        cards: vec![
            Card {
                id: CardId(1),
                name: "Cube Card".to_string(),
                note: None,
                display_order: 0,
            },
            Card {
                id: CardId(2),
                name: "Daily Card".to_string(),
                note: Some("annual fee waived".to_string()),
                display_order: 1,
            },
        ],
        schemes: vec![everyday, online, delivery, supermarket],
        payment_methods: vec![
            PaymentMethod {
                id: LINE_PAY,
                name: "LINE Pay".to_string(),
                own_reward_percentage: dec!(0.5),
                display_order: 0,
                applications: vec![application(UBER_EATS, None), application(SHOPEE, None)],
                linked_schemes: vec![ONLINE],
            },
            PaymentMethod {
                id: JKOPAY,
                name: "Jkopay".to_string(),
                own_reward_percentage: dec!(0),
                display_order: 1,
                applications: vec![application(PX_MART, None)],
                linked_schemes: Vec::new(),
            },
        ],
        reward_configs: vec![
            reward(
                100,
                RewardOwner::Scheme(EVERYDAY),
                dec!(0.3),
                RoundingMethod::Round,
            ),
            everyday_capped,
            online_config,
            supermarket_config,
            reward(
                600,
                RewardOwner::PaymentMethod(JKOPAY),
                dec!(1),
                RoundingMethod::Floor,
            ),
        ],
    }
}

pub(super) type TestService = RewardResolutionService<MemoryCatalog, MemoryQuotaStore>;

pub(super) fn build_service() -> (TestService, Arc<MemoryCatalog>, Arc<MemoryQuotaStore>) {
    let catalog = Arc::new(MemoryCatalog::new(snapshot()));
    let quotas = Arc::new(MemoryQuotaStore::default());
    let service = RewardResolutionService::new(catalog.clone(), quotas.clone());
    (service, catalog, quotas)
}

#[derive(Default)]
pub(super) struct MemoryCatalog {
    snapshot: Mutex<CatalogSnapshot>,
}

impl MemoryCatalog {
    pub(super) fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot.sorted()),
        }
    }

    pub(super) fn update(&self, change: impl FnOnce(&mut CatalogSnapshot)) {
        let mut guard = self.snapshot.lock().expect("catalog mutex poisoned");
        change(&mut guard);
    }
}

impl RewardCatalog for MemoryCatalog {
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
pub(super) struct MemoryQuotaStore {
    rows: Mutex<HashMap<QuotaKey, QuotaState>>,
}

impl MemoryQuotaStore {
    pub(super) fn row(&self, key: QuotaKey) -> Option<QuotaState> {
        self.rows
            .lock()
            .expect("quota mutex poisoned")
            .get(&key)
            .cloned()
    }

    pub(super) fn seed(&self, state: QuotaState) {
        self.rows
            .lock()
            .expect("quota mutex poisoned")
            .insert(state.key, state);
    }
}

impl QuotaStore for MemoryQuotaStore {
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

/// Store whose rows always move underneath the caller.
pub(super) struct ConflictQuotaStore;

impl QuotaStore for ConflictQuotaStore {
    fn load(&self, _key: &QuotaKey) -> Result<Option<QuotaState>, RepositoryError> {
        Ok(None)
    }

    fn compare_and_swap(
        &self,
        _expected_version: u64,
        _next: QuotaState,
    ) -> Result<QuotaState, RepositoryError> {
        Err(RepositoryError::Conflict)
    }
}

pub(super) struct UnavailableCatalog;

impl RewardCatalog for UnavailableCatalog {
    fn snapshot(&self) -> Result<CatalogSnapshot, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn set_shared_reward_group(
        &self,
        _scheme_id: SchemeId,
        _source_id: Option<SchemeId>,
    ) -> Result<Scheme, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn reorder(&self, _target: &ReorderTarget, _ordered_ids: &[i64]) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) fn reward_router_with_service(service: TestService) -> axum::Router {
    reward_router(Arc::new(service))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
