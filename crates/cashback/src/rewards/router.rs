use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::domain::{PaymentMethodId, RewardConfigId, SchemeId};
use super::quota::QuotaKey;
use super::repository::{QuotaStore, ReorderRequest, RewardCatalog};
use super::service::{RewardResolutionService, RewardServiceError};
use super::views::{
    CalculationRequest, ChannelQuery, QuotaAdjustment, QuotaConsumption, SchemeCalculationRequest,
    SharedGroupAssignment,
};

/// Router builder exposing the reward engine over HTTP.
pub fn reward_router<C, Q>(service: Arc<RewardResolutionService<C, Q>>) -> Router
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    Router::new()
        .route("/api/v1/channels/resolve", get(resolve_handler::<C, Q>))
        .route("/api/v1/rewards/query", post(query_handler::<C, Q>))
        .route("/api/v1/rewards/calculate", post(calculate_handler::<C, Q>))
        .route(
            "/api/v1/rewards/calculate-with-scheme",
            post(calculate_with_scheme_handler::<C, Q>),
        )
        .route(
            "/api/v1/schemes/:scheme_id/rewards",
            get(effective_rewards_handler::<C, Q>),
        )
        .route(
            "/api/v1/schemes/:scheme_id/shared-group",
            put(shared_group_handler::<C, Q>),
        )
        .route(
            "/api/v1/quotas/:reward_config_id",
            get(quota_status_handler::<C, Q>),
        )
        .route("/api/v1/quotas/consume", post(consume_handler::<C, Q>))
        .route("/api/v1/quotas/adjust", post(adjust_handler::<C, Q>))
        .route("/api/v1/reorder", post(reorder_handler::<C, Q>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolveParams {
    #[serde(default)]
    keyword: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuotaParams {
    #[serde(default)]
    payment_method_id: Option<i64>,
    #[serde(default)]
    as_of: Option<NaiveDate>,
}

pub(crate) async fn resolve_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    Query(params): Query<ResolveParams>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.resolve_channel(&params.keyword) {
        Ok(matches) => {
            let payload = json!({
                "keyword": params.keyword,
                "matches": matches,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn query_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    axum::Json(query): axum::Json<ChannelQuery>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.query_by_channels(&query) {
        Ok(results) => (StatusCode::OK, axum::Json(results)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn calculate_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    axum::Json(request): axum::Json<CalculationRequest>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.calculate(request.amount, &request.components) {
        Ok(breakdown) => (StatusCode::OK, axum::Json(breakdown)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn calculate_with_scheme_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    axum::Json(request): axum::Json<SchemeCalculationRequest>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.calculate_with_scheme(&request) {
        Ok(calculation) => (StatusCode::OK, axum::Json(calculation)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn effective_rewards_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    Path(scheme_id): Path<i64>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.effective_rewards(SchemeId(scheme_id)) {
        Ok(rewards) => (StatusCode::OK, axum::Json(rewards)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn shared_group_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    Path(scheme_id): Path<i64>,
    axum::Json(assignment): axum::Json<SharedGroupAssignment>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.assign_shared_group(SchemeId(scheme_id), assignment.source_scheme_id) {
        Ok(scheme) => (StatusCode::OK, axum::Json(scheme)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn quota_status_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    Path(reward_config_id): Path<i64>,
    Query(params): Query<QuotaParams>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    let key = QuotaKey::new(
        RewardConfigId(reward_config_id),
        params.payment_method_id.map(PaymentMethodId),
    );
    match service.quota_status(key, params.as_of) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn consume_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    axum::Json(request): axum::Json<QuotaConsumption>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.consume_quota(&request) {
        Ok(posting) => (StatusCode::OK, axum::Json(posting)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn adjust_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    axum::Json(request): axum::Json<QuotaAdjustment>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.adjust_quota(&request) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reorder_handler<C, Q>(
    State(service): State<Arc<RewardResolutionService<C, Q>>>,
    axum::Json(request): axum::Json<ReorderRequest>,
) -> Response
where
    C: RewardCatalog + 'static,
    Q: QuotaStore + 'static,
{
    match service.reorder(&request) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

impl RewardServiceError {
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            RewardServiceError::Validation(_) | RewardServiceError::Calculation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RewardServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            RewardServiceError::Cycle(_) | RewardServiceError::QuotaConflict { .. } => {
                StatusCode::CONFLICT
            }
            RewardServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_response(error: RewardServiceError) -> Response {
    let status = error.status_code();

    let payload = if error.is_retryable() {
        json!({
            "error": error.to_string(),
            "retryable": true,
        })
    } else {
        json!({
            "error": error.to_string(),
        })
    };
    (status, axum::Json(payload)).into_response()
}
