use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::{to_api_error, ApiResult};
use crate::{
    error::PaymentError,
    models::NewPaymentConfig,
    store::clamp_limit,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/configs", get(list_configs).post(upsert_config))
        .route("/logs", get(list_logs))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub shop_id: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /admin/configs
pub async fn list_configs(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let configs = state
        .config_store
        .list_configs()
        .await
        .map_err(|e| to_api_error(PaymentError::Store(e)))?;

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "configs": configs
    }))))
}

/// POST /admin/configs - создание или обновление маршрута магазина
pub async fn upsert_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewPaymentConfig>,
) -> ApiResult<impl IntoResponse> {
    req.validate()
        .map_err(|e| to_api_error(PaymentError::from(e)))?;

    let config = state
        .config_store
        .upsert_config(req)
        .await
        .map_err(|e| to_api_error(PaymentError::Store(e)))?;

    // Изменение должно быть видно сразу, не дожидаясь истечения TTL
    state
        .orchestrator
        .resolver()
        .invalidate(config.shop_id, config.provider)
        .await;

    tracing::info!(
        "Payment config for shop {} saved: bin={}, active={}",
        config.shop_id,
        config.organization_bin,
        config.is_active
    );

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "config": config
    }))))
}

/// GET /admin/logs?shop_id&limit
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let logs = state
        .audit_log
        .query(query.shop_id, clamp_limit(query.limit))
        .await
        .map_err(|e| to_api_error(PaymentError::Store(e)))?;

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "logs": logs
    }))))
}
