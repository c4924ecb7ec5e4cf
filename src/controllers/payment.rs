use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::{to_api_error, ApiResult};
use crate::{
    context::{ContextHints, ShopContext, ShopIdSource},
    error::PaymentError,
    middleware::ShopIdHeader,
    models::{NewLogEntry, Provider},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{provider}/create", post(create_payment))
        .route("/{provider}/create-link", post(create_payment_link))
        .route("/{provider}/status/{external_id}", get(payment_status))
        .route("/{provider}/refund", post(refund_payment))
        .route("/{provider}/config/{shop_id}", get(resolved_config))
        .route("/{provider}/logs", post(report_log_entry))
}

// --- Request структуры ---

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub shop_id: Option<i64>,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(length(min = 10, max = 20))]
    pub phone: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub message: String,
    #[serde(default)]
    pub context: Option<ContextHints>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentLinkRequest {
    pub shop_id: Option<i64>,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub message: String,
    #[serde(default)]
    pub context: Option<ContextHints>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    pub shop_id: Option<i64>,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default)]
    pub context: Option<ContextHints>,
}

fn parse_provider(raw: &str) -> ApiResult<Provider> {
    raw.parse::<Provider>().map_err(to_api_error)
}

fn validate<T: Validate>(req: &T) -> ApiResult<()> {
    req.validate()
        .map_err(|e| to_api_error(PaymentError::from(e)))
}

// --- HTTP Handlers ---

/// POST /payments/{provider}/create
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    ShopIdHeader(header_shop_id): ShopIdHeader,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let provider = parse_provider(&provider)?;
    validate(&req)?;
    let ctx = ShopContext::from_parts(req.shop_id, req.context.as_ref(), header_shop_id);

    let created = state
        .orchestrator
        .create_payment(provider, &ctx, req.amount, &req.phone, &req.message)
        .await
        .map_err(to_api_error)?;

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "shop_id": created.shop_id,
        "external_id": created.external_id,
        "status": created.status,
        "organization_bin": created.organization_bin,
        "is_fallback": created.is_fallback
    }))))
}

/// POST /payments/{provider}/create-link
pub async fn create_payment_link(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    ShopIdHeader(header_shop_id): ShopIdHeader,
    Json(req): Json<CreatePaymentLinkRequest>,
) -> ApiResult<impl IntoResponse> {
    let provider = parse_provider(&provider)?;
    validate(&req)?;
    let ctx = ShopContext::from_parts(req.shop_id, req.context.as_ref(), header_shop_id);

    let link = state
        .orchestrator
        .create_payment_link(provider, &ctx, req.amount, &req.message)
        .await
        .map_err(to_api_error)?;

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "shop_id": link.shop_id,
        "payment_link": link.payment_link,
        "payment_id": link.payment_id,
        "expire_date": link.expire_date,
        "organization_bin": link.organization_bin,
        "is_fallback": link.is_fallback
    }))))
}

/// GET /payments/{provider}/status/{external_id}
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path((provider, external_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let provider = parse_provider(&provider)?;
    let status = state
        .orchestrator
        .check_status(provider, &external_id)
        .await
        .map_err(to_api_error)?;

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "external_id": external_id,
        "status": status
    }))))
}

/// POST /payments/{provider}/refund
pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    ShopIdHeader(header_shop_id): ShopIdHeader,
    Json(req): Json<RefundRequest>,
) -> ApiResult<impl IntoResponse> {
    let provider = parse_provider(&provider)?;
    validate(&req)?;
    let ctx = ShopContext::from_parts(req.shop_id, req.context.as_ref(), header_shop_id);

    let refund = state
        .orchestrator
        .refund(provider, &ctx, &req.external_id, req.amount)
        .await
        .map_err(to_api_error)?;

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "external_id": refund.external_id,
        "refunded_amount": refund.refunded_amount,
        "organization_bin": refund.organization_bin
    }))))
}

/// GET /payments/{provider}/config/{shop_id} - маршрут магазина для клиента витрины
pub async fn resolved_config(
    State(state): State<Arc<AppState>>,
    Path((provider, shop_id)): Path<(String, i64)>,
) -> ApiResult<impl IntoResponse> {
    let provider = parse_provider(&provider)?;
    if shop_id <= 0 {
        return Err(to_api_error(PaymentError::Validation("shop_id must be positive".to_string())));
    }

    let config = state
        .orchestrator
        .resolver()
        .resolve_shop(shop_id, ShopIdSource::Explicit, provider)
        .await
        .map_err(to_api_error)?;

    Ok((StatusCode::OK, Json(json!({
        "success": true,
        "config": config
    }))))
}

/// POST /payments/{provider}/logs - запись журнала от клиента витрины
pub async fn report_log_entry(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Json(mut entry): Json<NewLogEntry>,
) -> ApiResult<impl IntoResponse> {
    entry.provider = parse_provider(&provider)?;
    entry.reported_by_client = true;
    validate(&entry)?;

    let id = state
        .audit_log
        .append(entry)
        .await
        .map_err(|e| to_api_error(PaymentError::Store(e)))?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "id": id
    }))))
}
