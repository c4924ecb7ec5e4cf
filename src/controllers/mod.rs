pub mod admin;
pub mod payment;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{PaymentError, StoreError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ApiError {
    success: bool,
    code: &'static str,
    message: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn status_for(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
        PaymentError::UnsupportedProvider(_) | PaymentError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::ConfigNotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::NotRefundable { .. } | PaymentError::RoutingMismatch { .. } => StatusCode::CONFLICT,
        PaymentError::ConfigInactive(_)
        | PaymentError::ShopNotConfigured(_)
        | PaymentError::InsufficientAvailableAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PaymentError::GatewayRejected(_) => StatusCode::BAD_GATEWAY,
        PaymentError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PaymentError::AmbiguousCreateOutcome(_) => StatusCode::GATEWAY_TIMEOUT,
        PaymentError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
        PaymentError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn to_api_error(err: PaymentError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::warn!("Request rejected: {}", err);
    }
    (
        status,
        Json(ApiError {
            success: false,
            code: err.code(),
            message: err.to_string(),
        }),
    )
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/payments", payment::routes())
        .nest("/admin", admin::routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_map_to_distinct_statuses() {
        assert_eq!(
            status_for(&PaymentError::AmbiguousCreateOutcome("t".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&PaymentError::GatewayUnavailable("c".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&PaymentError::InsufficientAvailableAmount { requested: 1, available: 0 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&PaymentError::UnsupportedProvider("halyk".into())),
            StatusCode::NOT_FOUND
        );
    }
}
