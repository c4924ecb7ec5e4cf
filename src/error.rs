use thiserror::Error;

/// Ошибки хранилищ (конфигурации и журнала).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid stored data: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Ошибки платёжных операций, видимые вызывающей стороне.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment config not found for shop {0}")]
    ConfigNotFound(i64),

    #[error("payment config for shop {0} is inactive")]
    ConfigInactive(i64),

    #[error("shop {0} has no payment config and no fallback is configured")]
    ShopNotConfigured(i64),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("refund of {requested} exceeds available amount {available}")]
    InsufficientAvailableAmount { requested: i64, available: i64 },

    #[error("payment creation outcome is unknown, manual reconciliation required: {0}")]
    AmbiguousCreateOutcome(String),

    #[error("payment {0} not found")]
    PaymentNotFound(String),

    #[error("payment {external_id} is {status} and cannot be refunded")]
    NotRefundable { external_id: String, status: String },

    #[error("payment {external_id} was created for BIN {original_bin}, shop resolves to {resolved_bin}")]
    RoutingMismatch {
        external_id: String,
        original_bin: String,
        resolved_bin: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider {0} is not supported")]
    UnsupportedProvider(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    /// Стабильный код ошибки для API.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ConfigNotFound(_) => "ConfigNotFound",
            PaymentError::ConfigInactive(_) => "ConfigInactive",
            PaymentError::ShopNotConfigured(_) => "ShopNotConfigured",
            PaymentError::GatewayUnavailable(_) => "GatewayUnavailable",
            PaymentError::GatewayRejected(_) => "GatewayRejected",
            PaymentError::InsufficientAvailableAmount { .. } => "InsufficientAvailableAmount",
            PaymentError::AmbiguousCreateOutcome(_) => "AmbiguousCreateOutcome",
            PaymentError::PaymentNotFound(_) => "PaymentNotFound",
            PaymentError::NotRefundable { .. } => "NotRefundable",
            PaymentError::RoutingMismatch { .. } => "RoutingMismatch",
            PaymentError::Validation(_) => "ValidationError",
            PaymentError::UnsupportedProvider(_) => "UnsupportedProvider",
            PaymentError::Store(_) => "StoreError",
        }
    }
}

impl From<validator::ValidationErrors> for PaymentError {
    fn from(err: validator::ValidationErrors) -> Self {
        PaymentError::Validation(err.to_string())
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
