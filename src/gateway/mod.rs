//! Адаптеры внешних платёжных шлюзов.
//!
//! Адаптер только ходит в сеть и нормализует ответы. В журнал операций он не пишет:
//! каждую попытку ровно один раз журналирует оркестратор, включая попытки, где
//! сам вызов адаптера завершился ошибкой.

pub mod circuit_breaker;
pub mod kaspi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{PaymentStatus, Provider, ResolvedConfig};

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use kaspi::KaspiGateway;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Соединение не установлено - запрос гарантированно не ушёл в шлюз.
    #[error("connection to gateway failed: {0}")]
    Connect(String),

    #[error("gateway request timed out: {0}")]
    Timeout(String),

    /// Запрос отправлен, но ответ прочитать не удалось.
    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("refund exceeds the available amount")]
    InsufficientAvailableAmount { available: Option<i64> },

    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,

    #[error("gateway client misconfigured: {0}")]
    Config(String),
}

impl GatewayError {
    /// Запрос точно не дошёл до шлюза.
    pub fn request_not_sent(&self) -> bool {
        matches!(
            self,
            GatewayError::Connect(_) | GatewayError::CircuitOpen | GatewayError::Config(_)
        )
    }

    /// Транспортный сбой, после которого идемпотентную операцию можно повторить.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Connect(_) | GatewayError::Timeout(_) | GatewayError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        // Таймаут соединения помечен и is_connect, и is_timeout: запрос не ушёл, это Connect
        if err.is_connect() {
            GatewayError::Connect(err.to_string())
        } else if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_builder() {
            GatewayError::Config(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPayment {
    pub external_id: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub payment_link: String,
    pub payment_id: String,
    pub expire_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refunded_amount: i64,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Выставляет счёт на номер телефона клиента.
    async fn create(
        &self,
        config: &ResolvedConfig,
        amount: i64,
        phone: &str,
        message: &str,
    ) -> Result<CreatedPayment, GatewayError>;

    /// Создаёт ссылку на оплату, которую вызывающий сам отправит клиенту.
    async fn create_link(
        &self,
        config: &ResolvedConfig,
        amount: i64,
        message: &str,
    ) -> Result<PaymentLink, GatewayError>;

    async fn status(&self, external_id: &str) -> Result<PaymentStatus, GatewayError>;

    /// Сумма, доступная к возврату. `None` - шлюз не поддерживает такой запрос.
    async fn available_refund_amount(
        &self,
        config: &ResolvedConfig,
        external_id: &str,
    ) -> Result<Option<i64>, GatewayError>;

    async fn refund(
        &self,
        config: &ResolvedConfig,
        external_id: &str,
        amount: i64,
    ) -> Result<RefundResult, GatewayError>;
}
