//! Хранилища: маршруты магазинов (config store) и журнал операций (audit log).
//!
//! Обе абстракции - трейты, чтобы оркестратор и резолвер не зависели от Postgres.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{NewLogEntry, NewPaymentConfig, PaymentConfig, PaymentLogEntry, Provider};

pub use memory::{MemoryAuditLog, MemoryConfigStore};
pub use postgres::{PgAuditLog, PgConfigStore};

pub const DEFAULT_LOG_LIMIT: i64 = 50;
pub const MAX_LOG_LIMIT: i64 = 500;

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT)
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Возвращает `StoreError::NotFound`, если строки нет. Решение о fallback принимает вызывающий.
    async fn get_config(&self, shop_id: i64, provider: Provider) -> Result<PaymentConfig, StoreError>;

    /// Создаёт или обновляет маршрут магазина по ключу (shop_id, provider).
    async fn upsert_config(&self, config: NewPaymentConfig) -> Result<PaymentConfig, StoreError>;

    async fn list_configs(&self) -> Result<Vec<PaymentConfig>, StoreError>;
}

/// Журнал только на добавление.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: NewLogEntry) -> Result<i64, StoreError>;

    /// Записи от новых к старым.
    async fn query(&self, shop_id: Option<i64>, limit: i64) -> Result<Vec<PaymentLogEntry>, StoreError>;

    /// Все записи по платежу, от старых к новым.
    async fn history(&self, external_id: &str) -> Result<Vec<PaymentLogEntry>, StoreError>;
}
