use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AuditLog, ConfigStore};
use crate::error::StoreError;
use crate::models::{NewLogEntry, NewPaymentConfig, PaymentConfig, PaymentLogEntry, Provider};

// Строки из БД до преобразования в доменные типы
#[derive(sqlx::FromRow)]
struct ConfigRow {
    shop_id: i64,
    organization_bin: String,
    device_token: Option<String>,
    is_active: bool,
    provider: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConfigRow> for PaymentConfig {
    type Error = StoreError;

    fn try_from(row: ConfigRow) -> Result<Self, Self::Error> {
        let provider = row
            .provider
            .parse::<Provider>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(PaymentConfig {
            shop_id: row.shop_id,
            organization_bin: row.organization_bin,
            device_token: row.device_token,
            is_active: row.is_active,
            provider,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    shop_id: Option<i64>,
    organization_bin: Option<String>,
    operation_type: String,
    external_id: Option<String>,
    amount: Option<i64>,
    status: String,
    error_message: Option<String>,
    provider: String,
    is_fallback: bool,
    reported_by_client: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for PaymentLogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(PaymentLogEntry {
            id: row.id,
            shop_id: row.shop_id,
            organization_bin: row.organization_bin,
            operation_type: row.operation_type.parse().map_err(StoreError::Corrupt)?,
            external_id: row.external_id,
            amount: row.amount,
            status: row.status,
            error_message: row.error_message,
            provider: row
                .provider
                .parse()
                .map_err(|e: crate::error::PaymentError| StoreError::Corrupt(e.to_string()))?,
            is_fallback: row.is_fallback,
            reported_by_client: row.reported_by_client,
            created_at: row.created_at,
        })
    }
}

const CONFIG_COLUMNS: &str =
    "shop_id, organization_bin, device_token, is_active, provider, created_at, updated_at";

const LOG_COLUMNS: &str = "id, shop_id, organization_bin, operation_type, external_id, amount, \
     status, error_message, provider, is_fallback, reported_by_client, created_at";

#[derive(Clone)]
pub struct PgConfigStore {
    pool: PgPool,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn get_config(&self, shop_id: i64, provider: Provider) -> Result<PaymentConfig, StoreError> {
        let row: Option<ConfigRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_config WHERE shop_id = $1 AND provider = $2",
            CONFIG_COLUMNS
        ))
        .bind(shop_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound)?.try_into()
    }

    async fn upsert_config(&self, config: NewPaymentConfig) -> Result<PaymentConfig, StoreError> {
        let row: ConfigRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO payment_config (shop_id, organization_bin, device_token, is_active, provider)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (shop_id, provider) DO UPDATE
               SET organization_bin = EXCLUDED.organization_bin,
                   device_token = EXCLUDED.device_token,
                   is_active = EXCLUDED.is_active,
                   updated_at = NOW()
            RETURNING {}
            "#,
            CONFIG_COLUMNS
        ))
        .bind(config.shop_id)
        .bind(&config.organization_bin)
        .bind(&config.device_token)
        .bind(config.is_active)
        .bind(config.provider.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list_configs(&self) -> Result<Vec<PaymentConfig>, StoreError> {
        let rows: Vec<ConfigRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_config ORDER BY shop_id, provider",
            CONFIG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PaymentConfig::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: NewLogEntry) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO payment_log
                (shop_id, organization_bin, operation_type, external_id, amount,
                 status, error_message, provider, is_fallback, reported_by_client)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(entry.shop_id)
        .bind(&entry.organization_bin)
        .bind(entry.operation_type.as_str())
        .bind(&entry.external_id)
        .bind(entry.amount)
        .bind(&entry.status)
        .bind(&entry.error_message)
        .bind(entry.provider.as_str())
        .bind(entry.is_fallback)
        .bind(entry.reported_by_client)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn query(&self, shop_id: Option<i64>, limit: i64) -> Result<Vec<PaymentLogEntry>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM payment_log
            WHERE ($1::BIGINT IS NULL OR shop_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            LOG_COLUMNS
        ))
        .bind(shop_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PaymentLogEntry::try_from).collect()
    }

    async fn history(&self, external_id: &str) -> Result<Vec<PaymentLogEntry>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_log WHERE external_id = $1 ORDER BY created_at, id",
            LOG_COLUMNS
        ))
        .bind(external_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PaymentLogEntry::try_from).collect()
    }
}
