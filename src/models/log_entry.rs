use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use super::{PaymentStatus, Provider, ResolvedConfig};

/// Статус записи аудита, когда сумма возврата отклонена локально (до вызова шлюза).
pub const STATUS_REJECTED: &str = "Rejected";
/// Статус успешного возврата.
pub const STATUS_REFUNDED: &str = "Refunded";
/// Ответ шлюза на запрос доступного к возврату остатка; `amount` - остаток или
/// пусто, если шлюз запрос остатка не поддерживает.
pub const STATUS_AVAILABLE_CHECKED: &str = "AvailableAmount";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    CreateLink,
    Status,
    Refund,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::CreateLink => "create_link",
            OperationType::Status => "status",
            OperationType::Refund => "refund",
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, OperationType::Create | OperationType::CreateLink)
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "create_link" => Ok(OperationType::CreateLink),
            "status" => Ok(OperationType::Status),
            "refund" => Ok(OperationType::Refund),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

/// Запись журнала операций. Неизменяема после записи.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLogEntry {
    pub id: i64,
    pub shop_id: Option<i64>,
    pub organization_bin: Option<String>,
    pub operation_type: OperationType,
    pub external_id: Option<String>,
    pub amount: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub provider: Provider,
    pub is_fallback: bool,
    /// Запись прислал клиент через `/logs`, а не сам роутер после вызова шлюза.
    #[serde(default)]
    pub reported_by_client: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentLogEntry {
    /// Успешно созданный платёж (в журнале есть его идентификатор от шлюза).
    pub fn is_successful_create(&self) -> bool {
        self.operation_type.is_create()
            && self.error_message.is_none()
            && self.external_id.is_some()
            && self.status != PaymentStatus::Error.as_str()
    }

    pub fn is_successful_refund(&self) -> bool {
        self.operation_type == OperationType::Refund
            && self.error_message.is_none()
            && self.status == STATUS_REFUNDED
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewLogEntry {
    #[validate(range(min = 1))]
    pub shop_id: Option<i64>,
    #[validate(length(equal = 12))]
    pub organization_bin: Option<String>,
    pub operation_type: OperationType,
    #[validate(length(min = 1, max = 128))]
    pub external_id: Option<String>,
    pub amount: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub status: String,
    #[validate(length(max = 2000))]
    pub error_message: Option<String>,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub is_fallback: bool,
    /// Выставляет только сервер при приёме отчёта клиента, из тела запроса не читается.
    #[serde(default, skip_deserializing)]
    pub reported_by_client: bool,
}

impl NewLogEntry {
    pub fn for_config(config: &ResolvedConfig, operation_type: OperationType) -> Self {
        Self {
            shop_id: Some(config.shop_id),
            organization_bin: Some(config.organization_bin.clone()),
            operation_type,
            external_id: None,
            amount: None,
            status: PaymentStatus::Unknown.as_str().to_string(),
            error_message: None,
            provider: config.provider,
            is_fallback: config.is_fallback,
            reported_by_client: false,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error_message = Some(error.to_string());
        self
    }

    pub fn into_entry(self, id: i64, created_at: DateTime<Utc>) -> PaymentLogEntry {
        PaymentLogEntry {
            id,
            shop_id: self.shop_id,
            organization_bin: self.organization_bin,
            operation_type: self.operation_type,
            external_id: self.external_id,
            amount: self.amount,
            status: self.status,
            error_message: self.error_message,
            provider: self.provider,
            is_fallback: self.is_fallback,
            reported_by_client: self.reported_by_client,
            created_at,
        }
    }
}
