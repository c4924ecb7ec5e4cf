use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::context::ShopIdSource;

/// Платёжный провайдер. Пока поддерживается только Kaspi Pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Kaspi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Kaspi => "kaspi",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = crate::error::PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kaspi" => Ok(Provider::Kaspi),
            _ => Err(crate::error::PaymentError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// Маршрут платежей магазина: куда (на какой БИН и какое устройство) зачислять деньги.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub shop_id: i64,
    pub organization_bin: String,
    pub device_token: Option<String>,
    pub is_active: bool,
    pub provider: Provider,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn validate_bin(bin: &str) -> Result<(), ValidationError> {
    if super::is_valid_bin(bin) {
        Ok(())
    } else {
        Err(ValidationError::new("organization_bin_must_be_12_digits"))
    }
}

fn validate_device_token(token: &str) -> Result<(), ValidationError> {
    if super::is_valid_device_token(token) {
        Ok(())
    } else {
        Err(ValidationError::new("device_token_must_be_uuid"))
    }
}

fn default_active() -> bool {
    true
}

/// Запись из админки: создание или обновление маршрута магазина.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPaymentConfig {
    #[validate(range(min = 1))]
    pub shop_id: i64,
    #[validate(custom(function = "validate_bin"))]
    pub organization_bin: String,
    #[validate(custom(function = "validate_device_token"))]
    pub device_token: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub provider: Provider,
}

/// Результат работы резолвера. Не сохраняется в БД, живёт только в кешах.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub shop_id: i64,
    pub organization_bin: String,
    pub device_token: Option<String>,
    pub is_active: bool,
    pub provider: Provider,
    pub is_fallback: bool,
    pub source: ShopIdSource,
}

impl ResolvedConfig {
    pub fn from_config(config: PaymentConfig, source: ShopIdSource) -> Self {
        Self {
            shop_id: config.shop_id,
            organization_bin: config.organization_bin,
            device_token: config.device_token,
            is_active: config.is_active,
            provider: config.provider,
            is_fallback: false,
            source,
        }
    }
}
