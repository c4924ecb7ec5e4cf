use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub gateway: GatewayConfig,
    pub routing: RoutingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub log_json: bool,
    pub cors_allowed_origins: Vec<String>,
}

// Настройки базы данных. Без DATABASE_URL сервис работает на in-memory хранилищах.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
}

// Настройки Redis (кеш резолвера). Без REDIS_URL используется кеш в памяти процесса.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

// Настройки доступа к прокси Kaspi Pay
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub ca_cert_path: Option<String>,
    /// Прокси с фиксированным исходящим IP, который внесён в whitelist шлюза.
    pub egress_proxy_url: Option<String>,
    pub connect_timeout_seconds: u64,
    pub timeout_seconds: u64,
    /// Шлюз сам атомарно отклоняет возвраты сверх остатка.
    pub enforces_refund_limit: bool,
}

impl GatewayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// Настройки маршрутизации платежей по магазинам
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    pub fallback_organization_bin: Option<String>,
    pub fallback_device_token: Option<String>,
    /// Магазин по умолчанию, если shop_id не удалось определить из контекста.
    pub default_shop_id: Option<i64>,
    pub cache_ttl_seconds: u64,
    pub audit_log_timeout_ms: u64,
}

impl RoutingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn audit_log_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_log_timeout_ms)
    }

    /// Реквизиты fallback проверяются при старте, а не при первом платеже.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(bin) = &self.fallback_organization_bin {
            if !crate::models::is_valid_bin(bin) {
                bail!("FALLBACK_ORGANIZATION_BIN must be 12 digits");
            }
        }
        if let Some(token) = &self.fallback_device_token {
            if !crate::models::is_valid_device_token(token) {
                bail!("FALLBACK_DEVICE_TOKEN must be a UUID");
            }
        }
        Ok(())
    }
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_organization_bin: None,
            fallback_device_token: None,
            default_shop_id: None,
            cache_ttl_seconds: 3600,
            audit_log_timeout_ms: 2000,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60,
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let default_shop_id = match optional("DEFAULT_SHOP_ID") {
            Some(raw) => {
                let id: i64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("DEFAULT_SHOP_ID has an invalid value: {:?}", raw))?;
                if id <= 0 {
                    bail!("DEFAULT_SHOP_ID must be positive");
                }
                Some(id)
            }
            None => None,
        };

        let config = Config {
            app: AppConfig {
                host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed("PORT", 8000)?,
                rust_log: optional("RUST_LOG")
                    .unwrap_or_else(|| "payment_router=debug,tower_http=debug".to_string()),
                log_json: optional("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
                cors_allowed_origins: optional("CORS_ALLOWED_ORIGINS")
                    .map(|v| {
                        v.split(',')
                            .map(|o| o.trim().to_string())
                            .filter(|o| !o.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            database: DatabaseConfig {
                url: optional("DATABASE_URL"),
                pool_size: parsed("DB_POOL_SIZE", 20)?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
            },
            gateway: GatewayConfig {
                base_url: optional("KASPI_GATEWAY_URL")
                    .unwrap_or_else(|| "https://kaspi-proxy.internal:8443".to_string()),
                client_cert_path: optional("KASPI_CLIENT_CERT_PATH"),
                client_key_path: optional("KASPI_CLIENT_KEY_PATH"),
                ca_cert_path: optional("KASPI_CA_CERT_PATH"),
                egress_proxy_url: optional("KASPI_EGRESS_PROXY_URL"),
                connect_timeout_seconds: parsed("GATEWAY_CONNECT_TIMEOUT_SECONDS", 5)?,
                timeout_seconds: parsed("GATEWAY_TIMEOUT_SECONDS", 10)?,
                enforces_refund_limit: parsed("GATEWAY_ENFORCES_REFUND_LIMIT", false)?,
            },
            routing: RoutingConfig {
                fallback_organization_bin: optional("FALLBACK_ORGANIZATION_BIN"),
                fallback_device_token: optional("FALLBACK_DEVICE_TOKEN"),
                default_shop_id,
                cache_ttl_seconds: parsed("CONFIG_CACHE_TTL_SECONDS", 3600)?,
                audit_log_timeout_ms: parsed("AUDIT_LOG_TIMEOUT_MS", 2000)?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", 60)?,
            },
        };

        if config.gateway.client_cert_path.is_some() != config.gateway.client_key_path.is_some() {
            bail!("KASPI_CLIENT_CERT_PATH and KASPI_CLIENT_KEY_PATH must be set together");
        }
        config.routing.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_uses_default_and_rejects_garbage() {
        env::remove_var("PAYMENT_ROUTER_TEST_PARSED");
        assert_eq!(parsed("PAYMENT_ROUTER_TEST_PARSED", 42u16).unwrap(), 42);

        env::set_var("PAYMENT_ROUTER_TEST_PARSED", " 8080 ");
        assert_eq!(parsed("PAYMENT_ROUTER_TEST_PARSED", 42u16).unwrap(), 8080);

        env::set_var("PAYMENT_ROUTER_TEST_PARSED", "eighty");
        assert!(parsed("PAYMENT_ROUTER_TEST_PARSED", 42u16).is_err());

        // Пустое значение считается отсутствующим
        env::set_var("PAYMENT_ROUTER_TEST_PARSED", "  ");
        assert_eq!(optional("PAYMENT_ROUTER_TEST_PARSED"), None);
        env::remove_var("PAYMENT_ROUTER_TEST_PARSED");
    }

    #[test]
    fn routing_defaults() {
        let routing = RoutingConfig::default();
        assert_eq!(routing.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(routing.audit_log_timeout(), Duration::from_millis(2000));
        assert!(routing.fallback_organization_bin.is_none());
    }

    #[test]
    fn fallback_credentials_are_validated() {
        let mut routing = RoutingConfig {
            fallback_organization_bin: Some("000000000001".to_string()),
            fallback_device_token: Some("2b1e7c1a-5d2f-4f0e-9d0c-6f1b2a3c4d5e".to_string()),
            ..RoutingConfig::default()
        };
        assert!(routing.validate().is_ok());

        routing.fallback_device_token = Some("not-a-token".to_string());
        let err = routing.validate().unwrap_err();
        assert!(err.to_string().contains("FALLBACK_DEVICE_TOKEN"));

        routing.fallback_device_token = None;
        routing.fallback_organization_bin = Some("12345".to_string());
        let err = routing.validate().unwrap_err();
        assert!(err.to_string().contains("FALLBACK_ORGANIZATION_BIN"));
    }
}
