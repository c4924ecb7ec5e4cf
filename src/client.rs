//! client.rs
//!
//! Клиент витрины для сервиса маршрутизации платежей.
//!
//! Маршрут магазина запрашивается у сервиса и кешируется локально на TTL. Если сервис
//! недоступен или ответил мусором, клиент работает на fallback-маршруте, помечает
//! его `is_fallback = true` и не кеширует. Собственные записи журнала клиент
//! отправляет фоном через `report`, не блокируя вызывающего.

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cache::TtlCache;
use crate::context::{ShopContext, ShopIdSource, SHOP_ID_HEADER};
use crate::models::{NewLogEntry, PaymentStatus, Provider, ResolvedConfig};
use crate::services::{FallbackConfig, PaymentCreated, PaymentLinkCreated, RefundCompleted};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("payment router unreachable: {0}")]
    Network(String),

    /// Типизированная ошибка сервиса: `code` - стабильный код из ответа.
    #[error("payment router returned {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    #[error("malformed response from payment router: {0}")]
    Decode(String),

    #[error("shop_id could not be determined")]
    MissingShopId,

    #[error("shop {0} has no payment route and no fallback is configured")]
    ShopNotConfigured(i64),

    #[error("client misconfigured: {0}")]
    Config(String),
}

impl ClientError {
    /// Код ошибки сервиса, если ответ был типизированным.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            ClientError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ConfigBody {
    config: ResolvedConfig,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: PaymentStatus,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    shop_id: i64,
    amount: i64,
    phone: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateLinkBody<'a> {
    shop_id: i64,
    amount: i64,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    shop_id: i64,
    external_id: &'a str,
    amount: i64,
}

pub struct PaymentRouterClient {
    base_url: Url,
    http_client: reqwest::Client,
    provider: Provider,
    cache: TtlCache<i64, ResolvedConfig>,
    fallback: Option<FallbackConfig>,
    default_shop_id: Option<i64>,
}

impl PaymentRouterClient {
    pub fn new(
        base_url: &str,
        provider: Provider,
        cache_ttl: Duration,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;
        Self::with_http_client(base_url, provider, cache_ttl, http_client)
    }

    pub fn with_http_client(
        base_url: &str,
        provider: Provider,
        cache_ttl: Duration,
        http_client: reqwest::Client,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("router URL {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Config(format!("router URL {:?} cannot be a base", base_url.as_str())));
        }
        Ok(Self {
            base_url,
            http_client,
            provider,
            cache: TtlCache::new(cache_ttl),
            fallback: None,
            default_shop_id: None,
        })
    }

    pub fn with_fallback(mut self, fallback: FallbackConfig) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_default_shop_id(mut self, shop_id: i64) -> Self {
        self.default_shop_id = Some(shop_id).filter(|id| *id > 0);
        self
    }

    /// URL ручки роутера; каждый сегмент кодируется отдельно, так что `?`, `#`
    /// и `/` в external_id не меняют путь.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config("router URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["payments", self.provider.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn shop_id(&self, ctx: &ShopContext) -> Result<(i64, ShopIdSource), ClientError> {
        ctx.resolve_shop_id(self.default_shop_id)
            .ok_or(ClientError::MissingShopId)
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()));
        }

        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => Err(ClientError::Server {
                status: status.as_u16(),
                code: err.code,
                message: err.message,
            }),
            Err(_) => Err(ClientError::Server {
                status: status.as_u16(),
                code: status
                    .canonical_reason()
                    .unwrap_or("UnexpectedStatus")
                    .to_string(),
                message: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }

    async fn fetch_config(&self, shop_id: i64) -> Result<ResolvedConfig, ClientError> {
        let url = self.url(&["config", shop_id.to_string().as_str()])?;
        let response = self.http_client.get(url).send().await?;
        let body: ConfigBody = Self::parse(response).await?;
        Ok(body.config)
    }

    /// Маршрут магазина по контексту. Ответ сервиса кешируется, fallback - нет.
    pub async fn resolve_config(&self, ctx: &ShopContext) -> Result<ResolvedConfig, ClientError> {
        let (shop_id, source) = self.shop_id(ctx)?;

        if let Some(mut cached) = self.cache.get(&shop_id).await {
            debug!("Payment route for shop {} served from local cache", shop_id);
            cached.source = source;
            return Ok(cached);
        }

        match self.fetch_config(shop_id).await {
            Ok(mut config) => {
                config.source = source;
                // Сервис сам мог вернуть fallback - такой ответ не кешируем
                if !config.is_fallback {
                    self.cache.insert(shop_id, config.clone()).await;
                }
                Ok(config)
            }
            Err(e) => {
                let Some(fallback) = &self.fallback else {
                    error!("Payment route for shop {} unavailable and no fallback: {}", shop_id, e);
                    return Err(ClientError::ShopNotConfigured(shop_id));
                };
                warn!(
                    "Payment router degraded for shop {}: {} - using fallback bin={}",
                    shop_id, e, fallback.organization_bin
                );
                Ok(fallback.resolved_for(shop_id, source, self.provider))
            }
        }
    }

    pub async fn create_payment(
        &self,
        ctx: &ShopContext,
        amount: i64,
        phone: &str,
        message: &str,
    ) -> Result<PaymentCreated, ClientError> {
        let (shop_id, _) = self.shop_id(ctx)?;
        let response = self
            .http_client
            .post(self.url(&["create"])?)
            .header(SHOP_ID_HEADER, shop_id.to_string())
            .json(&CreateBody { shop_id, amount, phone, message })
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn create_payment_link(
        &self,
        ctx: &ShopContext,
        amount: i64,
        message: &str,
    ) -> Result<PaymentLinkCreated, ClientError> {
        let (shop_id, _) = self.shop_id(ctx)?;
        let response = self
            .http_client
            .post(self.url(&["create-link"])?)
            .header(SHOP_ID_HEADER, shop_id.to_string())
            .json(&CreateLinkBody { shop_id, amount, message })
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn check_status(&self, external_id: &str) -> Result<PaymentStatus, ClientError> {
        let response = self
            .http_client
            .get(self.url(&["status", external_id])?)
            .send()
            .await?;
        let body: StatusBody = Self::parse(response).await?;
        Ok(body.status)
    }

    pub async fn refund(
        &self,
        ctx: &ShopContext,
        external_id: &str,
        amount: i64,
    ) -> Result<RefundCompleted, ClientError> {
        let (shop_id, _) = self.shop_id(ctx)?;
        let response = self
            .http_client
            .post(self.url(&["refund"])?)
            .header(SHOP_ID_HEADER, shop_id.to_string())
            .json(&RefundBody { shop_id, external_id, amount })
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Фоновая отправка записи журнала. Ошибки только логируются.
    pub fn report(&self, mut entry: NewLogEntry, degraded: bool) -> JoinHandle<()> {
        entry.provider = self.provider;
        entry.is_fallback |= degraded;

        let http_client = self.http_client.clone();
        let url = self.url(&["logs"]);

        tokio::spawn(async move {
            let url = match url {
                Ok(url) => url,
                Err(e) => {
                    error!("Failed to report payment log entry: {}", e);
                    return;
                }
            };
            match http_client.post(url).json(&entry).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Payment log entry reported");
                }
                Ok(response) => {
                    error!("Payment router rejected log entry: {}", response.status());
                }
                Err(e) => {
                    error!("Failed to report payment log entry: {}", e);
                }
            }
        })
    }
}
