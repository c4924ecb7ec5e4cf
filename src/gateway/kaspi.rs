//! Клиент Kaspi Pay.
//!
//! Шлюз доступен только через прокси с фиксированным исходящим IP (whitelist Kaspi)
//! и требует клиентский сертификат (mutual TLS). Все вызовы ограничены таймаутами
//! и проходят через `CircuitBreaker`.

use async_trait::async_trait;
use reqwest::{Certificate, Identity, Proxy, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{CircuitBreaker, CreatedPayment, GatewayError, PaymentGateway, PaymentLink, RefundResult};
use crate::config::{CircuitBreakerConfig, GatewayConfig};
use crate::models::{PaymentStatus, Provider, ResolvedConfig};

/// Код ошибки шлюза при попытке вернуть больше доступного остатка.
const INSUFFICIENT_AMOUNT_CODE: &str = "InsufficientAvailableAmount";

// --- Модели данных для API шлюза ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device_token: Option<&'a str>,
    organization_bin: &'a str,
    amount: i64,
    phone: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateLinkRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device_token: Option<&'a str>,
    organization_bin: &'a str,
    amount: i64,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RefundRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device_token: Option<&'a str>,
    organization_bin: &'a str,
    external_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
}

/// Общая обёртка ответа: `{"status": true, "data": {...}}` или `{"status": false, "message": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    data: Option<T>,
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateData {
    external_id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkData {
    payment_link: String,
    payment_id: String,
    expire_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableRefundData {
    available_amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundData {
    refunded_amount: Option<i64>,
}

#[derive(Clone)]
pub struct KaspiGateway {
    base_url: Url,
    http_client: reqwest::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl KaspiGateway {
    /// Собирает клиент с mTLS-идентичностью, CA шлюза и egress-прокси из настроек.
    pub fn from_config(
        config: &GatewayConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout());

        if let (Some(cert_path), Some(key_path)) = (&config.client_cert_path, &config.client_key_path) {
            let mut pem = std::fs::read(cert_path)
                .map_err(|e| GatewayError::Config(format!("{}: {}", cert_path, e)))?;
            pem.push(b'\n');
            pem.extend(
                std::fs::read(key_path)
                    .map_err(|e| GatewayError::Config(format!("{}: {}", key_path, e)))?,
            );
            let identity = Identity::from_pem(&pem)
                .map_err(|e| GatewayError::Config(format!("client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        if let Some(ca_path) = &config.ca_cert_path {
            let pem = std::fs::read(ca_path)
                .map_err(|e| GatewayError::Config(format!("{}: {}", ca_path, e)))?;
            let ca = Certificate::from_pem(&pem)
                .map_err(|e| GatewayError::Config(format!("gateway CA: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }

        if let Some(proxy_url) = &config.egress_proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| GatewayError::Config(format!("egress proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let http_client = builder.build()?;
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            breaker.failure_threshold,
            Duration::from_secs(breaker.timeout_seconds),
        ));

        Self::new(&config.base_url, http_client, circuit_breaker)
    }

    pub fn new(
        base_url: &str,
        http_client: reqwest::Client,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::Config(format!("gateway URL {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!("gateway URL {} cannot be a base", base_url)));
        }
        Ok(Self {
            base_url,
            http_client,
            circuit_breaker,
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Config("gateway URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Выполняет запрос через Circuit Breaker и возвращает HTTP-статус и тело ответа.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, Vec<u8>), GatewayError> {
        // Разрешение живёт до конца вызова: отмена future освобождает пробный слот
        let Some(permit) = self.circuit_breaker.acquire() else {
            warn!("Circuit breaker is OPEN - blocking Kaspi gateway request");
            return Err(GatewayError::CircuitOpen);
        };

        let outcome = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, GatewayError>((status, body.to_vec()))
        }
        .await;

        match &outcome {
            Ok((status, _)) if status.is_server_error() => permit.failure(),
            Ok(_) => permit.success(),
            Err(e) => {
                error!("Kaspi gateway request failed: {}", e);
                permit.failure();
            }
        }

        outcome
    }

    fn parse<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, GatewayError> {
        let envelope: Envelope<T> = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(_) if status.is_client_error() => {
                return Err(GatewayError::Rejected {
                    code: status.as_u16().to_string(),
                    message: String::from_utf8_lossy(body).chars().take(500).collect(),
                });
            }
            Err(e) => {
                return Err(GatewayError::Transport(format!(
                    "unreadable gateway response (HTTP {}): {}",
                    status.as_u16(),
                    e
                )));
            }
        };

        if !envelope.status || !status.is_success() {
            let code = envelope
                .code
                .unwrap_or_else(|| status.as_u16().to_string());
            if code == INSUFFICIENT_AMOUNT_CODE {
                return Err(GatewayError::InsufficientAvailableAmount { available: None });
            }
            return Err(GatewayError::Rejected {
                code,
                message: envelope
                    .message
                    .unwrap_or_else(|| "gateway returned status=false".to_string()),
            });
        }

        envelope
            .data
            .ok_or_else(|| GatewayError::Transport("gateway response has no data".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for KaspiGateway {
    fn provider(&self) -> Provider {
        Provider::Kaspi
    }

    async fn create(
        &self,
        config: &ResolvedConfig,
        amount: i64,
        phone: &str,
        message: &str,
    ) -> Result<CreatedPayment, GatewayError> {
        let request = CreateRequest {
            device_token: config.device_token.as_deref(),
            organization_bin: &config.organization_bin,
            amount,
            phone,
            message,
        };
        info!(
            "Creating Kaspi payment: shop_id={}, bin={}, amount={}",
            config.shop_id, config.organization_bin, amount
        );

        let url = self.endpoint(&["payments", "create"])?;
        let (status, body) = self.execute(self.http_client.post(url).json(&request)).await?;
        let data: CreateData = Self::parse(status, &body)?;

        Ok(CreatedPayment {
            external_id: data.external_id,
            status: data
                .status
                .map(|s| PaymentStatus::parse(&s))
                .unwrap_or(PaymentStatus::Wait),
        })
    }

    async fn create_link(
        &self,
        config: &ResolvedConfig,
        amount: i64,
        message: &str,
    ) -> Result<PaymentLink, GatewayError> {
        let request = CreateLinkRequest {
            device_token: config.device_token.as_deref(),
            organization_bin: &config.organization_bin,
            amount,
            message,
        };
        info!(
            "Creating Kaspi payment link: shop_id={}, bin={}, amount={}",
            config.shop_id, config.organization_bin, amount
        );

        let url = self.endpoint(&["payments", "create-link"])?;
        let (status, body) = self.execute(self.http_client.post(url).json(&request)).await?;
        let data: CreateLinkData = Self::parse(status, &body)?;

        Ok(PaymentLink {
            payment_link: data.payment_link,
            payment_id: data.payment_id,
            expire_date: data.expire_date,
        })
    }

    async fn status(&self, external_id: &str) -> Result<PaymentStatus, GatewayError> {
        let url = self.endpoint(&["payments", "status", external_id])?;
        let (status, body) = self.execute(self.http_client.get(url)).await?;
        let data: StatusData = Self::parse(status, &body)?;
        Ok(PaymentStatus::parse(&data.status))
    }

    async fn available_refund_amount(
        &self,
        config: &ResolvedConfig,
        external_id: &str,
    ) -> Result<Option<i64>, GatewayError> {
        let request = RefundRequest {
            device_token: config.device_token.as_deref(),
            organization_bin: &config.organization_bin,
            external_id,
            amount: None,
        };

        let url = self.endpoint(&["payments", "available-refund"])?;
        let (status, body) = self.execute(self.http_client.post(url).json(&request)).await?;
        // Прокси без поддержки запроса остатка отвечает 404
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let data: AvailableRefundData = Self::parse(status, &body)?;
        Ok(Some(data.available_amount))
    }

    async fn refund(
        &self,
        config: &ResolvedConfig,
        external_id: &str,
        amount: i64,
    ) -> Result<RefundResult, GatewayError> {
        let request = RefundRequest {
            device_token: config.device_token.as_deref(),
            organization_bin: &config.organization_bin,
            external_id,
            amount: Some(amount),
        };
        info!(
            "Refunding Kaspi payment {}: shop_id={}, amount={}",
            external_id, config.shop_id, amount
        );

        let url = self.endpoint(&["payments", "refund"])?;
        let (status, body) = self.execute(self.http_client.post(url).json(&request)).await?;
        let data: RefundData = Self::parse(status, &body)?;

        Ok(RefundResult {
            refunded_amount: data.refunded_amount.unwrap_or(amount),
        })
    }
}
