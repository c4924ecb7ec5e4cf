//! Оркестратор платежей: создание, ссылка на оплату, статус и возврат.
//!
//! Каждая операция: резолвер → адаптер шлюза → запись в журнал. Каждая попытка
//! вызова шлюза журналируется ровно один раз, в том числе неудачная. Сбой журнала
//! никогда не прерывает платёж.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::resolver::RoutingResolver;
use crate::context::ShopContext;
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{GatewayError, PaymentGateway};
use crate::models::log_entry::{STATUS_AVAILABLE_CHECKED, STATUS_REFUNDED, STATUS_REJECTED};
use crate::models::{NewLogEntry, OperationType, PaymentLogEntry, PaymentStatus, Provider, ResolvedConfig};
use crate::store::AuditLog;

/// Не более одного повтора на уровне оркестратора.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub shop_id: i64,
    pub external_id: String,
    pub status: PaymentStatus,
    pub organization_bin: String,
    pub is_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLinkCreated {
    pub shop_id: i64,
    pub payment_link: String,
    pub payment_id: String,
    pub expire_date: Option<String>,
    pub organization_bin: String,
    pub is_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundCompleted {
    pub external_id: String,
    pub refunded_amount: i64,
    pub organization_bin: String,
}

/// Номер телефона клиента в формате Kaspi: 11 цифр, начиная с 7.
pub fn normalize_phone(raw: &str) -> PaymentResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let normalized = match digits.len() {
        10 => format!("7{}", digits),
        11 if digits.starts_with('8') => format!("7{}", &digits[1..]),
        11 => digits,
        _ => String::new(),
    };
    if normalized.len() == 11 && normalized.starts_with('7') {
        Ok(normalized)
    } else {
        Err(PaymentError::Validation(format!("invalid phone number: {:?}", raw)))
    }
}

fn validate_amount(amount: i64) -> PaymentResult<()> {
    if amount > 0 {
        Ok(())
    } else {
        Err(PaymentError::Validation("amount must be positive".to_string()))
    }
}

fn validate_external_id(external_id: &str) -> PaymentResult<()> {
    if external_id.trim().is_empty() || external_id.len() > 128 {
        Err(PaymentError::Validation("external_id is required".to_string()))
    } else {
        Ok(())
    }
}

/// Ошибка шлюза для операций, у которых повтор безопасен (статус, возврат).
fn map_gateway_error(err: GatewayError) -> PaymentError {
    match err {
        GatewayError::Rejected { code, message } => {
            PaymentError::GatewayRejected(format!("{}: {}", code, message))
        }
        GatewayError::InsufficientAvailableAmount { .. } => {
            PaymentError::GatewayRejected("insufficient available amount".to_string())
        }
        other => PaymentError::GatewayUnavailable(other.to_string()),
    }
}

/// Ошибка создания платежа: таймаут или нечитаемый ответ означают неизвестный исход.
fn map_create_error(err: GatewayError) -> PaymentError {
    match err {
        GatewayError::Timeout(msg) | GatewayError::Transport(msg) => {
            PaymentError::AmbiguousCreateOutcome(msg)
        }
        other => map_gateway_error(other),
    }
}

fn create_failure_status(err: &GatewayError) -> PaymentStatus {
    match err {
        GatewayError::Timeout(_) | GatewayError::Transport(_) => PaymentStatus::Unknown,
        _ => PaymentStatus::Error,
    }
}

pub struct PaymentOrchestrator {
    resolver: Arc<RoutingResolver>,
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
    audit_log: Arc<dyn AuditLog>,
    audit_timeout: Duration,
    serialize_refunds: bool,
    refund_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PaymentOrchestrator {
    pub fn new(
        resolver: Arc<RoutingResolver>,
        audit_log: Arc<dyn AuditLog>,
        audit_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            gateways: HashMap::new(),
            audit_log,
            audit_timeout,
            serialize_refunds: true,
            refund_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    /// Если шлюз сам атомарно отклоняет возвраты сверх остатка, локальная
    /// сериализация возвратов по external_id не нужна.
    pub fn with_refund_serialization(mut self, enabled: bool) -> Self {
        self.serialize_refunds = enabled;
        self
    }

    pub fn resolver(&self) -> &RoutingResolver {
        &self.resolver
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditLog> {
        &self.audit_log
    }

    fn gateway(&self, provider: Provider) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedProvider(provider.to_string()))
    }

    // === Журнал ===

    /// Запись в журнал с ограничением по времени. Ошибки только в диагностический лог.
    async fn record(&self, entry: NewLogEntry) {
        let operation = entry.operation_type;
        match tokio::time::timeout(self.audit_timeout, self.audit_log.append(entry)).await {
            Ok(Ok(id)) => debug!("Audit log entry {} written ({})", id, operation.as_str()),
            Ok(Err(e)) => error!("Audit log append failed for {}: {}", operation.as_str(), e),
            Err(_) => error!(
                "Audit log append timed out after {:?} for {}",
                self.audit_timeout,
                operation.as_str()
            ),
        }
    }

    /// История платежа из журнала: только записи самого роутера, отчёты клиентов
    /// в решениях о возврате не участвуют. При недоступности журнала - пустая история.
    async fn history(&self, external_id: &str) -> Vec<PaymentLogEntry> {
        match tokio::time::timeout(self.audit_timeout, self.audit_log.history(external_id)).await {
            Ok(Ok(entries)) => entries.into_iter().filter(|e| !e.reported_by_client).collect(),
            Ok(Err(e)) => {
                error!("Audit log history unavailable for {}: {}", external_id, e);
                Vec::new()
            }
            Err(_) => {
                error!("Audit log history timed out for {}", external_id);
                Vec::new()
            }
        }
    }

    /// До двух попыток вызова шлюза, каждая попытка журналируется.
    async fn attempt<T, F, Fut, L, R>(&self, mut call: F, mut log: L, retry_if: R) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
        L: FnMut(&Result<T, GatewayError>) -> NewLogEntry,
        R: Fn(&GatewayError) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = call().await;
            self.record(log(&result)).await;
            match &result {
                Err(e) if attempt < MAX_ATTEMPTS && retry_if(e) => {
                    warn!("Gateway call failed ({}), retrying once", e);
                }
                _ => return result,
            }
        }
    }

    // === Операции ===

    pub async fn create_payment(
        &self,
        provider: Provider,
        ctx: &ShopContext,
        amount: i64,
        phone: &str,
        message: &str,
    ) -> PaymentResult<PaymentCreated> {
        validate_amount(amount)?;
        let phone = normalize_phone(phone)?;
        let gateway = self.gateway(provider)?;
        let config = self.resolver.resolve(ctx, provider).await?;

        let result = self
            .attempt(
                || gateway.create(&config, amount, &phone, message),
                |result| {
                    let entry = NewLogEntry::for_config(&config, OperationType::Create).with_amount(amount);
                    match result {
                        Ok(created) => entry
                            .with_external_id(created.external_id.clone())
                            .with_status(created.status.as_str()),
                        Err(e) => entry.with_status(create_failure_status(e).as_str()).with_error(e),
                    }
                },
                // Повтор создания только если запрос точно не ушёл в шлюз
                |e| matches!(e, GatewayError::Connect(_)),
            )
            .await;

        match result {
            Ok(created) => {
                info!(
                    "Payment {} created for shop {} (bin={}, fallback={})",
                    created.external_id, config.shop_id, config.organization_bin, config.is_fallback
                );
                Ok(PaymentCreated {
                    shop_id: config.shop_id,
                    external_id: created.external_id,
                    status: created.status,
                    organization_bin: config.organization_bin,
                    is_fallback: config.is_fallback,
                })
            }
            Err(e) => {
                error!("Payment creation failed for shop {}: {}", config.shop_id, e);
                Err(map_create_error(e))
            }
        }
    }

    pub async fn create_payment_link(
        &self,
        provider: Provider,
        ctx: &ShopContext,
        amount: i64,
        message: &str,
    ) -> PaymentResult<PaymentLinkCreated> {
        validate_amount(amount)?;
        let gateway = self.gateway(provider)?;
        let config = self.resolver.resolve(ctx, provider).await?;

        let result = self
            .attempt(
                || gateway.create_link(&config, amount, message),
                |result| {
                    let entry =
                        NewLogEntry::for_config(&config, OperationType::CreateLink).with_amount(amount);
                    match result {
                        Ok(link) => entry
                            .with_external_id(link.payment_id.clone())
                            .with_status(PaymentStatus::QrTokenCreated.as_str()),
                        Err(e) => entry.with_status(create_failure_status(e).as_str()).with_error(e),
                    }
                },
                |e| matches!(e, GatewayError::Connect(_)),
            )
            .await;

        match result {
            Ok(link) => {
                info!(
                    "Payment link {} created for shop {} (bin={}, fallback={})",
                    link.payment_id, config.shop_id, config.organization_bin, config.is_fallback
                );
                Ok(PaymentLinkCreated {
                    shop_id: config.shop_id,
                    payment_link: link.payment_link,
                    payment_id: link.payment_id,
                    expire_date: link.expire_date,
                    organization_bin: config.organization_bin,
                    is_fallback: config.is_fallback,
                })
            }
            Err(e) => {
                error!("Payment link creation failed for shop {}: {}", config.shop_id, e);
                Err(map_create_error(e))
            }
        }
    }

    /// Статус платежа у шлюза. shop_id не нужен: external_id уникален в шлюзе.
    pub async fn check_status(&self, provider: Provider, external_id: &str) -> PaymentResult<PaymentStatus> {
        validate_external_id(external_id)?;
        let gateway = self.gateway(provider)?;
        let history = self.history(external_id).await;
        self.check_status_with_history(gateway.as_ref(), provider, external_id, &history)
            .await
    }

    async fn check_status_with_history(
        &self,
        gateway: &dyn PaymentGateway,
        provider: Provider,
        external_id: &str,
        history: &[PaymentLogEntry],
    ) -> PaymentResult<PaymentStatus> {
        let origin = history.iter().find(|e| e.is_successful_create());

        let result = self
            .attempt(
                || gateway.status(external_id),
                |result| {
                    let mut entry = NewLogEntry {
                        shop_id: origin.and_then(|o| o.shop_id),
                        organization_bin: origin.and_then(|o| o.organization_bin.clone()),
                        operation_type: OperationType::Status,
                        external_id: Some(external_id.to_string()),
                        amount: None,
                        status: PaymentStatus::Unknown.as_str().to_string(),
                        error_message: None,
                        provider,
                        is_fallback: origin.map(|o| o.is_fallback).unwrap_or(false),
                        reported_by_client: false,
                    };
                    match result {
                        Ok(status) => entry.status = status.as_str().to_string(),
                        Err(e) => {
                            entry.status = PaymentStatus::Error.as_str().to_string();
                            entry.error_message = Some(e.to_string());
                        }
                    }
                    entry
                },
                GatewayError::is_transient,
            )
            .await;

        let status = result.map_err(map_gateway_error)?;

        if let Some(last) = last_known_status(history) {
            if !last.can_transition_to(status) {
                warn!(
                    "Payment {} moved from {} to {} - unexpected transition",
                    external_id, last, status
                );
            }
        }

        Ok(status)
    }

    pub async fn refund(
        &self,
        provider: Provider,
        ctx: &ShopContext,
        external_id: &str,
        amount: i64,
    ) -> PaymentResult<RefundCompleted> {
        validate_amount(amount)?;
        validate_external_id(external_id)?;
        let gateway = self.gateway(provider)?;
        let config = self.resolver.resolve(ctx, provider).await?;

        let _slot = if self.serialize_refunds {
            Some(RefundSlot::acquire(&self.refund_locks, external_id).await)
        } else {
            None
        };

        self.refund_locked(gateway.as_ref(), provider, &config, external_id, amount)
            .await
    }

    /// Число external_id, по которым сейчас выполняется или ждёт возврат.
    pub fn pending_refunds(&self) -> usize {
        self.refund_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn refund_locked(
        &self,
        gateway: &dyn PaymentGateway,
        provider: Provider,
        config: &ResolvedConfig,
        external_id: &str,
        amount: i64,
    ) -> PaymentResult<RefundCompleted> {
        let refund_entry = || {
            NewLogEntry::for_config(config, OperationType::Refund)
                .with_external_id(external_id)
                .with_amount(amount)
        };

        let history = self.history(external_id).await;
        let origin = history.iter().find(|e| e.is_successful_create());

        // Возврат только на тот БИН, на который платёж был создан
        if let Some(original_bin) = origin.and_then(|o| o.organization_bin.as_deref()) {
            if original_bin != config.organization_bin {
                let err = PaymentError::RoutingMismatch {
                    external_id: external_id.to_string(),
                    original_bin: original_bin.to_string(),
                    resolved_bin: config.organization_bin.clone(),
                };
                self.record(refund_entry().with_status(STATUS_REJECTED).with_error(&err)).await;
                return Err(err);
            }
        }

        // Возврат возможен только для проведённого платежа
        if last_known_status(&history) != Some(PaymentStatus::Processed) {
            let status = self
                .check_status_with_history(gateway, provider, external_id, &history)
                .await?;
            if status != PaymentStatus::Processed {
                let err = PaymentError::NotRefundable {
                    external_id: external_id.to_string(),
                    status: status.to_string(),
                };
                self.record(refund_entry().with_status(STATUS_REJECTED).with_error(&err)).await;
                return Err(err);
            }
        }

        // Запрос остатка - отдельный вызов шлюза и отдельная запись журнала
        let available = match gateway.available_refund_amount(config, external_id).await {
            Ok(reported) => {
                let mut entry = NewLogEntry::for_config(config, OperationType::Refund)
                    .with_external_id(external_id)
                    .with_status(STATUS_AVAILABLE_CHECKED);
                entry.amount = reported;
                self.record(entry).await;
                reported
            }
            Err(e) => {
                self.record(refund_entry().with_status(PaymentStatus::Error.as_str()).with_error(&e))
                    .await;
                return Err(map_gateway_error(e));
            }
        };
        let available = match available {
            Some(available) => available,
            None => match origin.and_then(|o| o.amount) {
                Some(original) => original - refunded_total(&history),
                None => {
                    let err = PaymentError::PaymentNotFound(external_id.to_string());
                    self.record(refund_entry().with_status(STATUS_REJECTED).with_error(&err)).await;
                    return Err(err);
                }
            },
        };

        if amount > available {
            let err = PaymentError::InsufficientAvailableAmount {
                requested: amount,
                available: available.max(0),
            };
            warn!("Refund rejected for payment {}: {}", external_id, err);
            self.record(refund_entry().with_status(STATUS_REJECTED).with_error(&err)).await;
            return Err(err);
        }

        let result = self
            .attempt(
                || gateway.refund(config, external_id, amount),
                |result| match result {
                    Ok(refund) => NewLogEntry::for_config(config, OperationType::Refund)
                        .with_external_id(external_id)
                        .with_amount(refund.refunded_amount)
                        .with_status(STATUS_REFUNDED),
                    Err(e) => {
                        let status = match e {
                            GatewayError::Timeout(_) | GatewayError::Transport(_) => PaymentStatus::Unknown,
                            _ => PaymentStatus::Error,
                        };
                        refund_entry().with_status(status.as_str()).with_error(e)
                    }
                },
                GatewayError::is_transient,
            )
            .await;

        match result {
            Ok(refund) => {
                info!(
                    "Refunded {} for payment {} (shop {}, bin={})",
                    refund.refunded_amount, external_id, config.shop_id, config.organization_bin
                );
                Ok(RefundCompleted {
                    external_id: external_id.to_string(),
                    refunded_amount: refund.refunded_amount,
                    organization_bin: config.organization_bin.clone(),
                })
            }
            Err(GatewayError::InsufficientAvailableAmount { available: reported }) => {
                Err(PaymentError::InsufficientAvailableAmount {
                    requested: amount,
                    available: reported.unwrap_or(available).max(0),
                })
            }
            Err(e) => Err(map_gateway_error(e)),
        }
    }

}

/// Очередь возвратов по одному external_id. Запись карты удаляется в Drop,
/// в том числе когда future возврата отменён на ожидании или внутри вызова шлюза.
struct RefundSlot<'a> {
    locks: &'a StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    external_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> RefundSlot<'a> {
    async fn acquire(locks: &'a StdMutex<HashMap<String, Arc<Mutex<()>>>>, external_id: &str) -> RefundSlot<'a> {
        let lock = locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(external_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let mut slot = RefundSlot {
            locks,
            external_id: external_id.to_string(),
            lock,
            guard: None,
        };
        slot.guard = Some(slot.lock.clone().lock_owned().await);
        slot
    }
}

impl Drop for RefundSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Запись в карте + наша копия: больше никто не ждёт этот lock
        let ours = locks
            .get(&self.external_id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.lock));
        if ours && Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.external_id);
        }
    }
}

/// Последний статус платежа, известный по журналу (создание или проверка статуса).
fn last_known_status(history: &[PaymentLogEntry]) -> Option<PaymentStatus> {
    history
        .iter()
        .rev()
        .filter(|e| e.error_message.is_none())
        .filter(|e| e.operation_type.is_create() || e.operation_type == OperationType::Status)
        .map(|e| PaymentStatus::parse(&e.status))
        .find(|s| *s != PaymentStatus::Unknown)
}

fn refunded_total(history: &[PaymentLogEntry]) -> i64 {
    history
        .iter()
        .filter(|e| e.is_successful_refund())
        .filter_map(|e| e.amount)
        .sum()
}
