#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payment_router::cache::MemoryConfigCache;
use payment_router::gateway::{CreatedPayment, GatewayError, PaymentGateway, PaymentLink, RefundResult};
use payment_router::models::{NewPaymentConfig, PaymentStatus, Provider, ResolvedConfig};
use payment_router::services::{FallbackConfig, PaymentOrchestrator, RoutingResolver};
use payment_router::store::{ConfigStore, MemoryAuditLog, MemoryConfigStore};
use payment_router::AppState;

pub const SHOP_ID: i64 = 121038;
pub const SHOP_BIN: &str = "920317450731";
pub const FALLBACK_BIN: &str = "000000000001";
pub const PHONE: &str = "77015211545";

/// Шлюз в памяти: выдаёт последовательные external_id, отвечает заданным статусом.
pub struct FakeGateway {
    pub status: Mutex<PaymentStatus>,
    pub available: Mutex<Option<i64>>,
    pub create_errors: Mutex<VecDeque<GatewayError>>,
    pub status_errors: Mutex<VecDeque<GatewayError>>,
    pub refund_delay: Mutex<Duration>,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub last_create_bin: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(PaymentStatus::Processed),
            available: Mutex::new(None),
            create_errors: Mutex::new(VecDeque::new()),
            status_errors: Mutex::new(VecDeque::new()),
            refund_delay: Mutex::new(Duration::from_millis(5)),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            last_create_bin: Mutex::new(None),
        }
    }

    pub fn fail_next_create(&self, err: GatewayError) {
        self.create_errors.lock().unwrap().push_back(err);
    }

    pub fn fail_next_status(&self, err: GatewayError) {
        self.status_errors.lock().unwrap().push_back(err);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> Provider {
        Provider::Kaspi
    }

    async fn create(
        &self,
        config: &ResolvedConfig,
        _amount: i64,
        _phone: &str,
        _message: &str,
    ) -> Result<CreatedPayment, GatewayError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.create_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        *self.last_create_bin.lock().unwrap() = Some(config.organization_bin.clone());
        Ok(CreatedPayment {
            external_id: format!("ext-{}", n),
            status: PaymentStatus::Wait,
        })
    }

    async fn create_link(
        &self,
        _config: &ResolvedConfig,
        _amount: i64,
        _message: &str,
    ) -> Result<PaymentLink, GatewayError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentLink {
            payment_link: format!("https://pay.kaspi.kz/pay/link-{}", n),
            payment_id: format!("link-{}", n),
            expire_date: None,
        })
    }

    async fn status(&self, _external_id: &str) -> Result<PaymentStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.status_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(*self.status.lock().unwrap())
    }

    async fn available_refund_amount(
        &self,
        _config: &ResolvedConfig,
        _external_id: &str,
    ) -> Result<Option<i64>, GatewayError> {
        Ok(*self.available.lock().unwrap())
    }

    async fn refund(
        &self,
        _config: &ResolvedConfig,
        _external_id: &str,
        amount: i64,
    ) -> Result<RefundResult, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refund_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(RefundResult { refunded_amount: amount })
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryConfigStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub gateway: Arc<FakeGateway>,
}

pub async fn harness() -> Harness {
    let store = Arc::new(MemoryConfigStore::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let gateway = Arc::new(FakeGateway::new());

    store
        .upsert_config(NewPaymentConfig {
            shop_id: SHOP_ID,
            organization_bin: SHOP_BIN.to_string(),
            device_token: None,
            is_active: true,
            provider: Provider::Kaspi,
        })
        .await
        .unwrap();

    let resolver = Arc::new(RoutingResolver::new(
        store.clone(),
        Arc::new(MemoryConfigCache::new(Duration::from_secs(3600))),
        Some(FallbackConfig {
            organization_bin: FALLBACK_BIN.to_string(),
            device_token: None,
        }),
        None,
    ));
    let orchestrator = PaymentOrchestrator::new(resolver, audit.clone(), Duration::from_millis(500))
        .with_gateway(gateway.clone());

    let state = Arc::new(AppState::from_parts(
        Arc::new(orchestrator),
        store.clone(),
        audit.clone(),
    ));

    Harness {
        state,
        store,
        audit,
        gateway,
    }
}
