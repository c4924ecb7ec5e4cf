use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{AuditLog, ConfigStore};
use crate::error::StoreError;
use crate::models::{NewLogEntry, NewPaymentConfig, PaymentConfig, PaymentLogEntry, Provider};

/// Хранилище маршрутов в памяти процесса. Для локального запуска без БД и для тестов.
pub struct MemoryConfigStore {
    configs: RwLock<HashMap<(i64, Provider), PaymentConfig>>,
    available: AtomicBool,
    reads: AtomicU64,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
        }
    }

    /// Имитация недоступности хранилища.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Сколько раз выполнялся `get_config`.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("config store is offline".to_string()))
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_config(&self, shop_id: i64, provider: Provider) -> Result<PaymentConfig, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.configs
            .read()
            .await
            .get(&(shop_id, provider))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn upsert_config(&self, config: NewPaymentConfig) -> Result<PaymentConfig, StoreError> {
        self.check_available()?;
        let now = Utc::now();
        let mut configs = self.configs.write().await;
        let created_at = configs
            .get(&(config.shop_id, config.provider))
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        let stored = PaymentConfig {
            shop_id: config.shop_id,
            organization_bin: config.organization_bin,
            device_token: config.device_token,
            is_active: config.is_active,
            provider: config.provider,
            created_at,
            updated_at: now,
        };
        configs.insert((stored.shop_id, stored.provider), stored.clone());
        Ok(stored)
    }

    async fn list_configs(&self) -> Result<Vec<PaymentConfig>, StoreError> {
        self.check_available()?;
        let mut configs: Vec<PaymentConfig> = self.configs.read().await.values().cloned().collect();
        configs.sort_by_key(|c| (c.shop_id, c.provider.as_str()));
        Ok(configs)
    }
}

pub struct MemoryAuditLog {
    entries: RwLock<Vec<PaymentLogEntry>>,
    available: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Все записи в порядке добавления.
    pub async fn entries(&self) -> Vec<PaymentLogEntry> {
        self.entries.read().await.clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("audit log is offline".to_string()))
        }
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: NewLogEntry) -> Result<i64, StoreError> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        let id = entries.len() as i64 + 1;
        entries.push(entry.into_entry(id, Utc::now()));
        Ok(id)
    }

    async fn query(&self, shop_id: Option<i64>, limit: i64) -> Result<Vec<PaymentLogEntry>, StoreError> {
        self.check_available()?;
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| shop_id.is_none() || e.shop_id == shop_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn history(&self, external_id: &str) -> Result<Vec<PaymentLogEntry>, StoreError> {
        self.check_available()?;
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.external_id.as_deref() == Some(external_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationType;

    fn new_config(shop_id: i64, bin: &str, active: bool) -> NewPaymentConfig {
        NewPaymentConfig {
            shop_id,
            organization_bin: bin.to_string(),
            device_token: None,
            is_active: active,
            provider: Provider::Kaspi,
        }
    }

    #[tokio::test]
    async fn missing_config_is_not_found() {
        let store = MemoryConfigStore::new();
        let err = store.get_config(1, Provider::Kaspi).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn upsert_replaces_the_row_for_a_shop() {
        let store = MemoryConfigStore::new();
        let first = store.upsert_config(new_config(7, "111111111111", true)).await.unwrap();
        let second = store.upsert_config(new_config(7, "222222222222", false)).await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(store.list_configs().await.unwrap().len(), 1);
        let stored = store.get_config(7, Provider::Kaspi).await.unwrap();
        assert_eq!(stored.organization_bin, "222222222222");
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryConfigStore::new();
        store.set_available(false);
        let err = store.get_config(1, Provider::Kaspi).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn log_query_is_newest_first_and_filtered() {
        let log = MemoryAuditLog::new();
        for shop_id in [1, 2, 1] {
            let entry = NewLogEntry {
                shop_id: Some(shop_id),
                organization_bin: None,
                operation_type: OperationType::Status,
                external_id: Some(format!("ext-{}", shop_id)),
                amount: None,
                status: "Wait".into(),
                error_message: None,
                provider: Provider::Kaspi,
                is_fallback: false,
                reported_by_client: false,
            };
            log.append(entry).await.unwrap();
        }

        let all = log.query(None, 10).await.unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 2, 1]);

        let shop_one = log.query(Some(1), 1).await.unwrap();
        assert_eq!(shop_one.len(), 1);
        assert_eq!(shop_one[0].id, 3);

        let history = log.history("ext-1").await.unwrap();
        assert_eq!(history.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
    }
}
