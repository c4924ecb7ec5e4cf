//! Кеш результатов резолвера (shop_id → ResolvedConfig).
//!
//! Сбой кеша никогда не ломает платёж: промах или ошибка означают поход в хранилище.
//! Fallback-конфигурации в кеш не попадают - это забота резолвера.

pub mod redis_cache;
pub mod ttl;

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{Provider, ResolvedConfig};

pub use redis_cache::RedisConfigCache;
pub use ttl::TtlCache;

#[async_trait]
pub trait ConfigCache: Send + Sync {
    async fn get(&self, shop_id: i64, provider: Provider) -> Option<ResolvedConfig>;

    async fn put(&self, config: &ResolvedConfig);

    async fn invalidate(&self, shop_id: i64, provider: Provider);
}

/// Кеш в памяти процесса.
pub struct MemoryConfigCache {
    inner: TtlCache<(i64, Provider), ResolvedConfig>,
}

impl MemoryConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }
}

#[async_trait]
impl ConfigCache for MemoryConfigCache {
    async fn get(&self, shop_id: i64, provider: Provider) -> Option<ResolvedConfig> {
        self.inner.get(&(shop_id, provider)).await
    }

    async fn put(&self, config: &ResolvedConfig) {
        self.inner
            .insert((config.shop_id, config.provider), config.clone())
            .await;
    }

    async fn invalidate(&self, shop_id: i64, provider: Provider) {
        self.inner.remove(&(shop_id, provider)).await;
    }
}
