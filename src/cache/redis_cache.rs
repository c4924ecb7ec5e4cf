use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::warn;

use super::ConfigCache;
use crate::models::{Provider, ResolvedConfig};
use crate::redis_client::RedisClient;

/// Общий для всех инстансов кеш маршрутов в Redis (SET EX + JSON).
#[derive(Clone)]
pub struct RedisConfigCache {
    redis: RedisClient,
    ttl: Duration,
}

impl RedisConfigCache {
    pub fn new(redis: RedisClient, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    fn key(shop_id: i64, provider: Provider) -> String {
        format!("payment_config:{}:{}", provider, shop_id)
    }

    async fn read(&self, key: &str) -> Result<Option<ResolvedConfig>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(key).await?;
        match data {
            Some(data) => serde_json::from_str(&data).map(Some).map_err(|_| {
                redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
            }),
            None => Ok(None),
        }
    }

    async fn write(&self, config: &ResolvedConfig) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(config).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(
            Self::key(config.shop_id, config.provider),
            data,
            self.ttl.as_secs().max(1),
        )
        .await
    }
}

#[async_trait]
impl ConfigCache for RedisConfigCache {
    async fn get(&self, shop_id: i64, provider: Provider) -> Option<ResolvedConfig> {
        match self.read(&Self::key(shop_id, provider)).await {
            Ok(config) => config,
            Err(e) => {
                warn!("Config cache read failed for shop {}: {}", shop_id, e);
                None
            }
        }
    }

    async fn put(&self, config: &ResolvedConfig) {
        if let Err(e) = self.write(config).await {
            warn!("Config cache write failed for shop {}: {}", config.shop_id, e);
        }
    }

    async fn invalidate(&self, shop_id: i64, provider: Provider) {
        let mut conn = self.redis.conn.clone();
        let result: Result<(), _> = conn.del(Self::key(shop_id, provider)).await;
        if let Err(e) = result {
            warn!("Config cache invalidation failed for shop {}: {}", shop_id, e);
        }
    }
}
