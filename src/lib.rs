pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod controllers;
pub mod database;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use anyhow::Context;
use axum::Router;
use std::sync::Arc;
use tracing::info;

use cache::{redis_cache::RedisConfigCache, ConfigCache, MemoryConfigCache};
use gateway::KaspiGateway;
use services::{PaymentOrchestrator, RoutingResolver};
use store::{AuditLog, ConfigStore, MemoryAuditLog, MemoryConfigStore, PgAuditLog, PgConfigStore};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub config_store: Arc<dyn ConfigStore>,
    pub audit_log: Arc<dyn AuditLog>,
}

impl AppState {
    /// Поднимает хранилища, кеш и шлюз по конфигурации окружения.
    pub async fn new(config: &config::Config) -> anyhow::Result<Arc<Self>> {
        let (config_store, audit_log): (Arc<dyn ConfigStore>, Arc<dyn AuditLog>) =
            match &config.database.url {
                Some(url) => {
                    let db = database::Database::new(url, config.database.pool_size)
                        .await
                        .context("failed to connect to database")?;
                    db.run_migrations().await.context("failed to run migrations")?;
                    info!("Database connected");
                    (
                        Arc::new(PgConfigStore::new(db.pool.clone())) as Arc<dyn ConfigStore>,
                        Arc::new(PgAuditLog::new(db.pool)) as Arc<dyn AuditLog>,
                    )
                }
                None => {
                    tracing::warn!("DATABASE_URL is not set, using in-memory stores");
                    (
                        Arc::new(MemoryConfigStore::new()) as Arc<dyn ConfigStore>,
                        Arc::new(MemoryAuditLog::new()) as Arc<dyn AuditLog>,
                    )
                }
            };

        let cache: Arc<dyn ConfigCache> = match &config.redis.url {
            Some(url) => {
                let redis = redis_client::RedisClient::new(url)
                    .await
                    .context("failed to connect to Redis")?;
                info!("Redis connected");
                Arc::new(RedisConfigCache::new(redis, config.routing.cache_ttl()))
            }
            None => Arc::new(MemoryConfigCache::new(config.routing.cache_ttl())),
        };

        let gateway = KaspiGateway::from_config(&config.gateway, &config.circuit_breaker)
            .context("failed to build Kaspi gateway client")?;

        let resolver = Arc::new(RoutingResolver::from_config(
            config_store.clone(),
            cache,
            &config.routing,
        ));
        if resolver.fallback().is_none() {
            tracing::warn!("No fallback organization configured, unknown shops will be rejected");
        }

        let orchestrator = PaymentOrchestrator::new(
            resolver,
            audit_log.clone(),
            config.routing.audit_log_timeout(),
        )
        .with_gateway(Arc::new(gateway))
        .with_refund_serialization(!config.gateway.enforces_refund_limit);

        Ok(Arc::new(Self::from_parts(Arc::new(orchestrator), config_store, audit_log)))
    }

    pub fn from_parts(
        orchestrator: Arc<PaymentOrchestrator>,
        config_store: Arc<dyn ConfigStore>,
        audit_log: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            orchestrator,
            config_store,
            audit_log,
        }
    }
}

/// Роутер приложения без внешних слоёв (трейсинг и CORS навешивает main).
pub fn app(state: Arc<AppState>) -> Router {
    controllers::routes().with_state(state)
}
