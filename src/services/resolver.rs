//! Резолвер маршрута платежа: shop_id → БИН организации и токен устройства.
//!
//! Главный инвариант: деньги магазина A никогда не зачисляются на счёт магазина B.
//! Поэтому активный маршрут берётся из хранилища (с кешем на TTL), а при любой
//! проблеме с маршрутом используется явно заданный fallback, который помечается
//! `is_fallback = true` и никогда не кешируется - сбой хранилища лечится сам на
//! следующем же запросе.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::ConfigCache;
use crate::config::RoutingConfig;
use crate::context::{ShopContext, ShopIdSource};
use crate::error::{PaymentError, PaymentResult, StoreError};
use crate::models::{Provider, ResolvedConfig};
use crate::store::ConfigStore;

/// Статический маршрут на случай, когда маршрут магазина определить нельзя.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackConfig {
    pub organization_bin: String,
    pub device_token: Option<String>,
}

impl FallbackConfig {
    pub fn from_routing(routing: &RoutingConfig) -> Option<Self> {
        routing
            .fallback_organization_bin
            .as_ref()
            .map(|bin| FallbackConfig {
                organization_bin: bin.clone(),
                device_token: routing.fallback_device_token.clone(),
            })
    }

    /// Маршрут fallback для конкретного магазина, всегда с `is_fallback = true`.
    pub fn resolved_for(&self, shop_id: i64, source: ShopIdSource, provider: Provider) -> ResolvedConfig {
        ResolvedConfig {
            shop_id,
            organization_bin: self.organization_bin.clone(),
            device_token: self.device_token.clone(),
            is_active: true,
            provider,
            is_fallback: true,
            source,
        }
    }
}

pub struct RoutingResolver {
    store: Arc<dyn ConfigStore>,
    cache: Arc<dyn ConfigCache>,
    fallback: Option<FallbackConfig>,
    default_shop_id: Option<i64>,
}

impl RoutingResolver {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cache: Arc<dyn ConfigCache>,
        fallback: Option<FallbackConfig>,
        default_shop_id: Option<i64>,
    ) -> Self {
        Self {
            store,
            cache,
            fallback,
            default_shop_id,
        }
    }

    pub fn from_config(
        store: Arc<dyn ConfigStore>,
        cache: Arc<dyn ConfigCache>,
        routing: &RoutingConfig,
    ) -> Self {
        Self::new(
            store,
            cache,
            FallbackConfig::from_routing(routing),
            routing.default_shop_id,
        )
    }

    pub fn fallback(&self) -> Option<&FallbackConfig> {
        self.fallback.as_ref()
    }

    /// Определяет shop_id из контекста и возвращает маршрут для него.
    pub async fn resolve(&self, ctx: &ShopContext, provider: Provider) -> PaymentResult<ResolvedConfig> {
        let (shop_id, source) = ctx.resolve_shop_id(self.default_shop_id).ok_or_else(|| {
            PaymentError::Validation("shop_id could not be determined from the request".to_string())
        })?;

        if source == ShopIdSource::Default {
            warn!("No shop_id in request context, using default shop {}", shop_id);
        }

        self.resolve_shop(shop_id, source, provider).await
    }

    pub async fn resolve_shop(
        &self,
        shop_id: i64,
        source: ShopIdSource,
        provider: Provider,
    ) -> PaymentResult<ResolvedConfig> {
        if let Some(mut cached) = self.cache.get(shop_id, provider).await {
            debug!("Payment config for shop {} served from cache", shop_id);
            cached.source = source;
            return Ok(cached);
        }

        let reason = match self.store.get_config(shop_id, provider).await {
            Ok(config) if config.is_active => {
                let resolved = ResolvedConfig::from_config(config, source);
                self.cache.put(&resolved).await;
                return Ok(resolved);
            }
            Ok(_) => PaymentError::ConfigInactive(shop_id),
            Err(StoreError::NotFound) => PaymentError::ConfigNotFound(shop_id),
            Err(e) => PaymentError::Store(e),
        };

        self.fallback_for(shop_id, source, provider, reason)
    }

    fn fallback_for(
        &self,
        shop_id: i64,
        source: ShopIdSource,
        provider: Provider,
        reason: PaymentError,
    ) -> PaymentResult<ResolvedConfig> {
        let Some(fallback) = &self.fallback else {
            warn!(
                "No payment route for shop {} ({}) and no fallback configured",
                shop_id, reason
            );
            return Err(PaymentError::ShopNotConfigured(shop_id));
        };

        warn!(
            "Using fallback payment config for shop {}: {} (bin={})",
            shop_id, reason, fallback.organization_bin
        );

        Ok(fallback.resolved_for(shop_id, source, provider))
    }

    /// Сбрасывает кеш после изменения маршрута в админке.
    pub async fn invalidate(&self, shop_id: i64, provider: Provider) {
        self.cache.invalidate(shop_id, provider).await;
        info!("Payment config cache invalidated for shop {}", shop_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryConfigCache;
    use crate::models::NewPaymentConfig;
    use crate::store::MemoryConfigStore;
    use std::time::Duration;

    const FALLBACK_BIN: &str = "000000000001";

    fn resolver(store: Arc<MemoryConfigStore>) -> RoutingResolver {
        RoutingResolver::new(
            store,
            Arc::new(MemoryConfigCache::new(Duration::from_secs(3600))),
            Some(FallbackConfig {
                organization_bin: FALLBACK_BIN.to_string(),
                device_token: None,
            }),
            None,
        )
    }

    async fn seed(store: &MemoryConfigStore, shop_id: i64, bin: &str, active: bool) {
        store
            .upsert_config(NewPaymentConfig {
                shop_id,
                organization_bin: bin.to_string(),
                device_token: Some("6f1c1b0e-2f55-4c39-9a43-0e7b8d2c9a11".to_string()),
                is_active: active,
                provider: Provider::Kaspi,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn active_config_is_returned_as_is() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, 121038, "920317450731", true).await;
        let resolver = resolver(store);

        let resolved = resolver
            .resolve(&ShopContext::explicit(121038), Provider::Kaspi)
            .await
            .unwrap();
        assert_eq!(resolved.organization_bin, "920317450731");
        assert!(!resolved.is_fallback);
        assert_eq!(resolved.source, ShopIdSource::Explicit);
    }

    #[tokio::test]
    async fn missing_and_inactive_configs_fall_back() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, 5, "555555555555", false).await;
        let resolver = resolver(store);

        for shop_id in [5, 999999] {
            let resolved = resolver
                .resolve(&ShopContext::explicit(shop_id), Provider::Kaspi)
                .await
                .unwrap();
            assert!(resolved.is_fallback);
            assert_eq!(resolved.shop_id, shop_id);
            assert_eq!(resolved.organization_bin, FALLBACK_BIN);
        }
    }

    #[tokio::test]
    async fn no_fallback_means_shop_not_configured() {
        let store = Arc::new(MemoryConfigStore::new());
        let resolver = RoutingResolver::new(
            store,
            Arc::new(MemoryConfigCache::new(Duration::from_secs(3600))),
            None,
            None,
        );
        let err = resolver
            .resolve(&ShopContext::explicit(1), Provider::Kaspi)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ShopNotConfigured(1)));
    }

    #[tokio::test]
    async fn empty_context_without_default_is_rejected() {
        let resolver = resolver(Arc::new(MemoryConfigStore::new()));
        let err = resolver
            .resolve(&ShopContext::default(), Provider::Kaspi)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
    }

    #[tokio::test]
    async fn fallback_results_are_not_cached() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, 7, "777777777777", true).await;
        store.set_available(false);
        let resolver = resolver(store.clone());

        let first = resolver.resolve(&ShopContext::explicit(7), Provider::Kaspi).await.unwrap();
        let second = resolver.resolve(&ShopContext::explicit(7), Provider::Kaspi).await.unwrap();
        assert!(first.is_fallback && second.is_fallback);
        assert_eq!(store.reads(), 2);

        // Хранилище ожило - следующий запрос сразу получает настоящий маршрут
        store.set_available(true);
        let healed = resolver.resolve(&ShopContext::explicit(7), Provider::Kaspi).await.unwrap();
        assert!(!healed.is_fallback);
        assert_eq!(healed.organization_bin, "777777777777");
    }

    #[tokio::test(start_paused = true)]
    async fn cached_config_is_served_until_ttl_expires() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, 121038, "920317450731", true).await;
        let resolver = resolver(store.clone());
        let ctx = ShopContext::explicit(121038);

        let t0 = resolver.resolve(&ctx, Provider::Kaspi).await.unwrap();
        assert_eq!(t0.organization_bin, "920317450731");

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        seed(&store, 121038, "111111111111", true).await;
        let t30 = resolver.resolve(&ctx, Provider::Kaspi).await.unwrap();
        assert_eq!(t30.organization_bin, "920317450731");
        assert_eq!(store.reads(), 1);

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let t60 = resolver.resolve(&ctx, Provider::Kaspi).await.unwrap();
        assert_eq!(t60.organization_bin, "111111111111");
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_store_lookup() {
        let store = Arc::new(MemoryConfigStore::new());
        seed(&store, 3, "333333333333", true).await;
        let resolver = resolver(store.clone());
        let ctx = ShopContext::explicit(3);

        resolver.resolve(&ctx, Provider::Kaspi).await.unwrap();
        seed(&store, 3, "444444444444", true).await;
        resolver.invalidate(3, Provider::Kaspi).await;

        let fresh = resolver.resolve(&ctx, Provider::Kaspi).await.unwrap();
        assert_eq!(fresh.organization_bin, "444444444444");
    }
}
