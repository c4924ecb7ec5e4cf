//! Контекст магазина: откуда берётся shop_id для маршрутизации платежа.
//!
//! Контекст собирается один раз на границе HTTP (или в клиенте витрины) из явных
//! источников и передаётся дальше обычным аргументом. Приоритет источников:
//! явный параметр → заказ → товар → метаданные запроса → магазин по умолчанию.

use serde::{Deserialize, Serialize};

/// Заголовок запроса, из которого берётся shop_id последним перед значением по умолчанию.
pub const SHOP_ID_HEADER: &str = "x-shop-id";

/// Источник, из которого был определён shop_id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopIdSource {
    Explicit,
    Order,
    Product,
    RequestMetadata,
    Default,
}

/// Подсказки из тела запроса: магазин, к которому относится заказ или товар.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextHints {
    #[serde(default)]
    pub order_shop_id: Option<i64>,
    #[serde(default)]
    pub product_shop_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopContext {
    pub explicit: Option<i64>,
    pub order_shop_id: Option<i64>,
    pub product_shop_id: Option<i64>,
    pub request_shop_id: Option<i64>,
}

impl ShopContext {
    pub fn explicit(shop_id: i64) -> Self {
        Self {
            explicit: Some(shop_id),
            ..Self::default()
        }
    }

    pub fn from_parts(
        explicit: Option<i64>,
        hints: Option<&ContextHints>,
        request_shop_id: Option<i64>,
    ) -> Self {
        Self {
            explicit,
            order_shop_id: hints.and_then(|h| h.order_shop_id),
            product_shop_id: hints.and_then(|h| h.product_shop_id),
            request_shop_id,
        }
    }

    /// Первый непустой (положительный) shop_id по приоритету источников.
    pub fn resolve_shop_id(&self, default_shop_id: Option<i64>) -> Option<(i64, ShopIdSource)> {
        let candidates = [
            (self.explicit, ShopIdSource::Explicit),
            (self.order_shop_id, ShopIdSource::Order),
            (self.product_shop_id, ShopIdSource::Product),
            (self.request_shop_id, ShopIdSource::RequestMetadata),
            (default_shop_id, ShopIdSource::Default),
        ];

        candidates
            .into_iter()
            .find_map(|(id, source)| id.filter(|id| *id > 0).map(|id| (id, source)))
    }
}

pub fn parse_shop_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|id| *id > 0)
}
