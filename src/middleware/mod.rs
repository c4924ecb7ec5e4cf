use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

use crate::context::{parse_shop_id, SHOP_ID_HEADER};

/// shop_id из заголовка `X-Shop-Id` (метаданные запроса). Некорректное значение - как отсутствие.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShopIdHeader(pub Option<i64>);

impl<S> FromRequestParts<S> for ShopIdHeader
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let shop_id = parts
            .headers
            .get(SHOP_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_shop_id);

        Ok(ShopIdHeader(shop_id))
    }
}
