use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_router::client::{ClientError, PaymentRouterClient};
use payment_router::context::{ShopContext, ShopIdSource};
use payment_router::models::{NewLogEntry, OperationType, PaymentStatus, Provider};
use payment_router::services::FallbackConfig;

const SHOP_BIN: &str = "920317450731";
const FALLBACK_BIN: &str = "000000000001";

fn client(uri: &str) -> PaymentRouterClient {
    PaymentRouterClient::new(uri, Provider::Kaspi, Duration::from_secs(3600), Duration::from_secs(2))
        .unwrap()
        .with_fallback(FallbackConfig {
            organization_bin: FALLBACK_BIN.to_string(),
            device_token: None,
        })
}

fn config_body(shop_id: i64, bin: &str, is_fallback: bool) -> serde_json::Value {
    json!({
        "success": true,
        "config": {
            "shop_id": shop_id,
            "organization_bin": bin,
            "device_token": null,
            "is_active": true,
            "provider": "kaspi",
            "is_fallback": is_fallback,
            "source": "explicit"
        }
    })
}

#[tokio::test]
async fn resolved_config_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/kaspi/config/121038"))
        .respond_with(ResponseTemplate::new(200).set_body_json(config_body(121038, SHOP_BIN, false)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let ctx = ShopContext {
        order_shop_id: Some(121038),
        ..ShopContext::default()
    };

    let first = client.resolve_config(&ctx).await.unwrap();
    let second = client.resolve_config(&ctx).await.unwrap();

    assert_eq!(first.organization_bin, SHOP_BIN);
    assert_eq!(first.source, ShopIdSource::Order);
    assert!(!second.is_fallback);
}

#[tokio::test]
async fn malformed_response_falls_back_without_caching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/kaspi/config/121038"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let ctx = ShopContext::explicit(121038);

    for _ in 0..2 {
        let config = client.resolve_config(&ctx).await.unwrap();
        assert!(config.is_fallback);
        assert_eq!(config.organization_bin, FALLBACK_BIN);
        assert_eq!(config.shop_id, 121038);
    }
}

#[tokio::test]
async fn server_error_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/kaspi/config/5"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = client(&server.uri())
        .resolve_config(&ShopContext::explicit(5))
        .await
        .unwrap();
    assert!(config.is_fallback);
}

#[tokio::test]
async fn unreachable_router_without_fallback_is_an_error() {
    let client = PaymentRouterClient::new(
        "http://127.0.0.1:1",
        Provider::Kaspi,
        Duration::from_secs(60),
        Duration::from_millis(500),
    )
    .unwrap();

    let err = client
        .resolve_config(&ShopContext::explicit(7))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ShopNotConfigured(7)));
}

#[tokio::test]
async fn create_payment_returns_typed_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments/kaspi/create"))
        .and(header("x-shop-id", "121038"))
        .and(body_partial_json(json!({ "shop_id": 121038, "amount": 100, "phone": "77015211545" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "shop_id": 121038,
            "external_id": "kaspi-1",
            "status": "Wait",
            "organization_bin": SHOP_BIN,
            "is_fallback": false
        })))
        .mount(&server)
        .await;

    let created = client(&server.uri())
        .create_payment(&ShopContext::explicit(121038), 100, "77015211545", "order")
        .await
        .unwrap();

    assert_eq!(created.external_id, "kaspi-1");
    assert_eq!(created.status, PaymentStatus::Wait);
    assert_eq!(created.organization_bin, SHOP_BIN);
}

#[tokio::test]
async fn server_error_codes_are_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments/kaspi/refund"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "success": false,
            "code": "InsufficientAvailableAmount",
            "message": "requested 1, available 0"
        })))
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .refund(&ShopContext::explicit(121038), "kaspi-1", 1)
        .await
        .unwrap_err();

    assert_eq!(err.server_code(), Some("InsufficientAvailableAmount"));
    assert!(matches!(err, ClientError::Server { status: 422, .. }));
}

#[tokio::test]
async fn check_status_reads_status_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/kaspi/status/kaspi-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "external_id": "kaspi-1",
            "status": "Processed"
        })))
        .mount(&server)
        .await;

    let status = client(&server.uri()).check_status("kaspi-1").await.unwrap();
    assert_eq!(status, PaymentStatus::Processed);
}

#[tokio::test]
async fn degraded_report_is_marked_as_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments/kaspi/logs"))
        .and(body_partial_json(json!({ "is_fallback": true, "operation_type": "create" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "success": true, "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let entry = NewLogEntry {
        shop_id: Some(121038),
        organization_bin: Some(FALLBACK_BIN.to_string()),
        operation_type: OperationType::Create,
        external_id: Some("kaspi-9".to_string()),
        amount: Some(100),
        status: "Wait".to_string(),
        error_message: None,
        provider: Provider::Kaspi,
        is_fallback: false,
        reported_by_client: false,
    };

    client(&server.uri()).report(entry, true).await.unwrap();
}

#[tokio::test]
async fn report_never_fails_the_caller() {
    let client = PaymentRouterClient::new(
        "http://127.0.0.1:1",
        Provider::Kaspi,
        Duration::from_secs(60),
        Duration::from_millis(500),
    )
    .unwrap();

    let entry = NewLogEntry {
        shop_id: Some(1),
        organization_bin: None,
        operation_type: OperationType::Status,
        external_id: Some("x".to_string()),
        amount: None,
        status: "Error".to_string(),
        error_message: Some("router down".to_string()),
        provider: Provider::Kaspi,
        is_fallback: false,
        reported_by_client: false,
    };

    // Задача завершается штатно, ошибка только в логе
    assert!(client.report(entry, true).await.is_ok());
}

#[tokio::test]
async fn create_payment_link_returns_typed_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments/kaspi/create-link"))
        .and(header("x-shop-id", "121038"))
        .and(body_partial_json(json!({ "shop_id": 121038, "amount": 2500, "message": "order 17" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "shop_id": 121038,
            "payment_link": "https://pay.kaspi.kz/pay/abc",
            "payment_id": "abc",
            "expire_date": null,
            "organization_bin": SHOP_BIN,
            "is_fallback": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let link = client(&server.uri())
        .create_payment_link(&ShopContext::explicit(121038), 2500, "order 17")
        .await
        .unwrap();

    assert_eq!(link.payment_id, "abc");
    assert_eq!(link.payment_link, "https://pay.kaspi.kz/pay/abc");
    assert_eq!(link.organization_bin, SHOP_BIN);
    assert!(!link.is_fallback);
}

#[tokio::test]
async fn check_status_encodes_reserved_characters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/kaspi/status/abc%3Fdef"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "external_id": "abc?def",
            "status": "Wait"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let status = client(&server.uri()).check_status("abc?def").await.unwrap();
    assert_eq!(status, PaymentStatus::Wait);
}
