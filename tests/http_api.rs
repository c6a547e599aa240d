//! End-to-end tests through the router: authentication, role checks, the
//! signed payment webhook and the checkout flow.

mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use topup_service::{
    handlers::payments::SIGNATURE_HEADER,
    models::{
        api_key::ApiRole,
        transaction::{PaymentStatus, TransactionStatus},
    },
    routes,
    services::{
        payment_gateway::sign_payload,
        transaction_service::{self, ClientMeta},
    },
};

use common::{CALLBACK_SECRET, purchase};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, key: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn webhook(body: &Value, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_database() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let app = routes::router(common::test_state(pool));

    let (status, body) = send(&app, get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn api_keys_and_roles_are_enforced() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let customer = common::api_key(&pool, Uuid::new_v4(), ApiRole::Customer).await;
    let admin = common::api_key(&pool, Uuid::new_v4(), ApiRole::Admin).await;
    let app = routes::router(common::test_state(pool));

    let (status, body) = send(&app, get("/api/v1/transactions", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = send(&app, get("/api/v1/transactions", Some("not-a-real-key"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, get("/api/v1/transactions", Some(&customer))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, body) = send(&app, get("/api/v1/admin/vouchers", Some(&customer))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, _) = send(&app, get("/api/v1/admin/vouchers", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn checkout_through_the_api() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let user = Uuid::new_v4();
    let key = common::api_key(&pool, user, ApiRole::Customer).await;
    let stranger = common::api_key(&pool, Uuid::new_v4(), ApiRole::Customer).await;
    let product = common::product(&pool, dec!(20000), false).await;
    let app = routes::router(common::test_state(pool));

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/transactions",
            &key,
            json!({
                "product_id": product.id,
                "game_account": { "game_account": "998877", "game_zone": "1" },
                "payment_method": "dana",
                "whatsapp": "+62 812 3456 7890"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["payment_status"], "pending");
    assert_eq!(body["whatsapp"], "6281234567890");
    assert_eq!(body["payment_url_pending"], false);

    let id = body["id"].as_str().unwrap().to_string();
    let (status, logs) = send(&app, get(&format!("/api/v1/transactions/{id}/logs"), Some(&key))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, get(&format!("/api/v1/transactions/{id}"), Some(&stranger))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "transaction_not_found");
}

#[tokio::test]
async fn unknown_voucher_is_reported_by_evaluation_and_checkout() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let key = common::api_key(&pool, Uuid::new_v4(), ApiRole::Customer).await;
    let product = common::product(&pool, dec!(20000), false).await;
    let app = routes::router(common::test_state(pool));

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/vouchers/evaluate",
            &key,
            json!({ "code": "NO-SUCH-CODE", "product_id": product.id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "voucher_not_found");

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/transactions",
            &key,
            json!({
                "product_id": product.id,
                "game_account": { "game_account": "998877" },
                "payment_method": "ovo",
                "whatsapp": "081234567890",
                "voucher_code": "NO-SUCH-CODE"
            }),
        ),
    )
    .await;
    assert!(status.is_client_error());
    assert_eq!(body["error"]["code"], "voucher_not_found");
}

#[tokio::test]
async fn webhook_requires_a_valid_signature() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(20000), false).await;
    let created = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap();
    let code = created.transaction.transaction_code.clone();
    let app = routes::router(state);

    let notification = json!({
        "order_id": code,
        "transaction_status": "settlement",
        "transaction_id": "GW-987"
    });

    let (status, _) = send(&app, webhook(&notification, "sha256=deadbeef")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong_key = sign_payload("some-other-secret", notification.to_string().as_bytes()).unwrap();
    let (status, _) = send(&app, webhook(&notification, &wrong_key)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let stored = transaction_service::get_transaction(&pool, created.transaction.id, None)
        .await
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);

    let signature = sign_payload(CALLBACK_SECRET, notification.to_string().as_bytes()).unwrap();
    let (status, body) = send(&app, webhook(&notification, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["payment_status"], "paid");
    assert_eq!(body["transaction_status"], "processing");

    let stored = transaction_service::get_transaction(&pool, created.transaction.id, None)
        .await
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.status, TransactionStatus::Processing);
    assert_eq!(stored.payment_reference.as_deref(), Some("GW-987"));

    // A later failure notice is acknowledged but changes nothing
    let late = json!({ "order_id": code, "transaction_status": "expire" });
    let signature = sign_payload(CALLBACK_SECRET, late.to_string().as_bytes()).unwrap();
    let (status, body) = send(&app, webhook(&late, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn customers_cancel_pending_transactions_through_the_api() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let user = Uuid::new_v4();
    let key = common::api_key(&pool, user, ApiRole::Customer).await;
    let stranger = common::api_key(&pool, Uuid::new_v4(), ApiRole::Customer).await;
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(20000), false).await;
    let created = transaction_service::create_transaction(
        &state,
        user,
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap();
    let uri = format!("/api/v1/transactions/{}/cancel", created.transaction.id);
    let app = routes::router(state);

    let (status, body) = send(&app, post_json(&uri, &stranger, json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "transaction_not_found");

    let (status, body) = send(&app, post_json(&uri, &key, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, post_json(&uri, &key, json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "invalid_state");
}
