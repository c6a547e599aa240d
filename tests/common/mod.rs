//! Shared helpers for database-backed integration tests.
//!
//! Tests run against the PostgreSQL database in `DATABASE_URL` and return
//! early when it is not set. Every fixture uses fresh ids and codes, so tests
//! can share one database and run in parallel.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use topup_service::{
    config::{Config, FeeSchedule},
    db::{self, DbPool},
    error::AppError,
    middleware::auth::hash_api_key,
    models::{
        api_key::ApiRole,
        product::{CreateCategoryRequest, CreateProductRequest, Product},
        transaction::{CreateTransactionRequest, GameAccountData, PaymentMethod},
        voucher::{ApplicationType, CreateVoucherRequest, DiscountType, VoucherDetail},
    },
    services::{
        catalog_service::{self, CatalogCache},
        messaging::LogMessenger,
        payment_gateway::{PaymentGateway, PaymentRequest, UnconfiguredGateway},
        voucher_service,
    },
    state::AppState,
};

pub const CALLBACK_SECRET: &str = "test-callback-secret";

/// Connect and migrate, or `None` when `DATABASE_URL` is unset.
pub async fn test_pool() -> Option<DbPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = db::create_pool(&database_url, 20)
        .await
        .expect("Failed to connect to test database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

pub fn test_config(fees: &str) -> Config {
    Config {
        database_url: String::new(),
        server_port: 0,
        database_max_connections: 20,
        transaction_expiry_hours: 24,
        max_lock_retries: 5,
        lock_timeout_ms: 2000,
        outbound_timeout_secs: 2,
        expiry_sweep_interval_secs: 0,
        catalog_cache_ttl_secs: 60,
        payment_gateway_url: None,
        payment_server_key: None,
        payment_callback_secret: CALLBACK_SECRET.to_string(),
        payment_fees: fees.to_string(),
        whatsapp_api_url: None,
        whatsapp_api_key: None,
        fee_schedule: FeeSchedule::parse(fees).expect("valid fee schedule"),
    }
}

/// Gateway that issues a deterministic link for every request.
pub struct StaticGateway;

#[async_trait]
impl PaymentGateway for StaticGateway {
    async fn create_payment_request(
        &self,
        transaction_code: &str,
        _amount: Decimal,
        _method: PaymentMethod,
    ) -> Result<PaymentRequest, AppError> {
        Ok(PaymentRequest {
            payment_url: format!("https://pay.test/{transaction_code}"),
            reference: Some(format!("REF-{transaction_code}")),
        })
    }
}

/// State with a working payment gateway and logging messenger.
pub fn test_state(pool: DbPool) -> AppState {
    AppState::new(
        pool,
        test_config(""),
        Arc::new(StaticGateway),
        Arc::new(LogMessenger),
    )
}

/// State whose gateway always fails.
pub fn offline_gateway_state(pool: DbPool) -> AppState {
    AppState::new(
        pool,
        test_config(""),
        Arc::new(UnconfiguredGateway),
        Arc::new(LogMessenger),
    )
}

pub fn unique(prefix: &str) -> String {
    format!("{prefix}{}", &Uuid::new_v4().simple().to_string()[..12]).to_uppercase()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// A category with one active product at `price`.
pub async fn product(pool: &DbPool, price: Decimal, instant_fulfillment: bool) -> Product {
    let cache = CatalogCache::new(std::time::Duration::ZERO);

    let category = catalog_service::create_category(
        pool,
        &cache,
        CreateCategoryRequest {
            name: unique("Game "),
            slug: None,
        },
    )
    .await
    .expect("create category");

    catalog_service::create_product(
        pool,
        &cache,
        CreateProductRequest {
            category_id: category.id,
            name: unique("Pack "),
            slug: None,
            description: None,
            price,
            instant_fulfillment,
            display_order: 0,
        },
    )
    .await
    .expect("create product")
}

/// Voucher request valid from yesterday for a month, applying to everything.
pub fn voucher_request(discount_type: DiscountType, value: Decimal, quota: i32) -> CreateVoucherRequest {
    CreateVoucherRequest {
        code: unique("T"),
        discount_type,
        value,
        description: None,
        application_type: ApplicationType::All,
        applicable_ids: vec![],
        min_transaction_amount: Decimal::ZERO,
        max_discount_amount: None,
        quota,
        max_uses_per_user: 1,
        start_date: today() - Duration::days(1),
        end_date: today() + Duration::days(30),
    }
}

pub async fn voucher(pool: &DbPool, request: CreateVoucherRequest) -> VoucherDetail {
    voucher_service::create_voucher(pool, request, today())
        .await
        .expect("create voucher")
}

pub fn purchase(product_id: Uuid, voucher_code: Option<&str>) -> CreateTransactionRequest {
    CreateTransactionRequest {
        product_id,
        game_account: GameAccountData {
            game_account: "12345678".to_string(),
            game_zone: Some("2001".to_string()),
            game_server: None,
            nickname: Some("Rizky".to_string()),
        },
        payment_method: PaymentMethod::Gopay,
        whatsapp: "0812-3456-7890".to_string(),
        voucher_code: voucher_code.map(str::to_string),
    }
}

/// Insert an API key and return the plaintext key.
pub async fn api_key(pool: &DbPool, principal_id: Uuid, role: ApiRole) -> String {
    let key = format!("test-{}", Uuid::new_v4());

    sqlx::query("INSERT INTO api_keys (key_hash, principal_id, role, label) VALUES ($1, $2, $3, $4)")
        .bind(hash_api_key(&key))
        .bind(principal_id)
        .bind(role)
        .bind("integration test")
        .execute(pool)
        .await
        .expect("insert api key");

    key
}
