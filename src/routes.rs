//! HTTP router.
//!
//! Three groups share one `AppState`:
//! - public: health, catalog reads, the signed payment webhook
//! - customer: any valid API key
//! - admin: API key with the `admin` role

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{health, payments, products, transactions, vouchers},
    middleware::auth,
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/categories", get(products::list_categories))
        .route("/api/v1/products", get(products::list_products))
        .route("/api/v1/products/{id}", get(products::get_product))
        .route("/api/v1/payments/webhook", post(payments::payment_webhook));

    let customer_routes = Router::new()
        .route("/api/v1/vouchers/evaluate", post(vouchers::evaluate_voucher))
        .route(
            "/api/v1/transactions",
            post(transactions::create_transaction).get(transactions::list_my_transactions),
        )
        .route(
            "/api/v1/transactions/{id}",
            get(transactions::get_my_transaction),
        )
        .route(
            "/api/v1/transactions/{id}/logs",
            get(transactions::list_my_transaction_logs),
        )
        .route(
            "/api/v1/transactions/{id}/cancel",
            post(transactions::cancel_my_transaction),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let admin_routes = Router::new()
        // Catalog
        .route("/api/v1/admin/categories", post(products::create_category))
        .route("/api/v1/admin/products", post(products::create_product))
        .route("/api/v1/admin/products/{id}", put(products::update_product))
        // Vouchers
        .route(
            "/api/v1/admin/vouchers",
            post(vouchers::create_voucher).get(vouchers::list_vouchers),
        )
        .route(
            "/api/v1/admin/vouchers/{id}",
            get(vouchers::get_voucher)
                .put(vouchers::update_voucher)
                .delete(vouchers::delete_voucher),
        )
        .route(
            "/api/v1/admin/vouchers/{id}/usages",
            get(vouchers::list_voucher_usages),
        )
        // Transactions
        .route(
            "/api/v1/admin/transactions",
            get(transactions::admin_list_transactions),
        )
        .route(
            "/api/v1/admin/transactions/expire",
            post(transactions::admin_expire_overdue),
        )
        .route(
            "/api/v1/admin/transactions/{id}",
            get(transactions::admin_get_transaction),
        )
        .route(
            "/api/v1/admin/transactions/{id}/logs",
            get(transactions::admin_list_transaction_logs),
        )
        .route(
            "/api/v1/admin/transactions/{id}/status",
            post(transactions::admin_update_status),
        )
        .route(
            "/api/v1/admin/transactions/{id}/payment-url",
            post(transactions::admin_retry_payment_url),
        )
        // Layers run bottom-up: authenticate first, then check the role
        .route_layer(axum_middleware::from_fn(auth::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(customer_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
