//! Voucher HTTP handlers.
//!
//! Customer:
//! - POST /api/v1/vouchers/evaluate - Check a code against a product
//!
//! Admin:
//! - POST /api/v1/admin/vouchers - Create voucher
//! - GET /api/v1/admin/vouchers - List vouchers
//! - GET /api/v1/admin/vouchers/{id} - Voucher with its scope targets
//! - PUT /api/v1/admin/vouchers/{id} - Partial update
//! - DELETE /api/v1/admin/vouchers/{id} - Deactivate (soft delete)
//! - GET /api/v1/admin/vouchers/{id}/usages - Redemption history

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        Paginated,
        voucher::{
            CreateVoucherRequest, EvaluateVoucherRequest, UpdateVoucherRequest, Voucher,
            VoucherDetail, VoucherEvaluation, VoucherFilter, VoucherUsage,
        },
    },
    services::{
        catalog_service,
        voucher_service::{self, PurchaseContext},
    },
    state::AppState,
};

/// Evaluate a voucher for the authenticated customer.
///
/// An inapplicable voucher is still a 200 response:
///
/// ```json
/// {
///   "valid": false,
///   "code": "HEMAT10",
///   "discount_amount": "0",
///   "reason": "scope_mismatch",
///   "message": "Voucher does not apply to this product"
/// }
/// ```
pub async fn evaluate_voucher(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<EvaluateVoucherRequest>,
) -> Result<Json<VoucherEvaluation>, AppError> {
    let product = catalog_service::load_product_for_purchase(&state.pool, request.product_id).await?;

    let purchase = PurchaseContext {
        user_id: auth.principal_id,
        product_id: product.id,
        category_id: product.category_id,
        amount: product.price,
    };

    let evaluation = voucher_service::evaluate_voucher(
        &state.pool,
        &request.code,
        purchase,
        Utc::now().date_naive(),
    )
    .await?;

    Ok(Json(evaluation))
}

pub async fn create_voucher(
    State(state): State<AppState>,
    Json(request): Json<CreateVoucherRequest>,
) -> Result<(StatusCode, Json<VoucherDetail>), AppError> {
    let voucher =
        voucher_service::create_voucher(&state.pool, request, Utc::now().date_naive()).await?;
    Ok((StatusCode::CREATED, Json(voucher)))
}

pub async fn list_vouchers(
    State(state): State<AppState>,
    Query(filter): Query<VoucherFilter>,
) -> Result<Json<Paginated<Voucher>>, AppError> {
    let vouchers =
        voucher_service::list_vouchers(&state.pool, &filter, Utc::now().date_naive()).await?;
    Ok(Json(vouchers))
}

pub async fn get_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
) -> Result<Json<VoucherDetail>, AppError> {
    let voucher =
        voucher_service::get_voucher(&state.pool, voucher_id, Utc::now().date_naive()).await?;
    Ok(Json(voucher))
}

pub async fn update_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
    Json(request): Json<UpdateVoucherRequest>,
) -> Result<Json<VoucherDetail>, AppError> {
    let voucher =
        voucher_service::update_voucher(&state.pool, voucher_id, request, Utc::now().date_naive())
            .await?;
    Ok(Json(voucher))
}

/// Deactivate a voucher. Usage history is kept.
pub async fn delete_voucher(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
) -> Result<Json<Voucher>, AppError> {
    let voucher = voucher_service::deactivate_voucher(&state.pool, voucher_id).await?;
    Ok(Json(voucher))
}

pub async fn list_voucher_usages(
    State(state): State<AppState>,
    Path(voucher_id): Path<Uuid>,
) -> Result<Json<Vec<VoucherUsage>>, AppError> {
    let usages = voucher_service::list_usages(&state.pool, voucher_id).await?;
    Ok(Json(usages))
}
