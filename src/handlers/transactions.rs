//! Transaction HTTP handlers.
//!
//! Customer:
//! - POST /api/v1/transactions - Create a topup transaction
//! - GET /api/v1/transactions - List own transactions
//! - GET /api/v1/transactions/{id} - Get own transaction
//! - GET /api/v1/transactions/{id}/logs - Audit trail of own transaction
//! - POST /api/v1/transactions/{id}/cancel - Cancel own pending transaction
//!
//! Admin:
//! - GET /api/v1/admin/transactions - List all transactions
//! - GET /api/v1/admin/transactions/{id} - Get any transaction
//! - GET /api/v1/admin/transactions/{id}/logs - Audit trail
//! - POST /api/v1/admin/transactions/{id}/status - Move to a new status
//! - POST /api/v1/admin/transactions/{id}/payment-url - Backfill payment link
//! - POST /api/v1/admin/transactions/expire - Run the expiry sweep now

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        Paginated,
        transaction::{
            CreateTransactionRequest, CreatedTransactionResponse, Transaction, TransactionFilter,
            TransactionLog, TransactionResponse, UpdateStatusRequest,
        },
    },
    services::{
        state_machine::{self, ExpirySummary, TransitionRequest},
        transaction_service::{self, ClientMeta},
    },
    state::AppState,
};

/// Rows handled by one manually triggered expiry sweep.
const EXPIRY_BATCH: i64 = 500;

/// Create a transaction for the authenticated customer.
///
/// # Request Body
///
/// ```json
/// {
///   "product_id": "550e8400-...",
///   "game_account": { "game_account": "12345678", "game_zone": "2001" },
///   "payment_method": "gopay",
///   "whatsapp": "081234567890",
///   "voucher_code": "HEMAT10"
/// }
/// ```
///
/// # Response (201)
///
/// The transaction, plus `payment_url_pending: true` when the payment link
/// could not be obtained yet.
pub async fn create_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<CreatedTransactionResponse>), AppError> {
    let meta = client_meta(&headers);
    let created =
        transaction_service::create_transaction(&state, auth.principal_id, request, meta).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_my_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<Paginated<TransactionResponse>>, AppError> {
    let page =
        transaction_service::list_transactions(&state.pool, Some(auth.principal_id), &filter)
            .await?;
    Ok(Json(page.map(TransactionResponse::from)))
}

/// Get a transaction owned by the caller. Other users' transactions are 404.
pub async fn get_my_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction =
        transaction_service::get_transaction(&state.pool, transaction_id, Some(auth.principal_id))
            .await?;
    Ok(Json(transaction.into()))
}

pub async fn list_my_transaction_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Vec<TransactionLog>>, AppError> {
    let logs =
        transaction_service::list_logs(&state.pool, transaction_id, Some(auth.principal_id))
            .await?;
    Ok(Json(logs))
}

/// Cancel a transaction owned by the caller.
///
/// Only pending transactions can be cancelled here; anything further along
/// returns 422 with code `invalid_state`.
pub async fn cancel_my_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction =
        transaction_service::cancel_transaction(&state, transaction_id, auth.principal_id).await?;
    Ok(Json(transaction.into()))
}

pub async fn admin_list_transactions(
    State(state): State<AppState>,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<Paginated<Transaction>>, AppError> {
    let page = transaction_service::list_transactions(&state.pool, None, &filter).await?;
    Ok(Json(page))
}

pub async fn admin_get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = transaction_service::get_transaction(&state.pool, transaction_id, None).await?;
    Ok(Json(transaction))
}

pub async fn admin_list_transaction_logs(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Vec<TransactionLog>>, AppError> {
    let logs = transaction_service::list_logs(&state.pool, transaction_id, None).await?;
    Ok(Json(logs))
}

/// Move a transaction to a new processing status.
///
/// # Request Body
///
/// ```json
/// {
///   "status": "completed",
///   "message": "Diamonds delivered",
///   "metadata": { "provider_ref": "ML-99812" }
/// }
/// ```
///
/// Repeating the current status is a no-op. Illegal moves return 422 with
/// code `illegal_transition`.
pub async fn admin_update_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Transaction>, AppError> {
    let transition = TransitionRequest {
        status: request.status,
        message: request.message,
        admin_id: Some(auth.principal_id),
        metadata: request.metadata,
    };

    let transaction = state_machine::transition(
        &state.pool,
        state.config.lock_policy(),
        transaction_id,
        transition,
    )
    .await?;

    Ok(Json(transaction))
}

pub async fn admin_retry_payment_url(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = transaction_service::retry_payment_url(&state, transaction_id).await?;
    Ok(Json(transaction))
}

pub async fn admin_expire_overdue(
    State(state): State<AppState>,
) -> Result<Json<ExpirySummary>, AppError> {
    let summary = state_machine::expire_overdue(
        &state.pool,
        state.config.lock_policy(),
        Utc::now(),
        EXPIRY_BATCH,
    )
    .await?;
    Ok(Json(summary))
}

/// User agent and client IP. Behind a proxy the first `X-Forwarded-For`
/// entry wins over `X-Real-IP`.
fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let ip_address = header_str("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header_str("x-real-ip"))
        .filter(|ip| ip.len() <= 45)
        .map(str::to_string);

    ClientMeta {
        user_agent: header_str(header::USER_AGENT.as_str()).map(str::to_string),
        ip_address,
    }
}
