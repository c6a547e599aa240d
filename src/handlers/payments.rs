//! Payment gateway callback.
//!
//! - POST /api/v1/payments/webhook
//!
//! Authenticated by an HMAC-SHA256 signature of the raw body in the
//! `X-Callback-Signature` header instead of an API key.

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde_json::{Value, json};

use crate::{
    error::AppError,
    services::{
        payment_gateway::{self, PaymentNotification},
        transaction_service,
    },
    state::AppState,
};

pub const SIGNATURE_HEADER: &str = "x-callback-signature";

/// Apply a payment notification.
///
/// # Responses
///
/// - 200 `{"status": "ok", ...}`: applied, or already in that state
/// - 200 `{"status": "ignored", ...}`: the payment change is not allowed from
///   the current state (e.g. `paid` after expiry); acknowledged so the gateway
///   stops retrying
/// - 401: missing or invalid signature
/// - 404: unknown transaction code
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    payment_gateway::verify_callback_signature(
        &state.config.payment_callback_secret,
        &body,
        signature,
    )?;

    let notification: PaymentNotification = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationFailed(format!("Invalid notification body: {e}")))?;
    let code = notification.order_id.clone();

    match transaction_service::apply_payment_notification(&state, notification).await {
        Ok(transaction) => Ok(Json(json!({
            "status": "ok",
            "transaction_code": transaction.transaction_code,
            "payment_status": transaction.payment_status,
            "transaction_status": transaction.status,
        }))),
        Err(AppError::IllegalTransition { from, to }) => {
            tracing::warn!(transaction_code = %code, %from, %to, "payment notification ignored");
            Ok(Json(json!({
                "status": "ignored",
                "transaction_code": code,
            })))
        }
        Err(e) => Err(e),
    }
}
