//! Payment gateway integration.
//!
//! Outbound: request a payment link for a committed transaction.
//! Inbound: verify the HMAC signature of gateway notifications and map the
//! gateway's status vocabulary onto [`PaymentStatus`].

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
    error::AppError,
    models::transaction::{PaymentMethod, PaymentStatus},
};

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the `X-Callback-Signature` header value.
const SIGNATURE_PREFIX: &str = "sha256=";

/// A payment link issued by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentRequest {
    #[serde(alias = "redirect_url")]
    pub payment_url: String,

    #[serde(default, alias = "token")]
    pub reference: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the gateway for a payment link covering `amount`.
    async fn create_payment_request(
        &self,
        transaction_code: &str,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<PaymentRequest, AppError>;
}

/// Gateway reached over HTTP with server-key basic auth.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    transaction_details: TransactionDetails<'a>,
    enabled_payments: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: Decimal,
}

impl HttpPaymentGateway {
    pub fn new(endpoint: String, server_key: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::DependencyFailure(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            server_key,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment_request(
        &self,
        transaction_code: &str,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<PaymentRequest, AppError> {
        let body = ChargeBody {
            transaction_details: TransactionDetails {
                order_id: transaction_code,
                gross_amount: amount,
            },
            enabled_payments: [method.as_str()],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.server_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::DependencyFailure(format!("payment gateway unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::DependencyFailure(format!(
                "payment gateway returned {status}: {text}"
            )));
        }

        response
            .json::<PaymentRequest>()
            .await
            .map_err(|e| AppError::DependencyFailure(format!("invalid payment gateway response: {e}")))
    }
}

/// Stand-in used when no gateway is configured. Every request fails, so new
/// transactions are created with `payment_url_pending` set.
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_payment_request(
        &self,
        _transaction_code: &str,
        _amount: Decimal,
        _method: PaymentMethod,
    ) -> Result<PaymentRequest, AppError> {
        Err(AppError::DependencyFailure(
            "payment gateway is not configured".to_string(),
        ))
    }
}

/// Payment notification pushed by the gateway.
///
/// # JSON Example
///
/// ```json
/// {
///   "order_id": "TXN4K9Q2ZP7AB",
///   "transaction_status": "settlement",
///   "transaction_id": "b7a0c5e2-gateway-ref"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentNotification {
    /// Our transaction code
    pub order_id: String,
    pub transaction_status: String,

    /// Gateway-side reference
    pub transaction_id: Option<String>,
}

impl PaymentNotification {
    /// Map the gateway status onto ours. Unknown statuses yield `None`.
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        map_gateway_status(&self.transaction_status)
    }
}

pub fn map_gateway_status(status: &str) -> Option<PaymentStatus> {
    match status.to_ascii_lowercase().as_str() {
        "settlement" | "capture" | "paid" => Some(PaymentStatus::Paid),
        "pending" => Some(PaymentStatus::Pending),
        "deny" | "cancel" | "failure" | "failed" => Some(PaymentStatus::Failed),
        "expire" | "expired" => Some(PaymentStatus::Expired),
        "refund" | "partial_refund" | "refunded" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

/// Compute the signature the gateway sends for `body`.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Unauthorized)?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify an `X-Callback-Signature` header against the raw request body.
///
/// The comparison is constant-time. An empty secret rejects every callback.
///
/// # Errors
///
/// - `Unauthorized`: missing prefix, bad hex, wrong signature or no secret
pub fn verify_callback_signature(secret: &str, body: &[u8], header: &str) -> Result<(), AppError> {
    if secret.is_empty() {
        tracing::warn!("payment callback rejected: no callback secret configured");
        return Err(AppError::Unauthorized);
    }

    let provided = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|sig| hex::decode(sig).ok())
        .ok_or(AppError::Unauthorized)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Unauthorized)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| AppError::Unauthorized)
}
