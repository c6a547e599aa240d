//! Transaction data models and API request/response types.
//!
//! This module defines:
//! - `Transaction`: a topup purchase with its pricing, payment and processing state
//! - `TransactionLog`: one audit row per creation and per status change
//! - `GameAccountData`: the game account snapshot captured at creation
//! - Request types for creating, transitioning and listing transactions

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::PageRequest;

/// Processing status of a transaction.
///
/// Only the state machine service writes this column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status, driven by payment gateway notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported payment channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Gopay,
    Ovo,
    Dana,
    Bca,
    Mandiri,
    Bni,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Gopay => "gopay",
            PaymentMethod::Ovo => "ovo",
            PaymentMethod::Dana => "dana",
            PaymentMethod::Bca => "bca",
            PaymentMethod::Mandiri => "mandiri",
            PaymentMethod::Bni => "bni",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gopay" => Ok(PaymentMethod::Gopay),
            "ovo" => Ok(PaymentMethod::Ovo),
            "dana" => Ok(PaymentMethod::Dana),
            "bca" => Ok(PaymentMethod::Bca),
            "mandiri" => Ok(PaymentMethod::Mandiri),
            "bni" => Ok(PaymentMethod::Bni),
            other => Err(format!("unknown payment method `{other}`")),
        }
    }
}

/// Game account details copied onto the transaction at creation.
///
/// Later edits to the user's saved game account never touch this snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAccountData {
    pub game_account: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_zone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

/// Represents a transaction record from the database.
///
/// # Pricing Invariant
///
/// `total_amount = product_price + payment_fee - voucher_discount` and
/// `total_amount >= 0`, enforced both when computing the price and by a
/// CHECK constraint on the table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,

    /// Human-readable code, e.g. `TXN4K9Q2ZP7AB`
    pub transaction_code: String,

    pub user_id: Uuid,
    pub product_id: Uuid,

    pub game_account_data: Json<GameAccountData>,

    pub product_price: Decimal,
    pub payment_fee: Decimal,
    pub voucher_discount: Decimal,
    pub total_amount: Decimal,

    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,

    /// Filled in after commit; may stay empty if the gateway was unreachable
    pub payment_url: Option<String>,

    pub whatsapp: String,

    pub status: TransactionStatus,

    /// Set once, on first entry to `processing`
    pub processed_at: Option<DateTime<Utc>>,

    /// Set once, on first entry to `completed`
    pub completed_at: Option<DateTime<Utc>>,

    pub expired_at: DateTime<Utc>,

    pub user_agent: Option<String>,
    pub ip_address: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a transaction's audit trail.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionLog {
    pub id: i64,
    pub transaction_id: Uuid,

    /// `None` for the creation row
    pub status_from: Option<TransactionStatus>,
    pub status_to: TransactionStatus,

    pub message: Option<String>,
    pub metadata: Option<serde_json::Value>,

    /// Admin who triggered the change, if any
    pub created_by_admin: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

/// Request body for creating a transaction.
///
/// # JSON Example
///
/// ```json
/// {
///   "product_id": "550e8400-e29b-41d4-a716-446655440000",
///   "game_account": { "game_account": "12345678", "game_zone": "2001" },
///   "payment_method": "gopay",
///   "whatsapp": "081234567890",
///   "voucher_code": "HEMAT10"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub product_id: Uuid,
    pub game_account: GameAccountData,
    pub payment_method: PaymentMethod,
    pub whatsapp: String,
    pub voucher_code: Option<String>,
}

/// Admin request to move a transaction to a new processing status.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: TransactionStatus,
    pub message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Query string for transaction listings.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TransactionFilter {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

/// Response body for transaction endpoints.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub transaction_code: String,
    pub product_id: Uuid,
    pub game_account_data: GameAccountData,
    pub product_price: Decimal,
    pub payment_fee: Decimal,
    pub voucher_discount: Decimal,
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_url: Option<String>,
    pub whatsapp: String,
    pub status: TransactionStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Convert database Transaction to API TransactionResponse.
///
/// Drops the client metadata (user agent, IP) and the gateway reference.
impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            transaction_code: transaction.transaction_code,
            product_id: transaction.product_id,
            game_account_data: transaction.game_account_data.0,
            product_price: transaction.product_price,
            payment_fee: transaction.payment_fee,
            voucher_discount: transaction.voucher_discount,
            total_amount: transaction.total_amount,
            payment_method: transaction.payment_method,
            payment_status: transaction.payment_status,
            payment_url: transaction.payment_url,
            whatsapp: transaction.whatsapp,
            status: transaction.status,
            processed_at: transaction.processed_at,
            completed_at: transaction.completed_at,
            expired_at: transaction.expired_at,
            created_at: transaction.created_at,
        }
    }
}

/// Response for a newly created transaction.
///
/// `payment_url_pending` is true when the payment gateway could not be reached
/// after the transaction was committed.
#[derive(Debug, Serialize)]
pub struct CreatedTransactionResponse {
    #[serde(flatten)]
    pub transaction: TransactionResponse,
    pub payment_url_pending: bool,
}
