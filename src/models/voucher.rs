//! Voucher data models and API request/response types.
//!
//! This module defines:
//! - `Voucher`: a discount code with its quota and validity window
//! - `VoucherApplication`: links a scoped voucher to a category or product
//! - `VoucherUsage`: one redemption, written atomically with the quota increment
//! - Request types for admin voucher management and voucher evaluation

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PageRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discount_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `value` is a percentage of the purchase amount
    Percentage,
    /// `value` is a flat amount
    Fixed,
}

/// Which purchases a voucher applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "application_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    All,
    Category,
    Product,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "voucher_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Active,
    Inactive,
    Expired,
}

impl fmt::Display for VoucherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoucherStatus::Active => "active",
            VoucherStatus::Inactive => "inactive",
            VoucherStatus::Expired => "expired",
        })
    }
}

/// Represents a voucher record from the database.
///
/// # Invariants
///
/// - `start_date <= end_date`
/// - `used_count <= quota`, also enforced by a CHECK constraint
/// - a voucher whose `end_date` has passed is `expired`, whatever the stored
///   status says (see [`Voucher::effective_status`])
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Voucher {
    pub id: Uuid,

    /// Always stored uppercase
    pub code: String,

    pub discount_type: DiscountType,
    pub value: Decimal,
    pub description: Option<String>,
    pub application_type: ApplicationType,
    pub min_transaction_amount: Decimal,

    /// Caps percentage discounts
    pub max_discount_amount: Option<Decimal>,

    /// Total redemptions allowed across all users
    pub quota: i32,
    pub used_count: i32,
    pub max_uses_per_user: i32,

    /// First valid day, inclusive
    pub start_date: NaiveDate,
    /// Last valid day, inclusive
    pub end_date: NaiveDate,

    pub status: VoucherStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Voucher {
    /// Status with lazy expiry applied: once `end_date` is behind `today` the
    /// voucher is expired regardless of the stored value.
    pub fn effective_status(&self, today: NaiveDate) -> VoucherStatus {
        if self.end_date < today {
            VoucherStatus::Expired
        } else {
            self.status
        }
    }

    pub fn has_quota_left(&self) -> bool {
        self.used_count < self.quota
    }
}

/// Links a `category` or `product` scoped voucher to one target.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct VoucherApplication {
    pub id: Uuid,
    pub voucher_id: Uuid,
    pub applicable_id: Uuid,
    pub applicable_type: ApplicationType,
    pub created_at: DateTime<Utc>,
}

/// One voucher redemption. Never updated or deleted.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct VoucherUsage {
    pub id: Uuid,
    pub voucher_id: Uuid,
    pub user_id: Uuid,
    pub transaction_id: Uuid,
    pub discount_amount: Decimal,
    pub used_at: DateTime<Utc>,
}

/// Request body for creating a voucher.
///
/// # JSON Example
///
/// ```json
/// {
///   "code": "hemat10",
///   "discount_type": "percentage",
///   "value": "10",
///   "application_type": "category",
///   "applicable_ids": ["550e8400-e29b-41d4-a716-446655440000"],
///   "max_discount_amount": "5000",
///   "quota": 100,
///   "max_uses_per_user": 1,
///   "start_date": "2025-01-01",
///   "end_date": "2025-01-31"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVoucherRequest {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub description: Option<String>,

    #[serde(default = "default_application_type")]
    pub application_type: ApplicationType,

    /// Category or product ids, depending on `application_type`
    #[serde(default)]
    pub applicable_ids: Vec<Uuid>,

    #[serde(default)]
    pub min_transaction_amount: Decimal,

    pub max_discount_amount: Option<Decimal>,
    pub quota: i32,

    #[serde(default = "default_max_uses_per_user")]
    pub max_uses_per_user: i32,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

fn default_application_type() -> ApplicationType {
    ApplicationType::All
}

fn default_max_uses_per_user() -> i32 {
    1
}

/// Partial update; absent fields are left unchanged.
///
/// `applicable_ids`, when present, replaces the voucher's targets.
/// `max_discount_amount` distinguishes an absent field (keep the cap) from an
/// explicit `null` (remove it).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateVoucherRequest {
    pub value: Option<Decimal>,
    pub description: Option<String>,
    pub application_type: Option<ApplicationType>,
    pub applicable_ids: Option<Vec<Uuid>>,
    pub min_transaction_amount: Option<Decimal>,

    #[serde(default, deserialize_with = "present")]
    pub max_discount_amount: Option<Option<Decimal>>,

    pub quota: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<VoucherStatus>,
}

/// Wraps any present value, `null` included, in `Some`. Paired with
/// `#[serde(default)]` so a missing field stays `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Request body for checking a voucher against a product before checkout.
#[derive(Debug, Deserialize)]
pub struct EvaluateVoucherRequest {
    pub code: String,
    pub product_id: Uuid,
}

/// Result of a voucher evaluation.
///
/// An inapplicable voucher is a normal result (`valid: false`) carrying the
/// stable reason code, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoucherEvaluation {
    pub valid: bool,
    pub code: String,
    pub discount_amount: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Query string for the admin voucher listing.
#[derive(Debug, Default, Deserialize)]
pub struct VoucherFilter {
    pub status: Option<VoucherStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl VoucherFilter {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

/// Voucher together with its scope targets.
#[derive(Debug, Clone, Serialize)]
pub struct VoucherDetail {
    #[serde(flatten)]
    pub voucher: Voucher,
    pub applications: Vec<VoucherApplication>,
}
