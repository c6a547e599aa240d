//! API key model for authentication.
//!
//! Customers and admins authenticate with bearer keys stored as SHA-256
//! hashes. Issuing keys (login, token exchange) happens outside this service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role granted by an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "api_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApiRole {
    Customer,
    Admin,
}

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `key_hash`: SHA-256 hash of the actual API key
/// - `principal_id`: the customer or admin the key acts for
/// - `role`: `customer` or `admin`
/// - `is_active`: revoked keys are kept with `is_active = false`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,

    /// SHA-256 hash of the actual API key (64 hex characters)
    pub key_hash: String,

    /// User id for customer keys, admin id for admin keys
    pub principal_id: Uuid,

    pub role: ApiRole,

    /// Human-readable label, e.g. the device or admin name
    pub label: String,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}
