//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the Authorization header
//! 2. Hash it and verify it exists in the database
//! 3. Inject the caller's principal and role into the request
//! 4. Reject unauthorized requests with HTTP 401
//!
//! Admin routes additionally pass through [`require_admin`], which rejects
//! non-admin principals with HTTP 403.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::api_key::{ApiKey, ApiRole},
};

/// Authentication context attached to authenticated requests.
///
/// Route handlers extract it with `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The customer or admin the key belongs to
    pub principal_id: Uuid,

    pub role: ApiRole,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == ApiRole::Admin
    }
}

/// Hex-encoded SHA-256 of an API key, as stored in `api_keys.key_hash`.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Query database for matching hash where `is_active = true`
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
///
/// # Headers
///
/// ```text
/// Authorization: Bearer abc123xyz
/// ```
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let key_hash = hash_api_key(api_key.trim());

    let record = sqlx::query_as::<_, ApiKey>(
        "SELECT * FROM api_keys WHERE key_hash = $1 AND is_active = true",
    )
    .bind(&key_hash)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    // Handlers extract this with Extension<AuthContext>
    request.extensions_mut().insert(AuthContext {
        principal_id: record.principal_id,
        role: record.role,
    });

    Ok(next.run(request).await)
}

/// Reject callers that are not admins. Must run after [`auth_middleware`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let context = request
        .extensions()
        .get::<AuthContext>()
        .ok_or(AppError::Unauthorized)?;

    if !context.is_admin() {
        tracing::warn!(principal_id = %context.principal_id, "admin route refused");
        return Err(AppError::Forbidden);
    }

    Ok(next.run(request).await)
}
