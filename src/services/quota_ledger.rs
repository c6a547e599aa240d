//! Quota ledger - atomic voucher usage recording.
//!
//! A reservation locks the voucher row, re-checks every precondition under the
//! lock, writes the usage row and bumps `used_count` in the caller's unit of
//! work. Concurrent reservations for the same voucher serialize on the row
//! lock, so `used_count` can never pass `quota`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::voucher::{Voucher, VoucherStatus, VoucherUsage},
    services::voucher_service,
};

/// A voucher redemption to record.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub voucher_id: Uuid,
    pub user_id: Uuid,
    pub transaction_id: Uuid,
    pub discount_amount: Decimal,
}

/// Record a voucher usage inside an open transaction.
///
/// # Process
///
/// 1. Lock the voucher row (`FOR UPDATE`)
/// 2. Check status and validity window
/// 3. Check the global quota
/// 4. Check the per-user limit
/// 5. Insert the usage row
/// 6. Increment `used_count`
/// 7. Flip the voucher to `inactive` once the quota is used up
///
/// Nothing is committed here. Any error leaves the caller's transaction to be
/// rolled back.
///
/// # Errors
///
/// - `VoucherNotFound`, `VoucherExpired`, `VoucherNotActive`, `VoucherNotStarted`
/// - `QuotaExceeded`: `used_count` already reached `quota`
/// - `UserLimitExceeded`: user already redeemed it `max_uses_per_user` times
/// - `LockContention`: the row lock wait timed out
pub async fn reserve_usage(
    conn: &mut PgConnection,
    reservation: Reservation,
    today: NaiveDate,
) -> Result<VoucherUsage, AppError> {
    let voucher = sqlx::query_as::<_, Voucher>("SELECT * FROM vouchers WHERE id = $1 FOR UPDATE")
        .bind(reservation.voucher_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::VoucherNotFound)?;

    voucher_service::check_availability(&voucher, today)?;

    if !voucher.has_quota_left() {
        return Err(AppError::QuotaExceeded);
    }

    let user_uses: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM voucher_usages WHERE voucher_id = $1 AND user_id = $2",
    )
    .bind(voucher.id)
    .bind(reservation.user_id)
    .fetch_one(&mut *conn)
    .await?;

    if user_uses >= i64::from(voucher.max_uses_per_user) {
        return Err(AppError::UserLimitExceeded);
    }

    let usage = sqlx::query_as::<_, VoucherUsage>(
        r#"
        INSERT INTO voucher_usages (voucher_id, user_id, transaction_id, discount_amount)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(voucher.id)
    .bind(reservation.user_id)
    .bind(reservation.transaction_id)
    .bind(reservation.discount_amount)
    .fetch_one(&mut *conn)
    .await?;

    let used_count = voucher.used_count + 1;
    let status = if used_count >= voucher.quota {
        VoucherStatus::Inactive
    } else {
        voucher.status
    };

    sqlx::query(
        r#"
        UPDATE vouchers
        SET used_count = $2, status = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(voucher.id)
    .bind(used_count)
    .bind(status)
    .execute(&mut *conn)
    .await?;

    tracing::info!(
        voucher_id = %voucher.id,
        user_id = %reservation.user_id,
        transaction_id = %reservation.transaction_id,
        used_count,
        quota = voucher.quota,
        "voucher usage recorded"
    );

    if status == VoucherStatus::Inactive {
        tracing::info!(voucher_id = %voucher.id, "voucher quota exhausted");
    }

    Ok(usage)
}
