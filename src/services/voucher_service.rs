//! Voucher service - evaluation and admin management.
//!
//! This service handles:
//! - Voucher evaluation: eligibility checks and discount computation
//! - Admin create / update / deactivate / list
//! - Lazy expiry of vouchers whose end date has passed
//!
//! Evaluation never reserves quota. Callers that consume a voucher must go
//! through [`crate::services::quota_ledger`] inside the unit of work that
//! creates the transaction.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        Paginated,
        voucher::{
            ApplicationType, CreateVoucherRequest, DiscountType, UpdateVoucherRequest, Voucher,
            VoucherApplication, VoucherDetail, VoucherEvaluation, VoucherFilter, VoucherStatus,
            VoucherUsage,
        },
    },
};

const MIN_CODE_LEN: usize = 3;
const MAX_CODE_LEN: usize = 50;

/// Purchase a voucher is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct PurchaseContext {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub category_id: Uuid,
    pub amount: Decimal,
}

/// Voucher codes match case-insensitively; stored codes are uppercase.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Round to the currency's minor unit (2 decimal places, half away from zero).
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute the discount a voucher grants on `amount`.
///
/// - `percentage`: `amount * value / 100`, capped at `max_discount_amount`
/// - `fixed`: `value`, capped at `amount`
///
/// The result is never negative and never larger than `amount`.
pub fn compute_discount(voucher: &Voucher, amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match voucher.discount_type {
        DiscountType::Percentage => {
            let discount = amount * voucher.value / dec!(100);
            match voucher.max_discount_amount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        DiscountType::Fixed => voucher.value.min(amount),
    };

    round_money(raw.max(Decimal::ZERO).min(amount))
}

/// Status and validity window checks, in evaluation order.
///
/// Shared by evaluation and by the quota ledger, which repeats them under the
/// voucher row lock.
pub fn check_availability(voucher: &Voucher, today: NaiveDate) -> Result<(), AppError> {
    match voucher.effective_status(today) {
        VoucherStatus::Active => {}
        VoucherStatus::Expired => return Err(AppError::VoucherExpired),
        // the ledger deactivates vouchers whose quota is used up
        VoucherStatus::Inactive if !voucher.has_quota_left() => {
            return Err(AppError::QuotaExceeded);
        }
        VoucherStatus::Inactive => return Err(AppError::VoucherNotActive),
    }

    if today < voucher.start_date {
        return Err(AppError::VoucherNotStarted);
    }
    if today > voucher.end_date {
        return Err(AppError::VoucherExpired);
    }

    Ok(())
}

/// Whether a voucher's scope covers the product being bought.
pub fn scope_matches(
    application_type: ApplicationType,
    applications: &[VoucherApplication],
    product_id: Uuid,
    category_id: Uuid,
) -> bool {
    let target = match application_type {
        ApplicationType::All => return true,
        ApplicationType::Category => category_id,
        ApplicationType::Product => product_id,
    };

    applications
        .iter()
        .any(|a| a.applicable_type == application_type && a.applicable_id == target)
}

/// Run every eligibility check and compute the discount.
///
/// Checks run in order and the first failure wins: existence, status,
/// validity window, minimum amount, scope, global quota, per-user limit.
///
/// # Errors
///
/// One of the voucher rejection variants (see
/// [`AppError::is_voucher_rejection`]) or a database error.
pub async fn check_voucher(
    pool: &DbPool,
    code: &str,
    purchase: PurchaseContext,
    today: NaiveDate,
) -> Result<(Voucher, Decimal), AppError> {
    let code = normalize_code(code);

    let voucher = sqlx::query_as::<_, Voucher>("SELECT * FROM vouchers WHERE code = $1")
        .bind(&code)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::VoucherNotFound)?;

    check_availability(&voucher, today)?;

    if purchase.amount < voucher.min_transaction_amount {
        return Err(AppError::MinAmountNotMet(voucher.min_transaction_amount));
    }

    if voucher.application_type != ApplicationType::All {
        let applications = sqlx::query_as::<_, VoucherApplication>(
            "SELECT * FROM voucher_applications WHERE voucher_id = $1",
        )
        .bind(voucher.id)
        .fetch_all(pool)
        .await?;

        if !scope_matches(
            voucher.application_type,
            &applications,
            purchase.product_id,
            purchase.category_id,
        ) {
            return Err(AppError::ScopeMismatch);
        }
    }

    if !voucher.has_quota_left() {
        return Err(AppError::QuotaExceeded);
    }

    let user_uses: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM voucher_usages WHERE voucher_id = $1 AND user_id = $2",
    )
    .bind(voucher.id)
    .bind(purchase.user_id)
    .fetch_one(pool)
    .await?;

    if user_uses >= i64::from(voucher.max_uses_per_user) {
        return Err(AppError::UserLimitExceeded);
    }

    let discount = compute_discount(&voucher, purchase.amount);
    Ok((voucher, discount))
}

/// Evaluate a voucher for display before checkout.
///
/// Rejections become `valid: false` results with a reason code; only
/// infrastructure failures are returned as errors.
pub async fn evaluate_voucher(
    pool: &DbPool,
    code: &str,
    purchase: PurchaseContext,
    today: NaiveDate,
) -> Result<VoucherEvaluation, AppError> {
    let normalized = normalize_code(code);

    match check_voucher(pool, &normalized, purchase, today).await {
        Ok((_, discount)) => Ok(VoucherEvaluation {
            valid: true,
            code: normalized,
            discount_amount: discount,
            reason: None,
            message: None,
        }),
        Err(e) if e.is_voucher_rejection() => {
            tracing::debug!(code = %normalized, reason = e.code(), "voucher rejected");
            Ok(VoucherEvaluation {
                valid: false,
                code: normalized,
                discount_amount: Decimal::ZERO,
                reason: Some(e.code()),
                message: Some(e.to_string()),
            })
        }
        Err(e) => Err(e),
    }
}

/// Create a voucher and its scope targets.
///
/// A voucher whose end date is already past is stored as `expired`.
pub async fn create_voucher(
    pool: &DbPool,
    request: CreateVoucherRequest,
    today: NaiveDate,
) -> Result<VoucherDetail, AppError> {
    let code = normalize_code(&request.code);
    validate_code(&code)?;
    validate_terms(&VoucherTerms {
        discount_type: request.discount_type,
        value: request.value,
        min_transaction_amount: request.min_transaction_amount,
        max_discount_amount: request.max_discount_amount,
        quota: request.quota,
        used_count: 0,
        max_uses_per_user: request.max_uses_per_user,
        start_date: request.start_date,
        end_date: request.end_date,
    })?;
    validate_targets(request.application_type, &request.applicable_ids)?;

    let status = if request.end_date < today {
        VoucherStatus::Expired
    } else {
        VoucherStatus::Active
    };

    let mut tx = pool.begin().await?;

    let voucher = sqlx::query_as::<_, Voucher>(
        r#"
        INSERT INTO vouchers (
            code, discount_type, value, description, application_type,
            min_transaction_amount, max_discount_amount, quota, max_uses_per_user,
            start_date, end_date, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(&code)
    .bind(request.discount_type)
    .bind(round_money(request.value))
    .bind(request.description)
    .bind(request.application_type)
    .bind(round_money(request.min_transaction_amount))
    .bind(request.max_discount_amount.map(round_money))
    .bind(request.quota)
    .bind(request.max_uses_per_user)
    .bind(request.start_date)
    .bind(request.end_date)
    .bind(status)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Voucher code {code} already exists")),
        other => other,
    })?;

    let applications = replace_applications(
        &mut tx,
        voucher.id,
        request.application_type,
        &request.applicable_ids,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(voucher_id = %voucher.id, code = %voucher.code, "voucher created");

    Ok(VoucherDetail {
        voucher,
        applications,
    })
}

/// Apply an admin edit under the voucher row lock.
///
/// Status is recomputed on write: past end date → `expired`, exhausted quota
/// → `inactive`. The quota can never drop below the current `used_count`.
pub async fn update_voucher(
    pool: &DbPool,
    voucher_id: Uuid,
    request: UpdateVoucherRequest,
    today: NaiveDate,
) -> Result<VoucherDetail, AppError> {
    let mut tx = pool.begin().await?;

    let current =
        sqlx::query_as::<_, Voucher>("SELECT * FROM vouchers WHERE id = $1 FOR UPDATE")
            .bind(voucher_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::VoucherNotFound)?;

    let terms = VoucherTerms {
        discount_type: current.discount_type,
        value: request.value.unwrap_or(current.value),
        min_transaction_amount: request
            .min_transaction_amount
            .unwrap_or(current.min_transaction_amount),
        max_discount_amount: request
            .max_discount_amount
            .unwrap_or(current.max_discount_amount),
        quota: request.quota.unwrap_or(current.quota),
        used_count: current.used_count,
        max_uses_per_user: request.max_uses_per_user.unwrap_or(current.max_uses_per_user),
        start_date: request.start_date.unwrap_or(current.start_date),
        end_date: request.end_date.unwrap_or(current.end_date),
    };
    validate_terms(&terms)?;

    let application_type = request.application_type.unwrap_or(current.application_type);
    if request.application_type.is_some() || request.applicable_ids.is_some() {
        let ids = request.applicable_ids.clone().unwrap_or_default();
        validate_targets(application_type, &ids)?;
    }

    let requested = request.status.unwrap_or(current.status);
    if requested == VoucherStatus::Expired && terms.end_date >= today {
        return Err(AppError::ValidationFailed(
            "A voucher can only be expired by its end date".to_string(),
        ));
    }
    let status = resolve_status(requested, &terms, today);

    let voucher = sqlx::query_as::<_, Voucher>(
        r#"
        UPDATE vouchers
        SET value = $2,
            description = COALESCE($3, description),
            application_type = $4,
            min_transaction_amount = $5,
            max_discount_amount = $6,
            quota = $7,
            max_uses_per_user = $8,
            start_date = $9,
            end_date = $10,
            status = $11,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(voucher_id)
    .bind(round_money(terms.value))
    .bind(request.description)
    .bind(application_type)
    .bind(round_money(terms.min_transaction_amount))
    .bind(terms.max_discount_amount.map(round_money))
    .bind(terms.quota)
    .bind(terms.max_uses_per_user)
    .bind(terms.start_date)
    .bind(terms.end_date)
    .bind(status)
    .fetch_one(&mut *tx)
    .await?;

    let applications = match request.applicable_ids {
        Some(ids) => replace_applications(&mut tx, voucher_id, application_type, &ids).await?,
        None if application_type == ApplicationType::All => {
            replace_applications(&mut tx, voucher_id, application_type, &[]).await?
        }
        None => load_applications(&mut tx, voucher_id).await?,
    };

    tx.commit().await?;

    tracing::info!(voucher_id = %voucher.id, status = %voucher.status, "voucher updated");

    Ok(VoucherDetail {
        voucher,
        applications,
    })
}

/// Soft delete: the voucher becomes `inactive`; its usages stay intact.
pub async fn deactivate_voucher(pool: &DbPool, voucher_id: Uuid) -> Result<Voucher, AppError> {
    let voucher = sqlx::query_as::<_, Voucher>(
        r#"
        UPDATE vouchers
        SET status = CASE WHEN status = 'expired' THEN status ELSE 'inactive'::voucher_status END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(voucher_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::VoucherNotFound)?;

    tracing::info!(voucher_id = %voucher.id, "voucher deactivated");
    Ok(voucher)
}

/// Persist lazy expiry for every voucher whose end date has passed.
///
/// Returns the number of vouchers flipped to `expired`.
pub async fn expire_past_vouchers(pool: &DbPool, today: NaiveDate) -> Result<u64, AppError> {
    let expired = sqlx::query(
        r#"
        UPDATE vouchers
        SET status = 'expired', updated_at = NOW()
        WHERE end_date < $1 AND status <> 'expired'
        "#,
    )
    .bind(today)
    .execute(pool)
    .await?
    .rows_affected();

    if expired > 0 {
        tracing::info!(expired, "vouchers expired");
    }

    Ok(expired)
}

pub async fn get_voucher(
    pool: &DbPool,
    voucher_id: Uuid,
    today: NaiveDate,
) -> Result<VoucherDetail, AppError> {
    expire_past_vouchers(pool, today).await?;

    let voucher = sqlx::query_as::<_, Voucher>("SELECT * FROM vouchers WHERE id = $1")
        .bind(voucher_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::VoucherNotFound)?;

    let applications = sqlx::query_as::<_, VoucherApplication>(
        "SELECT * FROM voucher_applications WHERE voucher_id = $1 ORDER BY created_at",
    )
    .bind(voucher_id)
    .fetch_all(pool)
    .await?;

    Ok(VoucherDetail {
        voucher,
        applications,
    })
}

/// List vouchers, newest first, optionally filtered by status.
pub async fn list_vouchers(
    pool: &DbPool,
    filter: &VoucherFilter,
    today: NaiveDate,
) -> Result<Paginated<Voucher>, AppError> {
    expire_past_vouchers(pool, today).await?;

    let page = filter.page_request();

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM vouchers WHERE ($1::voucher_status IS NULL OR status = $1)")
            .bind(filter.status)
            .fetch_one(pool)
            .await?;

    let vouchers = sqlx::query_as::<_, Voucher>(
        r#"
        SELECT * FROM vouchers
        WHERE ($1::voucher_status IS NULL OR status = $1)
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(filter.status)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(Paginated::new(vouchers, page, total))
}

/// Redemption history of a voucher, newest first.
pub async fn list_usages(pool: &DbPool, voucher_id: Uuid) -> Result<Vec<VoucherUsage>, AppError> {
    let usages = sqlx::query_as::<_, VoucherUsage>(
        "SELECT * FROM voucher_usages WHERE voucher_id = $1 ORDER BY used_at DESC",
    )
    .bind(voucher_id)
    .fetch_all(pool)
    .await?;

    Ok(usages)
}

/// The editable terms of a voucher, validated together.
struct VoucherTerms {
    discount_type: DiscountType,
    value: Decimal,
    min_transaction_amount: Decimal,
    max_discount_amount: Option<Decimal>,
    quota: i32,
    used_count: i32,
    max_uses_per_user: i32,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

fn validate_code(code: &str) -> Result<(), AppError> {
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len()) || !valid_chars {
        return Err(AppError::ValidationFailed(format!(
            "Voucher code must be {MIN_CODE_LEN}-{MAX_CODE_LEN} letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

fn validate_terms(terms: &VoucherTerms) -> Result<(), AppError> {
    let invalid = |msg: &str| Err(AppError::ValidationFailed(msg.to_string()));

    if terms.value <= Decimal::ZERO {
        return invalid("Voucher value must be positive");
    }
    if terms.discount_type == DiscountType::Percentage && terms.value > dec!(100) {
        return invalid("Percentage value cannot exceed 100");
    }
    if terms.min_transaction_amount < Decimal::ZERO {
        return invalid("Minimum transaction amount cannot be negative");
    }
    if terms.max_discount_amount.is_some_and(|cap| cap <= Decimal::ZERO) {
        return invalid("Maximum discount must be positive");
    }
    if terms.quota < 1 {
        return invalid("Quota must be at least 1");
    }
    if terms.quota < terms.used_count {
        return invalid("Quota cannot be lower than the number of redemptions so far");
    }
    if terms.max_uses_per_user < 1 {
        return invalid("Max uses per user must be at least 1");
    }
    if terms.start_date > terms.end_date {
        return invalid("Start date must not be after end date");
    }
    Ok(())
}

fn validate_targets(application_type: ApplicationType, ids: &[Uuid]) -> Result<(), AppError> {
    match (application_type, ids.is_empty()) {
        (ApplicationType::All, false) => Err(AppError::ValidationFailed(
            "Vouchers that apply to all products take no targets".to_string(),
        )),
        (ApplicationType::Category | ApplicationType::Product, true) => Err(
            AppError::ValidationFailed("Scoped vouchers need at least one target".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Status after an edit: expiry wins, then an exhausted quota forces
/// `inactive`; otherwise the requested status stands.
fn resolve_status(requested: VoucherStatus, terms: &VoucherTerms, today: NaiveDate) -> VoucherStatus {
    if terms.end_date < today {
        VoucherStatus::Expired
    } else if terms.used_count >= terms.quota {
        VoucherStatus::Inactive
    } else if requested == VoucherStatus::Expired {
        // end date moved into the future
        VoucherStatus::Active
    } else {
        requested
    }
}

async fn replace_applications(
    conn: &mut PgConnection,
    voucher_id: Uuid,
    application_type: ApplicationType,
    ids: &[Uuid],
) -> Result<Vec<VoucherApplication>, AppError> {
    sqlx::query("DELETE FROM voucher_applications WHERE voucher_id = $1")
        .bind(voucher_id)
        .execute(&mut *conn)
        .await?;

    let mut applications = Vec::with_capacity(ids.len());
    if application_type == ApplicationType::All {
        return Ok(applications);
    }

    for id in ids {
        let application = sqlx::query_as::<_, VoucherApplication>(
            r#"
            INSERT INTO voucher_applications (voucher_id, applicable_id, applicable_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (voucher_id, applicable_type, applicable_id) DO UPDATE
            SET applicable_id = EXCLUDED.applicable_id
            RETURNING *
            "#,
        )
        .bind(voucher_id)
        .bind(id)
        .bind(application_type)
        .fetch_one(&mut *conn)
        .await?;
        applications.push(application);
    }

    Ok(applications)
}

async fn load_applications(
    conn: &mut PgConnection,
    voucher_id: Uuid,
) -> Result<Vec<VoucherApplication>, AppError> {
    let applications = sqlx::query_as::<_, VoucherApplication>(
        "SELECT * FROM voucher_applications WHERE voucher_id = $1 ORDER BY created_at",
    )
    .bind(voucher_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(applications)
}
