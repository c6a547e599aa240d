//! Transaction service - checkout orchestration and transaction queries.
//!
//! This service handles:
//! - Input validation and normalization (game account, WhatsApp number)
//! - Pricing: product price + payment fee - voucher discount
//! - The create unit of work: transaction row, creation log, voucher usage
//! - Post-commit payment link and customer notification
//! - Owner-scoped and admin transaction queries
//! - Customer cancellation of a pending transaction
//!
//! # Atomicity Guarantees
//!
//! The transaction row, its creation log row and the voucher usage are
//! written in one PostgreSQL transaction. A voucher rejected under the row
//! lock rolls back the whole purchase.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgConnection, types::Json};
use uuid::Uuid;

use crate::{
    db::{self, DbPool},
    error::AppError,
    models::{
        Paginated,
        product::Product,
        transaction::{
            CreateTransactionRequest, CreatedTransactionResponse, GameAccountData, PaymentMethod,
            PaymentStatus, Transaction, TransactionFilter, TransactionLog, TransactionResponse,
            TransactionStatus,
        },
        voucher::Voucher,
    },
    services::{
        catalog_service, messaging,
        payment_gateway::{PaymentNotification, PaymentRequest},
        quota_ledger::{self, Reservation},
        state_machine::{self, PaymentUpdate, TransitionRequest},
        voucher_service::{self, PurchaseContext},
    },
    state::AppState,
};

const CODE_PREFIX: &str = "TXN";
const CODE_LENGTH: usize = 10;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Fresh codes tried before giving up on a checkout.
const CODE_ATTEMPTS: usize = 5;

const MAX_GAME_FIELD_LEN: usize = 100;
const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

/// Request metadata stored with a new transaction.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Price breakdown of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub product_price: Decimal,
    pub payment_fee: Decimal,
    pub voucher_discount: Decimal,
    pub total_amount: Decimal,
}

impl Pricing {
    /// `total = price + fee - discount`, rounded to minor units.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed`: a negative component or a negative total
    pub fn compute(price: Decimal, fee: Decimal, discount: Decimal) -> Result<Self, AppError> {
        let product_price = voucher_service::round_money(price);
        let payment_fee = voucher_service::round_money(fee);
        let voucher_discount = voucher_service::round_money(discount);

        if product_price.is_sign_negative()
            || payment_fee.is_sign_negative()
            || voucher_discount.is_sign_negative()
        {
            return Err(AppError::ValidationFailed(
                "Price components cannot be negative".to_string(),
            ));
        }

        let total_amount = product_price + payment_fee - voucher_discount;
        if total_amount.is_sign_negative() {
            return Err(AppError::ValidationFailed(
                "Total amount cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            product_price,
            payment_fee,
            voucher_discount,
            total_amount,
        })
    }
}

/// Normalize an Indonesian WhatsApp number to its `62…` form.
///
/// # Rules
///
/// - Spaces, `-`, `(`, `)` and `+` are stripped
/// - 10 to 15 digits remain
/// - Prefix `08` → `628…`, `62` kept, bare `8` → `628…`
pub fn normalize_whatsapp(raw: &str) -> Result<String, AppError> {
    let invalid = || {
        AppError::ValidationFailed(
            "WhatsApp number must be 10-15 digits starting with 08, 62 or 8".to_string(),
        )
    };

    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '+'))
        .collect();

    if !digits.chars().all(|c| c.is_ascii_digit())
        || !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
    {
        return Err(invalid());
    }

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        if !rest.starts_with('8') {
            return Err(invalid());
        }
        format!("62{rest}")
    } else if digits.starts_with("62") {
        digits
    } else if digits.starts_with('8') {
        format!("62{digits}")
    } else {
        return Err(invalid());
    };

    if normalized.len() > MAX_PHONE_DIGITS {
        return Err(invalid());
    }

    Ok(normalized)
}

/// Trim the game account snapshot and drop empty optional fields.
pub fn validate_game_account(data: GameAccountData) -> Result<GameAccountData, AppError> {
    let clean = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let game_account = data.game_account.trim().to_string();
    if game_account.is_empty() {
        return Err(AppError::ValidationFailed(
            "Game account is required".to_string(),
        ));
    }

    let snapshot = GameAccountData {
        game_account,
        game_zone: clean(data.game_zone),
        game_server: clean(data.game_server),
        nickname: clean(data.nickname),
    };

    let too_long = [
        Some(&snapshot.game_account),
        snapshot.game_zone.as_ref(),
        snapshot.game_server.as_ref(),
        snapshot.nickname.as_ref(),
    ]
    .into_iter()
    .flatten()
    .any(|v| v.chars().count() > MAX_GAME_FIELD_LEN);

    if too_long {
        return Err(AppError::ValidationFailed(format!(
            "Game account fields are limited to {MAX_GAME_FIELD_LEN} characters"
        )));
    }

    Ok(snapshot)
}

/// `TXN` followed by 10 uppercase letters or digits.
pub fn generate_transaction_code() -> String {
    let suffix: String = (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rand::random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{CODE_PREFIX}{suffix}")
}

/// Create a topup transaction.
///
/// # Process
///
/// 1. Validate game account and WhatsApp number
/// 2. Load the product from the database (`ProductNotFound` / `ProductInactive`)
/// 3. Evaluate the voucher, if any, against the product price
/// 4. In one unit of work, retried on lock contention:
///    insert the transaction, write the creation log, reserve the voucher
/// 5. After commit: request a payment link and send the notification.
///    Failures here are logged and never fail the request.
///
/// # Errors
///
/// - `ValidationFailed`: malformed input
/// - `ProductNotFound`, `ProductInactive`
/// - Any voucher rejection (`QuotaExceeded`, `ScopeMismatch`, ...)
/// - `ConflictingUpdate`: the voucher row stayed locked through every retry
pub async fn create_transaction(
    state: &AppState,
    user_id: Uuid,
    request: CreateTransactionRequest,
    meta: ClientMeta,
) -> Result<CreatedTransactionResponse, AppError> {
    // Validate input
    let snapshot = validate_game_account(request.game_account)?;
    let whatsapp = normalize_whatsapp(&request.whatsapp)?;

    let product = catalog_service::load_product_for_purchase(&state.pool, request.product_id).await?;

    let now = Utc::now();
    let today = now.date_naive();

    // Evaluate voucher against the product price
    let voucher_code = request
        .voucher_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let voucher: Option<(Voucher, Decimal)> = match voucher_code {
        Some(code) => {
            let purchase = PurchaseContext {
                user_id,
                product_id: product.id,
                category_id: product.category_id,
                amount: product.price,
            };
            Some(voucher_service::check_voucher(&state.pool, code, purchase, today).await?)
        }
        None => None,
    };

    let fee = state.config.fee_schedule.fee_for(request.payment_method);
    let discount = voucher.as_ref().map_or(Decimal::ZERO, |(_, d)| *d);
    let pricing = Pricing::compute(product.price, fee, discount)?;

    let draft = Draft {
        user_id,
        product_id: product.id,
        snapshot,
        pricing,
        payment_method: request.payment_method,
        whatsapp,
        expired_at: now + state.config.transaction_expiry(),
        meta,
    };

    let pool = &state.pool;
    let policy = state.config.lock_policy();
    let draft = &draft;
    let voucher = voucher.as_ref();

    let transaction = db::with_retry(policy, move || async move {
        let mut tx = db::begin_locked(pool, policy).await?;

        let transaction = insert_transaction(&mut *tx, draft, generate_transaction_code).await?;

        let metadata = json!({
            "payment_method": draft.payment_method,
            "voucher_code": voucher.map(|(v, _)| v.code.as_str()),
            "voucher_discount": draft.pricing.voucher_discount,
        });
        state_machine::record_creation(&mut *tx, &transaction, Some(metadata)).await?;

        // Re-verifies the voucher under its row lock
        if let Some((voucher, discount)) = voucher {
            let reservation = Reservation {
                voucher_id: voucher.id,
                user_id: draft.user_id,
                transaction_id: transaction.id,
                discount_amount: *discount,
            };
            quota_ledger::reserve_usage(&mut *tx, reservation, today).await?;
        }

        tx.commit().await?;
        Ok(transaction)
    })
    .await?;

    tracing::info!(
        transaction_code = %transaction.transaction_code,
        user_id = %user_id,
        product_id = %product.id,
        total_amount = %transaction.total_amount,
        voucher = ?voucher.map(|(v, _)| &v.code),
        "transaction created"
    );

    // Post-commit side effects
    let transaction = attach_payment_link(state, transaction).await;
    let payment_url_pending = transaction.payment_url.is_none();
    notify_customer(state, &transaction, &product);

    Ok(CreatedTransactionResponse {
        transaction: TransactionResponse::from(transaction),
        payment_url_pending,
    })
}

/// Fetch a transaction. `owner` restricts the lookup to that user's
/// transactions; admins pass `None`.
pub async fn get_transaction(
    pool: &DbPool,
    transaction_id: Uuid,
    owner: Option<Uuid>,
) -> Result<Transaction, AppError> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)",
    )
    .bind(transaction_id)
    .bind(owner)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::TransactionNotFound)
}

/// List transactions newest first. `owner` restricts to one user.
pub async fn list_transactions(
    pool: &DbPool,
    owner: Option<Uuid>,
    filter: &TransactionFilter,
) -> Result<Paginated<Transaction>, AppError> {
    let page = filter.page_request();

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM transactions
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::transaction_status IS NULL OR status = $2)
          AND ($3::payment_status IS NULL OR payment_status = $3)
        "#,
    )
    .bind(owner)
    .bind(filter.status)
    .bind(filter.payment_status)
    .fetch_one(pool)
    .await?;

    let transactions = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::transaction_status IS NULL OR status = $2)
          AND ($3::payment_status IS NULL OR payment_status = $3)
        ORDER BY created_at DESC, id
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(owner)
    .bind(filter.status)
    .bind(filter.payment_status)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(Paginated::new(transactions, page, total))
}

/// Audit trail of a transaction, oldest first.
pub async fn list_logs(
    pool: &DbPool,
    transaction_id: Uuid,
    owner: Option<Uuid>,
) -> Result<Vec<TransactionLog>, AppError> {
    // Ownership check
    get_transaction(pool, transaction_id, owner).await?;
    state_machine::list_logs(pool, transaction_id).await
}

/// Cancel one of the caller's own transactions.
///
/// Customers may only cancel while the transaction is still pending. The
/// move goes through the state machine like any other, with no admin
/// recorded on the log row. Payment status is left as it is; a voucher
/// redemption is not given back.
///
/// # Errors
///
/// - `TransactionNotFound`: unknown id or owned by someone else
/// - `InvalidState`: the transaction has left `pending`
/// - `ConflictingUpdate`
pub async fn cancel_transaction(
    state: &AppState,
    transaction_id: Uuid,
    owner: Uuid,
) -> Result<Transaction, AppError> {
    let pool = &state.pool;
    let policy = state.config.lock_policy();
    let request = TransitionRequest::new(TransactionStatus::Cancelled)
        .with_message("Cancelled by customer")
        .with_metadata(json!({ "cancelled_by": "customer" }));
    let request = &request;

    db::with_retry(policy, move || async move {
        let mut tx = db::begin_locked(pool, policy).await?;
        let current = state_machine::lock_transaction(&mut *tx, transaction_id).await?;

        if current.user_id != owner {
            return Err(AppError::TransactionNotFound);
        }
        if current.status != TransactionStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "Transaction {} can only be cancelled while pending",
                current.transaction_code
            )));
        }

        let cancelled = state_machine::apply_transition(&mut *tx, current, request).await?;
        tx.commit().await?;
        Ok(cancelled)
    })
    .await
}

/// Request a payment link for a pending transaction that has none yet.
///
/// Unlike checkout, a gateway failure here is returned to the caller.
///
/// # Errors
///
/// - `TransactionNotFound`
/// - `InvalidState`: transaction or payment no longer pending
/// - `DependencyFailure`: gateway unreachable or timed out
pub async fn retry_payment_url(state: &AppState, transaction_id: Uuid) -> Result<Transaction, AppError> {
    let transaction = get_transaction(&state.pool, transaction_id, None).await?;

    if transaction.payment_url.is_some() {
        return Ok(transaction);
    }
    if transaction.status != TransactionStatus::Pending
        || transaction.payment_status != PaymentStatus::Pending
    {
        return Err(AppError::InvalidState(format!(
            "Transaction {} is no longer awaiting payment",
            transaction.transaction_code
        )));
    }

    let request = request_payment(state, &transaction).await?;
    let updated = match store_payment_link(&state.pool, transaction.id, &request).await? {
        Some(updated) => updated,
        // another caller stored a link first
        None => get_transaction(&state.pool, transaction_id, None).await?,
    };

    tracing::info!(transaction_code = %updated.transaction_code, "payment link backfilled");
    Ok(updated)
}

/// Apply a verified gateway notification.
///
/// # Errors
///
/// - `ValidationFailed`: unknown gateway status
/// - `TransactionNotFound`: no transaction with that code
/// - `IllegalTransition`: the payment edge is not allowed
pub async fn apply_payment_notification(
    state: &AppState,
    notification: PaymentNotification,
) -> Result<Transaction, AppError> {
    let status = notification.payment_status().ok_or_else(|| {
        AppError::ValidationFailed(format!(
            "Unknown payment status `{}`",
            notification.transaction_status
        ))
    })?;

    let transaction_id: Uuid =
        sqlx::query_scalar("SELECT id FROM transactions WHERE transaction_code = $1")
            .bind(&notification.order_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or(AppError::TransactionNotFound)?;

    state_machine::update_payment_status(
        &state.pool,
        state.config.lock_policy(),
        transaction_id,
        PaymentUpdate {
            status,
            reference: notification.transaction_id,
        },
    )
    .await
}

/// Validated transaction fields ready to insert.
struct Draft {
    user_id: Uuid,
    product_id: Uuid,
    snapshot: GameAccountData,
    pricing: Pricing,
    payment_method: PaymentMethod,
    whatsapp: String,
    expired_at: DateTime<Utc>,
    meta: ClientMeta,
}

/// Insert the transaction row under a fresh code.
///
/// A code already taken is skipped with `ON CONFLICT DO NOTHING`, which keeps
/// the surrounding unit of work usable, and the next code is tried.
async fn insert_transaction(
    conn: &mut PgConnection,
    draft: &Draft,
    mut next_code: impl FnMut() -> String,
) -> Result<Transaction, AppError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = next_code();

        let inserted = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (
                transaction_code, user_id, product_id, game_account_data,
                product_price, payment_fee, voucher_discount, total_amount,
                payment_method, whatsapp, expired_at, user_agent, ip_address
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (transaction_code) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&code)
        .bind(draft.user_id)
        .bind(draft.product_id)
        .bind(Json(&draft.snapshot))
        .bind(draft.pricing.product_price)
        .bind(draft.pricing.payment_fee)
        .bind(draft.pricing.voucher_discount)
        .bind(draft.pricing.total_amount)
        .bind(draft.payment_method)
        .bind(&draft.whatsapp)
        .bind(draft.expired_at)
        .bind(draft.meta.user_agent.as_deref())
        .bind(draft.meta.ip_address.as_deref())
        .fetch_optional(&mut *conn)
        .await?;

        match inserted {
            Some(transaction) => return Ok(transaction),
            None => tracing::warn!(transaction_code = %code, "transaction code taken, regenerating"),
        }
    }

    Err(AppError::Conflict(
        "Could not allocate a unique transaction code".to_string(),
    ))
}

/// Call the gateway, bounded by the outbound timeout.
async fn request_payment(state: &AppState, transaction: &Transaction) -> Result<PaymentRequest, AppError> {
    let call = state.payment_gateway.create_payment_request(
        &transaction.transaction_code,
        transaction.total_amount,
        transaction.payment_method,
    );

    tokio::time::timeout(state.config.outbound_timeout(), call)
        .await
        .map_err(|_| AppError::DependencyFailure("payment gateway timed out".to_string()))?
}

/// Best-effort payment link after commit. On failure the transaction is
/// returned unchanged and the link can be backfilled later.
async fn attach_payment_link(state: &AppState, transaction: Transaction) -> Transaction {
    let request = match request_payment(state, &transaction).await {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(
                transaction_code = %transaction.transaction_code,
                error = %e,
                "payment link unavailable, left pending"
            );
            return transaction;
        }
    };

    match store_payment_link(&state.pool, transaction.id, &request).await {
        Ok(Some(updated)) => updated,
        Ok(None) => transaction,
        Err(e) => {
            tracing::error!(
                transaction_code = %transaction.transaction_code,
                error = %e,
                "failed to store payment link"
            );
            transaction
        }
    }
}

/// Store a payment link unless one is already present.
async fn store_payment_link(
    pool: &DbPool,
    transaction_id: Uuid,
    request: &PaymentRequest,
) -> Result<Option<Transaction>, AppError> {
    let updated = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET payment_url = $2,
            payment_reference = COALESCE(payment_reference, $3),
            updated_at = NOW()
        WHERE id = $1 AND payment_url IS NULL
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(&request.payment_url)
    .bind(request.reference.as_deref())
    .fetch_optional(pool)
    .await?;

    Ok(updated)
}

/// Fire-and-forget order confirmation over WhatsApp.
fn notify_customer(state: &AppState, transaction: &Transaction, product: &Product) {
    let messenger = state.messenger.clone();
    let timeout = state.config.outbound_timeout();
    let phone = transaction.whatsapp.clone();
    let code = transaction.transaction_code.clone();
    let message = messaging::order_created_message(transaction, &product.name);

    tokio::spawn(async move {
        match tokio::time::timeout(timeout, messenger.notify(&phone, &message)).await {
            Ok(Ok(())) => tracing::debug!(transaction_code = %code, "customer notified"),
            Ok(Err(e)) => {
                tracing::warn!(transaction_code = %code, error = %e, "customer notification failed")
            }
            Err(_) => tracing::warn!(transaction_code = %code, "customer notification timed out"),
        }
    });
}
