//! Transaction state machine.
//!
//! The only code that writes `transactions.status` and `transactions.payment_status`.
//!
//! # Processing Status Graph
//!
//! ```text
//! pending ──► processing ──► completed
//!    │            │
//!    ├────────────┴──► failed
//!    └────────────┴──► cancelled
//!
//! pending ──► completed          (instant-fulfillment products only)
//! ```
//!
//! `completed`, `failed` and `cancelled` are terminal.
//!
//! # Payment Status Graph
//!
//! ```text
//! pending ──► paid ──► refunded
//!    ├──► failed
//!    └──► expired
//! ```
//!
//! Every transition locks the transaction row, writes the new status, appends
//! exactly one log row and stamps `processed_at` / `completed_at` on first
//! entry, all in one unit of work.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::{self, DbPool, LockPolicy},
    error::AppError,
    models::transaction::{PaymentStatus, Transaction, TransactionLog, TransactionStatus},
};

/// Message written to the log row when the expiry sweep fails a transaction.
pub const EXPIRED_MESSAGE: &str = "expired";

/// Whether `from → to` is an edge of the processing status graph.
///
/// `pending → completed` is legal only for instant-fulfillment products.
pub fn is_legal_transition(
    from: TransactionStatus,
    to: TransactionStatus,
    instant_fulfillment: bool,
) -> bool {
    use TransactionStatus::*;

    if from.is_terminal() {
        return false;
    }

    match (from, to) {
        (Pending, Processing) => true,
        (Pending, Completed) => instant_fulfillment,
        (Pending | Processing, Failed | Cancelled) => true,
        (Processing, Completed) => true,
        _ => false,
    }
}

/// Whether `from → to` is an edge of the payment status graph.
pub fn is_legal_payment_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;

    matches!(
        (from, to),
        (Pending, Paid | Failed | Expired) | (Paid, Refunded)
    )
}

/// A requested processing status change.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub status: TransactionStatus,
    pub message: Option<String>,
    pub admin_id: Option<Uuid>,
    pub metadata: Option<Value>,
}

impl TransitionRequest {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            status,
            message: None,
            admin_id: None,
            metadata: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn by_admin(mut self, admin_id: Uuid) -> Self {
        self.admin_id = Some(admin_id);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A payment status change reported by the gateway.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub reference: Option<String>,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Default, Serialize)]
pub struct ExpirySummary {
    pub expired: usize,
    pub skipped: usize,
    pub transaction_codes: Vec<String>,
}

/// Lock a transaction row for the rest of the unit of work.
pub async fn lock_transaction(conn: &mut PgConnection, id: Uuid) -> Result<Transaction, AppError> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::TransactionNotFound)
}

/// Apply a transition to an already locked transaction.
///
/// # Process
///
/// 1. Same status → no-op, no log row, the current row is returned
/// 2. Check the edge (looks up the product only for `pending → completed`)
/// 3. Write the status and first-entry timestamps
/// 4. Append the log row
///
/// # Errors
///
/// - `IllegalTransition`: the edge is not in the graph
pub async fn apply_transition(
    conn: &mut PgConnection,
    current: Transaction,
    request: &TransitionRequest,
) -> Result<Transaction, AppError> {
    let from = current.status;
    let to = request.status;

    if from == to {
        tracing::debug!(
            transaction_code = %current.transaction_code,
            status = %to,
            "transition to current status ignored"
        );
        return Ok(current);
    }

    let instant = if from == TransactionStatus::Pending && to == TransactionStatus::Completed {
        is_instant_fulfillment(conn, current.product_id).await?
    } else {
        false
    };

    if !is_legal_transition(from, to, instant) {
        return Err(AppError::illegal_transition(from, to));
    }

    let now = Utc::now();
    let (processed_at, completed_at) = stamp_first_entry(&current, to, now);

    let updated = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $2,
            processed_at = $3,
            completed_at = $4,
            updated_at = $5
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(current.id)
    .bind(to)
    .bind(processed_at)
    .bind(completed_at)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let message = request
        .message
        .clone()
        .unwrap_or_else(|| format!("Status changed from {from} to {to}"));

    append_log(
        conn,
        updated.id,
        Some(from),
        to,
        &message,
        request.metadata.clone(),
        request.admin_id,
    )
    .await?;

    tracing::info!(
        transaction_code = %updated.transaction_code,
        from = %from,
        to = %to,
        admin_id = ?request.admin_id,
        "transaction status changed"
    );

    Ok(updated)
}

/// Lock and transition a transaction inside an open unit of work.
pub async fn transition_in(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    request: &TransitionRequest,
) -> Result<Transaction, AppError> {
    let current = lock_transaction(conn, transaction_id).await?;
    apply_transition(conn, current, request).await
}

/// Transition a transaction in its own unit of work, retried on lock contention.
///
/// # Errors
///
/// - `TransactionNotFound`
/// - `IllegalTransition`
/// - `ConflictingUpdate`: the row stayed locked through every retry
pub async fn transition(
    pool: &DbPool,
    policy: LockPolicy,
    transaction_id: Uuid,
    request: TransitionRequest,
) -> Result<Transaction, AppError> {
    let request = &request;

    db::with_retry(policy, move || async move {
        let mut tx = db::begin_locked(pool, policy).await?;
        let updated = transition_in(&mut *tx, transaction_id, request).await?;
        tx.commit().await?;
        Ok(updated)
    })
    .await
}

/// Write the creation log row for a freshly inserted transaction.
pub async fn record_creation(
    conn: &mut PgConnection,
    transaction: &Transaction,
    metadata: Option<Value>,
) -> Result<TransactionLog, AppError> {
    append_log(
        conn,
        transaction.id,
        None,
        transaction.status,
        "Transaction created",
        metadata,
        None,
    )
    .await
}

/// Apply a gateway payment notification.
///
/// # Process
///
/// 1. Lock the transaction row
/// 2. Same payment status → no-op
/// 3. Check the payment edge, write payment status and reference
/// 4. Drive the processing status:
///    - `paid` on a `pending` transaction → `processing`, or `completed` for
///      instant-fulfillment products
///    - `failed` / `expired` on a `pending` transaction → `failed`
///
/// The payment change is recorded in the metadata of the log row of the
/// transition it drives. A change that drives nothing writes no log row.
///
/// # Errors
///
/// - `TransactionNotFound`
/// - `IllegalTransition`: the payment edge is not in the graph
/// - `ConflictingUpdate`
pub async fn update_payment_status(
    pool: &DbPool,
    policy: LockPolicy,
    transaction_id: Uuid,
    update: PaymentUpdate,
) -> Result<Transaction, AppError> {
    let update = &update;

    db::with_retry(policy, move || async move {
        let mut tx = db::begin_locked(pool, policy).await?;
        let current = lock_transaction(&mut *tx, transaction_id).await?;

        let from = current.payment_status;
        let to = update.status;
        if from == to {
            return Ok(current);
        }
        if !is_legal_payment_transition(from, to) {
            return Err(AppError::IllegalTransition {
                from: format!("payment {from}"),
                to: format!("payment {to}"),
            });
        }

        let current = set_payment_status(&mut *tx, current.id, to, update.reference.as_deref()).await?;
        tracing::info!(
            transaction_code = %current.transaction_code,
            from = %from,
            to = %to,
            "payment status changed"
        );

        let updated = match driven_status(current.status, to, &mut *tx, current.product_id).await? {
            Some(status) => {
                let request = TransitionRequest::new(status)
                    .with_message(format!("Payment {to}"))
                    .with_metadata(payment_metadata(from, to, current.payment_reference.as_deref()));
                apply_transition(&mut *tx, current, &request).await?
            }
            None => current,
        };

        tx.commit().await?;
        Ok(updated)
    })
    .await
}

/// Fail every non-terminal transaction whose `expired_at` has passed.
///
/// Rows locked by a concurrent update are skipped (`SKIP LOCKED`) and picked
/// up by a later sweep. Payment status still `pending` becomes `expired`.
pub async fn expire_overdue(
    pool: &DbPool,
    policy: LockPolicy,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<ExpirySummary, AppError> {
    let mut tx = db::begin_locked(pool, policy).await?;

    let overdue = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE status IN ('pending', 'processing') AND expired_at < $1
        ORDER BY expired_at
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;

    let mut summary = ExpirySummary::default();

    for transaction in overdue {
        let code = transaction.transaction_code.clone();
        let payment_from = transaction.payment_status;

        let transaction = if payment_from == PaymentStatus::Pending {
            set_payment_status(&mut *tx, transaction.id, PaymentStatus::Expired, None).await?
        } else {
            transaction
        };

        let request = TransitionRequest::new(TransactionStatus::Failed)
            .with_message(EXPIRED_MESSAGE)
            .with_metadata(json!({
                "reason": "expired",
                "expired_at": transaction.expired_at,
                "payment_status_from": payment_from,
                "payment_status_to": transaction.payment_status,
            }));

        match apply_transition(&mut *tx, transaction, &request).await {
            Ok(_) => {
                summary.expired += 1;
                summary.transaction_codes.push(code);
            }
            Err(AppError::IllegalTransition { from, to }) => {
                tracing::warn!(transaction_code = %code, %from, %to, "expiry skipped");
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    tx.commit().await?;

    if summary.expired > 0 {
        tracing::info!(expired = summary.expired, "overdue transactions expired");
    }

    Ok(summary)
}

/// Log rows of a transaction in commit order.
///
/// Ordered by `id`: log ids are drawn while the transaction row is locked, so
/// they follow commit order even when units of work started in another order.
pub async fn list_logs(pool: &DbPool, transaction_id: Uuid) -> Result<Vec<TransactionLog>, AppError> {
    let logs = sqlx::query_as::<_, TransactionLog>(
        "SELECT * FROM transaction_logs WHERE transaction_id = $1 ORDER BY id",
    )
    .bind(transaction_id)
    .fetch_all(pool)
    .await?;

    Ok(logs)
}

/// `processed_at` / `completed_at` after entering `to`; existing values are kept.
fn stamp_first_entry(
    current: &Transaction,
    to: TransactionStatus,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let processed_at = match to {
        TransactionStatus::Processing => current.processed_at.or(Some(now)),
        _ => current.processed_at,
    };
    let completed_at = match to {
        TransactionStatus::Completed => current.completed_at.or(Some(now)),
        _ => current.completed_at,
    };
    (processed_at, completed_at)
}

/// Processing status a payment change drives, if any.
async fn driven_status(
    status: TransactionStatus,
    payment: PaymentStatus,
    conn: &mut PgConnection,
    product_id: Uuid,
) -> Result<Option<TransactionStatus>, AppError> {
    if status != TransactionStatus::Pending {
        return Ok(None);
    }

    let driven = match payment {
        PaymentStatus::Paid => {
            if is_instant_fulfillment(conn, product_id).await? {
                Some(TransactionStatus::Completed)
            } else {
                Some(TransactionStatus::Processing)
            }
        }
        PaymentStatus::Failed | PaymentStatus::Expired => Some(TransactionStatus::Failed),
        PaymentStatus::Pending | PaymentStatus::Refunded => None,
    };

    Ok(driven)
}

fn payment_metadata(from: PaymentStatus, to: PaymentStatus, reference: Option<&str>) -> Value {
    json!({
        "payment_status_from": from,
        "payment_status_to": to,
        "payment_reference": reference,
    })
}

async fn is_instant_fulfillment(conn: &mut PgConnection, product_id: Uuid) -> Result<bool, AppError> {
    let instant: Option<bool> =
        sqlx::query_scalar("SELECT instant_fulfillment FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(instant.unwrap_or(false))
}

async fn set_payment_status(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    status: PaymentStatus,
    reference: Option<&str>,
) -> Result<Transaction, AppError> {
    let updated = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET payment_status = $2,
            payment_reference = COALESCE($3, payment_reference),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(status)
    .bind(reference)
    .fetch_one(&mut *conn)
    .await?;

    Ok(updated)
}

async fn append_log(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    from: Option<TransactionStatus>,
    to: TransactionStatus,
    message: &str,
    metadata: Option<Value>,
    admin_id: Option<Uuid>,
) -> Result<TransactionLog, AppError> {
    let log = sqlx::query_as::<_, TransactionLog>(
        r#"
        INSERT INTO transaction_logs (
            transaction_id, status_from, status_to, message, metadata, created_by_admin
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(transaction_id)
    .bind(from)
    .bind(to)
    .bind(message)
    .bind(metadata)
    .bind(admin_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(log)
}
