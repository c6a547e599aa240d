//! Transaction creation, status transitions, payment updates and expiry
//! against a real database.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use topup_service::{
    db::DbPool,
    error::AppError,
    models::{
        transaction::{PaymentStatus, TransactionLog, TransactionStatus},
        voucher::DiscountType,
    },
    services::{
        messaging::LogMessenger,
        state_machine::{self, EXPIRED_MESSAGE, PaymentUpdate, TransitionRequest},
        transaction_service::{self, ClientMeta},
    },
    state::AppState,
};

use common::{StaticGateway, purchase};

fn paid() -> PaymentUpdate {
    PaymentUpdate {
        status: PaymentStatus::Paid,
        reference: Some("GW-123".to_string()),
    }
}

#[tokio::test]
async fn creation_prices_snapshots_and_logs_once() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(20000), false).await;
    let voucher = common::voucher(
        &pool,
        common::voucher_request(DiscountType::Fixed, dec!(2000), 10),
    )
    .await
    .voucher;
    let user = Uuid::new_v4();

    let created = transaction_service::create_transaction(
        &state,
        user,
        purchase(product.id, Some(&voucher.code)),
        ClientMeta {
            user_agent: Some("integration-test".to_string()),
            ip_address: Some("203.0.113.7".to_string()),
        },
    )
    .await
    .unwrap();

    let response = &created.transaction;
    assert_eq!(response.product_price, dec!(20000));
    assert_eq!(response.voucher_discount, dec!(2000));
    assert_eq!(response.payment_fee, Decimal::ZERO);
    assert_eq!(response.total_amount, dec!(18000));
    assert_eq!(response.status, TransactionStatus::Pending);
    assert_eq!(response.payment_status, PaymentStatus::Pending);
    assert_eq!(response.whatsapp, "6281234567890");
    assert!(response.transaction_code.starts_with("TXN"));
    assert!(!created.payment_url_pending);
    assert_eq!(
        response.payment_url.as_deref(),
        Some(format!("https://pay.test/{}", response.transaction_code).as_str())
    );

    let stored = transaction_service::get_transaction(&pool, response.id, Some(user))
        .await
        .unwrap();
    assert_eq!(stored.game_account_data.0, purchase(product.id, None).game_account);
    assert_eq!(stored.user_agent.as_deref(), Some("integration-test"));
    assert_eq!(stored.ip_address.as_deref(), Some("203.0.113.7"));
    assert!(stored.expired_at > stored.created_at);

    let logs = transaction_service::list_logs(&pool, response.id, Some(user))
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_from, None);
    assert_eq!(logs[0].status_to, TransactionStatus::Pending);
    let metadata = logs[0].metadata.as_ref().unwrap();
    assert_eq!(metadata["voucher_code"], voucher.code.as_str());

    let usage_transaction: Uuid =
        sqlx::query_scalar("SELECT transaction_id FROM voucher_usages WHERE voucher_id = $1")
            .bind(voucher.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(usage_transaction, response.id);
}

#[tokio::test]
async fn payment_fee_is_added_to_the_total() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = AppState::new(
        pool.clone(),
        common::test_config("gopay=1500"),
        Arc::new(StaticGateway),
        Arc::new(LogMessenger),
    );
    let product = common::product(&pool, dec!(20000), false).await;

    let created = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap();

    assert_eq!(created.transaction.payment_fee, dec!(1500));
    assert_eq!(created.transaction.total_amount, dec!(21500));
}

#[tokio::test]
async fn unreachable_gateway_leaves_link_pending_until_retried() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let offline = common::offline_gateway_state(pool.clone());
    let product = common::product(&pool, dec!(15000), false).await;

    let created = transaction_service::create_transaction(
        &offline,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap();

    assert!(created.payment_url_pending);
    assert_eq!(created.transaction.payment_url, None);
    assert_eq!(created.transaction.status, TransactionStatus::Pending);

    let still_offline = transaction_service::retry_payment_url(&offline, created.transaction.id).await;
    assert!(matches!(still_offline, Err(AppError::DependencyFailure(_))));

    let online = common::test_state(pool.clone());
    let retried = transaction_service::retry_payment_url(&online, created.transaction.id)
        .await
        .unwrap();
    assert_eq!(
        retried.payment_url,
        Some(format!("https://pay.test/{}", retried.transaction_code))
    );
}

#[tokio::test]
async fn inactive_product_cannot_be_purchased() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(15000), false).await;

    sqlx::query("UPDATE products SET status = 'inactive' WHERE id = $1")
        .bind(product.id)
        .execute(&pool)
        .await
        .unwrap();

    let result = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await;
    assert!(matches!(result, Err(AppError::ProductInactive)));

    let missing = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(Uuid::new_v4(), None),
        ClientMeta::default(),
    )
    .await;
    assert!(matches!(missing, Err(AppError::ProductNotFound)));
}

#[tokio::test]
async fn processing_and_completion_are_stamped_once() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(25000), false).await;
    let admin = Uuid::new_v4();

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    let processing = state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Processing).by_admin(admin),
    )
    .await
    .unwrap();
    let processed_at = processing.processed_at.unwrap();
    assert_eq!(processing.completed_at, None);

    // Same status again is a no-op
    let again = state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Processing),
    )
    .await
    .unwrap();
    assert_eq!(again.processed_at, Some(processed_at));

    let completed = state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Completed).with_message("Diamonds delivered"),
    )
    .await
    .unwrap();
    assert_eq!(completed.processed_at, Some(processed_at));
    assert!(completed.completed_at.is_some());

    let logs = state_machine::list_logs(&pool, id).await.unwrap();
    let walk: Vec<_> = logs.iter().map(|l| (l.status_from, l.status_to)).collect();
    assert_eq!(
        walk,
        vec![
            (None, TransactionStatus::Pending),
            (Some(TransactionStatus::Pending), TransactionStatus::Processing),
            (Some(TransactionStatus::Processing), TransactionStatus::Completed),
        ]
    );
    assert_eq!(logs[1].created_by_admin, Some(admin));
    assert_eq!(logs[1].message.as_deref(), Some("Status changed from pending to processing"));
    assert_eq!(logs[2].message.as_deref(), Some("Diamonds delivered"));

    // Terminal
    let reopened = state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Pending),
    )
    .await;
    assert!(matches!(reopened, Err(AppError::IllegalTransition { .. })));
    assert_eq!(state_machine::list_logs(&pool, id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn illegal_edges_are_rejected() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(25000), false).await;

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    let skipped = state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Completed),
    )
    .await;
    assert!(matches!(skipped, Err(AppError::IllegalTransition { .. })));

    state_machine::transition(&pool, policy, id, TransitionRequest::new(TransactionStatus::Failed))
        .await
        .unwrap();

    let revived = state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Processing),
    )
    .await;
    assert!(matches!(revived, Err(AppError::IllegalTransition { .. })));

    let stored = transaction_service::get_transaction(&pool, id, None).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert_eq!(stored.processed_at, None);
}

#[tokio::test]
async fn instant_products_complete_straight_from_pending() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(10000), true).await;

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    let completed = state_machine::transition(
        &pool,
        state.config.lock_policy(),
        id,
        TransitionRequest::new(TransactionStatus::Completed),
    )
    .await
    .unwrap();

    assert_eq!(completed.status, TransactionStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.processed_at, None);
}

#[tokio::test]
async fn payment_notifications_drive_processing_status() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(30000), false).await;

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    let updated = state_machine::update_payment_status(&pool, policy, id, paid())
        .await
        .unwrap();
    assert_eq!(updated.payment_status, PaymentStatus::Paid);
    assert_eq!(updated.status, TransactionStatus::Processing);
    assert!(updated.processed_at.is_some());
    assert_eq!(updated.payment_reference.as_deref(), Some("GW-123"));

    // Redelivery is a no-op
    state_machine::update_payment_status(&pool, policy, id, paid())
        .await
        .unwrap();

    let logs = state_machine::list_logs(&pool, id).await.unwrap();
    assert_eq!(logs.len(), 2);
    let metadata = logs[1].metadata.as_ref().unwrap();
    assert_eq!(metadata["payment_status_from"], "pending");
    assert_eq!(metadata["payment_status_to"], "paid");

    state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Completed),
    )
    .await
    .unwrap();

    // A refund after completion only moves the payment status
    let refunded = state_machine::update_payment_status(
        &pool,
        policy,
        id,
        PaymentUpdate {
            status: PaymentStatus::Refunded,
            reference: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(refunded.status, TransactionStatus::Completed);
    assert_eq!(state_machine::list_logs(&pool, id).await.unwrap().len(), 3);

    let back_to_pending = state_machine::update_payment_status(
        &pool,
        policy,
        id,
        PaymentUpdate {
            status: PaymentStatus::Pending,
            reference: None,
        },
    )
    .await;
    assert!(matches!(back_to_pending, Err(AppError::IllegalTransition { .. })));
}

#[tokio::test]
async fn paid_instant_product_completes() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(5000), true).await;

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    let updated = state_machine::update_payment_status(&pool, state.config.lock_policy(), id, paid())
        .await
        .unwrap();

    assert_eq!(updated.status, TransactionStatus::Completed);
    assert!(updated.completed_at.is_some());
}

#[tokio::test]
async fn failed_payment_fails_the_transaction() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(5000), false).await;

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    let updated = state_machine::update_payment_status(
        &pool,
        state.config.lock_policy(),
        id,
        PaymentUpdate {
            status: PaymentStatus::Failed,
            reference: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(updated.payment_status, PaymentStatus::Failed);
    assert_eq!(updated.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn overdue_transactions_are_expired() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(12000), false).await;

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    sqlx::query("UPDATE transactions SET expired_at = $2 WHERE id = $1")
        .bind(id)
        .bind(Utc::now() - Duration::minutes(5))
        .execute(&pool)
        .await
        .unwrap();

    state_machine::expire_overdue(&pool, policy, Utc::now(), 500)
        .await
        .unwrap();

    let expired = transaction_service::get_transaction(&pool, id, None).await.unwrap();
    assert_eq!(expired.status, TransactionStatus::Failed);
    assert_eq!(expired.payment_status, PaymentStatus::Expired);

    let logs = state_machine::list_logs(&pool, id).await.unwrap();
    let last = logs.last().unwrap();
    assert_eq!(last.status_to, TransactionStatus::Failed);
    assert_eq!(last.message.as_deref(), Some(EXPIRED_MESSAGE));

    // A late payment cannot revive it
    let late = state_machine::update_payment_status(&pool, policy, id, paid()).await;
    assert!(matches!(late, Err(AppError::IllegalTransition { .. })));

    let unchanged = transaction_service::get_transaction(&pool, id, None).await.unwrap();
    assert_eq!(unchanged.status, TransactionStatus::Failed);
    assert_eq!(unchanged.payment_status, PaymentStatus::Expired);
}

#[tokio::test]
async fn customers_only_see_their_own_transactions() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(12000), false).await;
    let owner = Uuid::new_v4();

    let id = transaction_service::create_transaction(
        &state,
        owner,
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    let stranger = transaction_service::get_transaction(&pool, id, Some(Uuid::new_v4())).await;
    assert!(matches!(stranger, Err(AppError::TransactionNotFound)));

    let stranger_logs = transaction_service::list_logs(&pool, id, Some(Uuid::new_v4())).await;
    assert!(matches!(stranger_logs, Err(AppError::TransactionNotFound)));

    let page = transaction_service::list_transactions(&pool, Some(owner), &Default::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, id);
}

#[tokio::test]
async fn invalid_whatsapp_is_rejected_before_any_write() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let product = common::product(&pool, dec!(12000), false).await;
    let user = Uuid::new_v4();

    let mut request = purchase(product.id, None);
    request.whatsapp = "12-34".to_string();

    let result =
        transaction_service::create_transaction(&state, user, request, ClientMeta::default()).await;
    assert!(matches!(result, Err(AppError::ValidationFailed(_))));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE user_id = $1")
        .bind(user)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

/// Every log row starts where the previous one ended.
fn assert_log_chain(logs: &[TransactionLog]) {
    assert_eq!(logs[0].status_from, None);
    for pair in logs.windows(2) {
        assert_eq!(pair[1].status_from, Some(pair[0].status_to));
        assert!(pair[1].created_at >= pair[0].created_at);
    }
}

async fn backdate_expiry(pool: &DbPool, id: Uuid) {
    sqlx::query("UPDATE transactions SET expired_at = $2 WHERE id = $1")
        .bind(id)
        .bind(Utc::now() - Duration::minutes(5))
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn customers_cancel_only_their_own_pending_transactions() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(15000), false).await;
    let owner = Uuid::new_v4();

    let pending = transaction_service::create_transaction(
        &state,
        owner,
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction;

    let stranger = transaction_service::cancel_transaction(&state, pending.id, Uuid::new_v4()).await;
    assert!(matches!(stranger, Err(AppError::TransactionNotFound)));

    let cancelled = transaction_service::cancel_transaction(&state, pending.id, owner)
        .await
        .unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Pending);

    let logs = state_machine::list_logs(&pool, pending.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_log_chain(&logs);
    assert_eq!(logs[1].status_to, TransactionStatus::Cancelled);
    assert_eq!(logs[1].created_by_admin, None);
    assert_eq!(logs[1].metadata.as_ref().unwrap()["cancelled_by"], "customer");

    // Once processing, only an admin can cancel
    let processing = transaction_service::create_transaction(
        &state,
        owner,
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction;
    state_machine::transition(
        &pool,
        policy,
        processing.id,
        TransitionRequest::new(TransactionStatus::Processing),
    )
    .await
    .unwrap();

    let refused = transaction_service::cancel_transaction(&state, processing.id, owner).await;
    assert!(matches!(refused, Err(AppError::InvalidState(_))));

    let unchanged = transaction_service::get_transaction(&pool, processing.id, None)
        .await
        .unwrap();
    assert_eq!(unchanged.status, TransactionStatus::Processing);
    assert_eq!(state_machine::list_logs(&pool, processing.id).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logs_follow_commit_order_not_start_order() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(25000), false).await;

    let id = transaction_service::create_transaction(
        &state,
        Uuid::new_v4(),
        purchase(product.id, None),
        ClientMeta::default(),
    )
    .await
    .unwrap()
    .transaction
    .id;

    // Open the later writer first and leave it idle
    let mut late = pool.begin().await.unwrap();
    sqlx::query("SELECT 1").execute(&mut *late).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    state_machine::transition(
        &pool,
        policy,
        id,
        TransitionRequest::new(TransactionStatus::Processing),
    )
    .await
    .unwrap();

    state_machine::transition_in(
        &mut *late,
        id,
        &TransitionRequest::new(TransactionStatus::Completed),
    )
    .await
    .unwrap();
    late.commit().await.unwrap();

    let logs = state_machine::list_logs(&pool, id).await.unwrap();
    let walk: Vec<_> = logs.iter().map(|l| (l.status_from, l.status_to)).collect();
    assert_eq!(
        walk,
        vec![
            (None, TransactionStatus::Pending),
            (Some(TransactionStatus::Pending), TransactionStatus::Processing),
            (Some(TransactionStatus::Processing), TransactionStatus::Completed),
        ]
    );
    assert_log_chain(&logs);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expiry_racing_a_cancel_leaves_one_terminal_log() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(10000), false).await;

    for _ in 0..10 {
        let id = transaction_service::create_transaction(
            &state,
            Uuid::new_v4(),
            purchase(product.id, None),
            ClientMeta::default(),
        )
        .await
        .unwrap()
        .transaction
        .id;
        backdate_expiry(&pool, id).await;

        let sweep = tokio::spawn({
            let pool = pool.clone();
            async move { state_machine::expire_overdue(&pool, policy, Utc::now(), 500).await }
        });
        let cancel = tokio::spawn({
            let pool = pool.clone();
            async move {
                state_machine::transition(
                    &pool,
                    policy,
                    id,
                    TransitionRequest::new(TransactionStatus::Cancelled),
                )
                .await
            }
        });

        sweep.await.unwrap().unwrap();
        let stored = transaction_service::get_transaction(&pool, id, None).await.unwrap();
        match cancel.await.unwrap() {
            Ok(_) => assert_eq!(stored.status, TransactionStatus::Cancelled),
            Err(e) => {
                // Expired first, by this sweep or one running alongside
                assert!(matches!(e, AppError::IllegalTransition { .. }), "unexpected error: {e:?}");
                assert_eq!(stored.status, TransactionStatus::Failed);
            }
        }

        let logs = state_machine::list_logs(&pool, id).await.unwrap();
        let terminal = logs.iter().filter(|l| l.status_to.is_terminal()).count();
        assert_eq!(terminal, 1);
        assert_eq!(logs.len(), 2);
        assert_log_chain(&logs);
        assert_eq!(logs.last().unwrap().status_to, stored.status);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expiry_racing_a_payment_leaves_one_terminal_log() {
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let state = common::test_state(pool.clone());
    let policy = state.config.lock_policy();
    let product = common::product(&pool, dec!(10000), true).await;

    for _ in 0..10 {
        let id = transaction_service::create_transaction(
            &state,
            Uuid::new_v4(),
            purchase(product.id, None),
            ClientMeta::default(),
        )
        .await
        .unwrap()
        .transaction
        .id;
        backdate_expiry(&pool, id).await;

        let sweep = tokio::spawn({
            let pool = pool.clone();
            async move { state_machine::expire_overdue(&pool, policy, Utc::now(), 500).await }
        });
        let payment = tokio::spawn({
            let pool = pool.clone();
            async move { state_machine::update_payment_status(&pool, policy, id, paid()).await }
        });

        sweep.await.unwrap().unwrap();
        let stored = transaction_service::get_transaction(&pool, id, None).await.unwrap();
        match payment.await.unwrap() {
            Ok(_) => {
                assert_eq!(stored.status, TransactionStatus::Completed);
                assert_eq!(stored.payment_status, PaymentStatus::Paid);
            }
            Err(e) => {
                assert!(matches!(e, AppError::IllegalTransition { .. }), "unexpected error: {e:?}");
                assert_eq!(stored.status, TransactionStatus::Failed);
                assert_eq!(stored.payment_status, PaymentStatus::Expired);
            }
        }

        let logs = state_machine::list_logs(&pool, id).await.unwrap();
        let terminal = logs.iter().filter(|l| l.status_to.is_terminal()).count();
        assert_eq!(terminal, 1);
        assert_log_chain(&logs);
        assert_eq!(logs.last().unwrap().status_to, stored.status);
    }
}
