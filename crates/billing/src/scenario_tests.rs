//! End-to-end billing flow tests
//!
//! These drive the real services against Postgres (`DATABASE_URL`) with a
//! stub gateway bound to a local port, so they are `#[ignore]`d by default
//! like the pool tests in the shared crate. Run with a database and
//! `cargo test -- --ignored`.

use axum::{routing::post, Json, Router};
use rust_decimal_macros::dec;
use sqlx::PgPool;
use time::macros::datetime;
use time::OffsetDateTime;
use uuid::Uuid;

use quickshop_shared::{
    run_migrations, CardInfo, InvoiceStatus, InvoiceType, Plan, SubscriptionStatus,
};

use crate::gateway::{GatewayConfig, PaymentGatewayClient};
use crate::ledger::{Invoice, NewInvoice};
use crate::BillingService;

// The batch jobs sweep the whole table, so these tests must not overlap
static DB_GUARD: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for flow tests");
    let pool = quickshop_shared::create_pool(&url).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}

/// Spawn a one-route gateway stub that approves or declines every charge
async fn stub_gateway(approve: bool) -> String {
    let app = Router::new().route(
        "/charges",
        post(move || async move {
            if approve {
                Json(serde_json::json!({
                    "status": "success",
                    "transaction_id": format!("txn_{}", Uuid::new_v4()),
                    "invoice_ref": format!("ginv_{}", Uuid::new_v4()),
                }))
            } else {
                Json(serde_json::json!({
                    "status": "failure",
                    "error_message": "card declined",
                }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn service(pool: PgPool, gateway_base_url: String) -> BillingService {
    let config = GatewayConfig {
        api_key: "test-api-key".to_string(),
        secret_key: "test-secret-key".to_string(),
        base_url: gateway_base_url,
        app_base_url: "http://localhost:3000".to_string(),
    };
    let gateway = PaymentGatewayClient::new(config).expect("gateway client");
    BillingService::new(pool, gateway)
}

async fn seed_store(pool: &PgPool) -> Uuid {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO stores (name, plan, owner_email) VALUES ($1, 'plan_a', $2) RETURNING id",
    )
    .bind(format!("flow-test-{}", Uuid::new_v4()))
    .bind("owner@example.com")
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

async fn seed_active_subscription(
    pool: &PgPool,
    store_id: Uuid,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
) -> Uuid {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO subscriptions
            (store_id, plan, status, trial_ends_at,
             current_period_start, current_period_end,
             gateway_customer_ref, gateway_token_ref, activated_at)
        VALUES ($1, 'plan_a', 'active', $2, $2, $3, 'cus_flow', 'tok_flow', $2)
        RETURNING id
        "#,
    )
    .bind(store_id)
    .bind(period_start)
    .bind(period_end)
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

async fn invoices_for(pool: &PgPool, store_id: Uuid) -> Vec<Invoice> {
    sqlx::query_as("SELECT * FROM invoices WHERE store_id = $1 ORDER BY created_at ASC")
        .bind(store_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn sub_state(pool: &PgPool, store_id: Uuid) -> (SubscriptionStatus, Option<OffsetDateTime>) {
    sqlx::query_as(
        "SELECT status, current_period_end FROM subscriptions WHERE store_id = $1",
    )
    .bind(store_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn first_period_invoice(
    store_id: Uuid,
    subscription_id: Uuid,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
) -> NewInvoice {
    NewInvoice {
        store_id,
        subscription_id,
        invoice_type: InvoiceType::Subscription,
        status: InvoiceStatus::Paid,
        subtotal: dec!(99.00),
        vat_rate: dec!(0.18),
        vat_amount: dec!(17.82),
        period_start,
        period_end,
        gateway_transaction_id: Some("txn_activation".to_string()),
        gateway_invoice_ref: None,
        last_error: None,
    }
}

// A store whose first (activation-paid) period has lapsed must still get a
// renewal attempt: the renewal bills the month after the lapsed period, so
// the paid activation invoice is not an idempotency conflict.
#[tokio::test]
#[ignore] // Requires database
async fn first_renewal_after_activation_bills_the_next_month() {
    let _guard = DB_GUARD.lock().await;
    let pool = test_pool().await;
    let svc = service(pool.clone(), stub_gateway(false).await);

    let store_id = seed_store(&pool).await;
    let period_start = datetime!(2026-06-25 00:00 UTC);
    let period_end = datetime!(2026-07-25 00:00 UTC);
    let sub_id = seed_active_subscription(&pool, store_id, period_start, period_end).await;

    // The activation checkout already paid for the first month
    svc.ledger
        .record_invoice(first_period_invoice(store_id, sub_id, period_start, period_end))
        .await
        .unwrap();

    let summary = svc
        .orchestrator
        .run_renewals(datetime!(2026-08-01 00:00 UTC))
        .await
        .unwrap();
    assert!(summary.declined >= 1);

    // The attempt targeted the month after the paid period and its decline
    // was recorded
    let invoices = invoices_for(&pool, store_id).await;
    assert_eq!(invoices.len(), 2);
    let renewal = invoices
        .iter()
        .find(|i| i.period_start == period_end)
        .expect("renewal invoice keyed to the next month");
    assert_eq!(renewal.status, InvoiceStatus::Failed);
    assert_eq!(renewal.period_end, datetime!(2026-08-25 00:00 UTC));
    assert!(renewal.last_error.as_deref().is_some_and(|e| !e.is_empty()));

    // Declined: past_due, period unchanged
    let (status, end) = sub_state(&pool, store_id).await;
    assert_eq!(status, SubscriptionStatus::PastDue);
    assert_eq!(end, Some(period_end));
}

#[tokio::test]
#[ignore] // Requires database
async fn successful_renewal_advances_the_period() {
    let _guard = DB_GUARD.lock().await;
    let pool = test_pool().await;
    let svc = service(pool.clone(), stub_gateway(true).await);

    let store_id = seed_store(&pool).await;
    let period_start = datetime!(2026-06-25 00:00 UTC);
    let period_end = datetime!(2026-07-25 00:00 UTC);
    seed_active_subscription(&pool, store_id, period_start, period_end).await;

    let summary = svc
        .orchestrator
        .run_renewals(datetime!(2026-08-01 00:00 UTC))
        .await
        .unwrap();
    assert!(summary.charged >= 1);

    let invoices = invoices_for(&pool, store_id).await;
    let renewal = invoices
        .iter()
        .find(|i| i.period_start == period_end)
        .expect("renewal invoice");
    assert_eq!(renewal.status, InvoiceStatus::Paid);
    assert_eq!(renewal.period_end, datetime!(2026-08-25 00:00 UTC));

    let (status, end) = sub_state(&pool, store_id).await;
    assert_eq!(status, SubscriptionStatus::Active);
    assert_eq!(end, Some(datetime!(2026-08-25 00:00 UTC)));

    // The run released its claim on the store
    let (locked,): (Option<OffsetDateTime>,) =
        sqlx::query_as("SELECT billing_locked_at FROM subscriptions WHERE store_id = $1")
            .bind(store_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(locked.is_none());
}

#[tokio::test]
#[ignore] // Requires database
async fn claimed_stores_are_not_reclaimed_by_an_overlapping_run() {
    let _guard = DB_GUARD.lock().await;
    let pool = test_pool().await;
    let svc = service(pool.clone(), "http://127.0.0.1:1".to_string());

    let store_id = seed_store(&pool).await;
    seed_active_subscription(
        &pool,
        store_id,
        datetime!(2026-06-25 00:00 UTC),
        datetime!(2026-07-25 00:00 UTC),
    )
    .await;

    let now = datetime!(2026-08-01 00:00 UTC);
    let first = svc.orchestrator.find_due_renewals(now).await.unwrap();
    assert!(first.contains(&store_id));

    // Same instant, second claimer: the store is already stamped
    let second = svc.orchestrator.find_due_renewals(now).await.unwrap();
    assert!(!second.contains(&store_id));
}

// Converting a trial store that transacted 1000 settles one transaction-fee
// invoice: 0.5% fee of 5.00 plus 18% VAT on the fee, 5.90 total.
#[tokio::test]
#[ignore] // Requires database
async fn trial_conversion_settles_accrued_fees() {
    let _guard = DB_GUARD.lock().await;
    let pool = test_pool().await;
    let svc = service(pool.clone(), stub_gateway(true).await);

    let store_id = seed_store(&pool).await;

    // Backdate the trial start so the seeded orders fall inside its window
    svc.subscriptions.get_or_create(store_id).await.unwrap();
    sqlx::query("UPDATE subscriptions SET created_at = $2 WHERE store_id = $1")
        .bind(store_id)
        .bind(datetime!(2026-08-01 00:00 UTC))
        .execute(&pool)
        .await
        .unwrap();

    for total in [dec!(600.00), dec!(400.00)] {
        sqlx::query(
            "INSERT INTO orders (store_id, total, financial_status, paid_at) VALUES ($1, $2, 'paid', $3)",
        )
        .bind(store_id)
        .bind(total)
        .bind(datetime!(2026-08-10 12:00 UTC))
        .execute(&pool)
        .await
        .unwrap();
    }

    let card = CardInfo {
        bin: "411111".to_string(),
        last_four: "1111".to_string(),
        brand: Some("visa".to_string()),
        expiry_month: Some(12),
        expiry_year: Some(2030),
    };
    let transition = svc
        .subscriptions
        .activate(store_id, Plan::PlanA, "cus_trial", "tok_trial", &card, &svc.trial)
        .await
        .unwrap();
    assert!(transition.applied().is_some());

    let invoices = invoices_for(&pool, store_id).await;
    let fee = invoices
        .iter()
        .find(|i| i.invoice_type == InvoiceType::TransactionFee)
        .expect("trial fee invoice");
    assert_eq!(fee.status, InvoiceStatus::Paid);
    assert_eq!(fee.total_amount, dec!(5.90));

    let (status, _) = sub_state(&pool, store_id).await;
    assert_eq!(status, SubscriptionStatus::Active);
}

#[tokio::test]
#[ignore] // Requires database
async fn invalid_transitions_are_noops() {
    let _guard = DB_GUARD.lock().await;
    let pool = test_pool().await;
    let svc = service(pool.clone(), "http://127.0.0.1:1".to_string());

    let store_id = seed_store(&pool).await;
    let sub = svc.subscriptions.get_or_create(store_id).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Trial);

    // None of these are valid from trial
    assert!(svc
        .subscriptions
        .mark_past_due(store_id)
        .await
        .unwrap()
        .applied()
        .is_none());
    assert!(svc
        .subscriptions
        .restore_active(store_id)
        .await
        .unwrap()
        .applied()
        .is_none());
    assert!(svc
        .subscriptions
        .cancel(store_id)
        .await
        .unwrap()
        .applied()
        .is_none());

    // And the record is untouched
    let (status, end) = sub_state(&pool, store_id).await;
    assert_eq!(status, SubscriptionStatus::Trial);
    assert!(end.is_none());
}

// A repeat failed charge for the same period folds into the existing
// invoice instead of minting a sibling row.
#[tokio::test]
#[ignore] // Requires database
async fn failed_charge_retry_updates_the_same_invoice() {
    let _guard = DB_GUARD.lock().await;
    let pool = test_pool().await;
    let svc = service(pool.clone(), "http://127.0.0.1:1".to_string());

    let store_id = seed_store(&pool).await;
    let sub_id = seed_active_subscription(
        &pool,
        store_id,
        datetime!(2026-06-25 00:00 UTC),
        datetime!(2026-07-25 00:00 UTC),
    )
    .await;

    let attempt = |error: &str| NewInvoice {
        store_id,
        subscription_id: sub_id,
        invoice_type: InvoiceType::Subscription,
        status: InvoiceStatus::Failed,
        subtotal: dec!(99.00),
        vat_rate: dec!(0.18),
        vat_amount: dec!(17.82),
        period_start: datetime!(2026-07-25 00:00 UTC),
        period_end: datetime!(2026-08-25 00:00 UTC),
        gateway_transaction_id: None,
        gateway_invoice_ref: None,
        last_error: Some(error.to_string()),
    };

    let first = svc.ledger.record_invoice(attempt("card declined")).await.unwrap();
    assert_eq!(first.attempt_count, 1);

    let second = svc
        .ledger
        .record_invoice(attempt("insufficient funds"))
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.invoice_number, first.invoice_number);
    assert_eq!(second.attempt_count, 2);
    assert_eq!(second.last_error.as_deref(), Some("insufficient funds"));

    assert_eq!(invoices_for(&pool, store_id).await.len(), 1);
}
