//! Transaction fee records
//!
//! A fee record pins down exactly which orders a settled fee window covered.
//! The `transaction_fee_orders` table carries a UNIQUE(store_id, order_id)
//! constraint, so an order appearing in two fee periods is a constraint
//! violation, not a silent double-bill.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A settled transaction-fee window for a store
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionFeeRecord {
    pub id: Uuid,
    pub store_id: Uuid,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub transacted_total: Decimal,
    pub order_count: i32,
    pub fee_rate: Decimal,
    pub fee_amount: Decimal,
    pub invoice_id: Uuid,
    pub created_at: OffsetDateTime,
}

/// Persist a fee record and its order-id list in one transaction
///
/// The order-id insert trips the uniqueness constraint if any order was
/// already settled in an earlier window, rolling the whole record back.
pub async fn record_fee_period(
    pool: &PgPool,
    store_id: Uuid,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
    transacted_total: Decimal,
    fee_rate: Decimal,
    fee_amount: Decimal,
    invoice_id: Uuid,
    order_ids: &[Uuid],
) -> BillingResult<TransactionFeeRecord> {
    let mut tx = pool.begin().await?;

    let record: TransactionFeeRecord = sqlx::query_as(
        r#"
        INSERT INTO transaction_fee_records (
            store_id, period_start, period_end,
            transacted_total, order_count, fee_rate, fee_amount, invoice_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(store_id)
    .bind(period_start)
    .bind(period_end)
    .bind(transacted_total)
    .bind(order_ids.len() as i32)
    .bind(fee_rate)
    .bind(fee_amount)
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await?;

    for order_id in order_ids {
        sqlx::query(
            r#"
            INSERT INTO transaction_fee_orders (fee_record_id, store_id, order_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(record.id)
        .bind(store_id)
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            BillingError::Internal(format!(
                "order {order_id} already settled in another fee period: {e}"
            ))
        })?;
    }

    tx.commit().await?;

    tracing::info!(
        store_id = %store_id,
        fee_record_id = %record.id,
        orders = order_ids.len(),
        fee_amount = %fee_amount,
        "Transaction fee period settled"
    );

    Ok(record)
}

/// Fee records for a store, newest first
pub async fn list_for_store(
    pool: &PgPool,
    store_id: Uuid,
    limit: i64,
) -> BillingResult<Vec<TransactionFeeRecord>> {
    let records = sqlx::query_as(
        r#"
        SELECT * FROM transaction_fee_records
        WHERE store_id = $1
        ORDER BY period_end DESC
        LIMIT $2
        "#,
    )
    .bind(store_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(records)
}
