//! Invoice ledger
//!
//! Owns invoice numbering, invoice + line item persistence, and status
//! tracking. Every billing event produces an invoice row, including failed
//! charges, so there is always an audit trail; nothing is silently dropped.
//!
//! Invoice numbers are year-scoped, strictly increasing, and never reused.
//! The sequence comes from an `invoice_counters` upsert that increments and
//! returns in a single atomic statement, so two concurrent callers can never
//! compute the same number.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use quickshop_shared::{InvoiceStatus, InvoiceType};

use crate::error::{BillingError, BillingResult};

/// Invoice number prefix: `QS-<year>-<6-digit-sequence>`
const INVOICE_PREFIX: &str = "QS";

/// A persisted invoice
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub store_id: Uuid,
    pub subscription_id: Uuid,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub gateway_transaction_id: Option<String>,
    pub gateway_invoice_ref: Option<String>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// A persisted invoice line item
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
}

/// Input for creating an invoice
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub store_id: Uuid,
    pub subscription_id: Uuid,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub gateway_transaction_id: Option<String>,
    pub gateway_invoice_ref: Option<String>,
    pub last_error: Option<String>,
}

/// Input for a line item; `total_price` is derived, not accepted
#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
}

/// Format an invoice number from year and sequence
pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("{INVOICE_PREFIX}-{year}-{sequence:06}")
}

/// Invoice ledger service
#[derive(Clone)]
pub struct InvoiceLedger {
    pool: PgPool,
}

impl InvoiceLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocate the next invoice number for a year
    ///
    /// Single-statement atomic counter upsert; no MAX()+1 read-then-write, so
    /// concurrent allocations cannot collide.
    pub async fn next_invoice_number(&self, year: i32) -> BillingResult<String> {
        let (sequence,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO invoice_counters (year, last_seq)
            VALUES ($1, 1)
            ON CONFLICT (year) DO UPDATE
            SET last_seq = invoice_counters.last_seq + 1
            RETURNING last_seq
            "#,
        )
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        Ok(format_invoice_number(year, sequence))
    }

    /// Whether a `paid` invoice already covers (store, type, period)
    ///
    /// Callers check this before contacting the gateway so an idempotency
    /// conflict is rejected locally, without a charge attempt.
    pub async fn period_is_paid(
        &self,
        store_id: Uuid,
        invoice_type: InvoiceType,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<bool> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM invoices
            WHERE store_id = $1 AND invoice_type = $2
              AND period_start = $3 AND period_end = $4
              AND status = 'paid'
            "#,
        )
        .bind(store_id)
        .bind(invoice_type)
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&self.pool)
        .await?;
        Ok(existing.is_some())
    }

    /// Persist an invoice for a billing event
    ///
    /// Rejects the call when a `paid` invoice already covers the same
    /// (store, type, period) — a retried batch run must not bill a settled
    /// period twice. A retry of an unpaid period updates the existing invoice
    /// in place (incrementing `attempt_count`, replacing its line items)
    /// rather than minting a sibling, so attempt history aggregates on one
    /// row under one invoice number. Failed charges are persisted like any
    /// other outcome.
    pub async fn record_invoice(&self, new: NewInvoice) -> BillingResult<Invoice> {
        if new.subtotal < Decimal::ZERO || new.vat_amount < Decimal::ZERO {
            return Err(BillingError::InvalidAmount(format!(
                "negative amounts: subtotal {}, vat {}",
                new.subtotal, new.vat_amount
            )));
        }

        let existing_paid: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM invoices
            WHERE store_id = $1 AND invoice_type = $2
              AND period_start = $3 AND period_end = $4
              AND status = 'paid'
            "#,
        )
        .bind(new.store_id)
        .bind(new.invoice_type)
        .bind(new.period_start)
        .bind(new.period_end)
        .fetch_optional(&self.pool)
        .await?;

        if existing_paid.is_some() {
            return Err(BillingError::PeriodAlreadyBilled {
                store_id: new.store_id,
                invoice_type: new.invoice_type.as_str().to_string(),
                period_start: new.period_start,
                period_end: new.period_end,
            });
        }

        let prior_attempt: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM invoices
            WHERE store_id = $1 AND invoice_type = $2
              AND period_start = $3 AND period_end = $4
              AND status <> 'paid'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(new.store_id)
        .bind(new.invoice_type)
        .bind(new.period_start)
        .bind(new.period_end)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((prior_id,)) = prior_attempt {
            return self.record_retry(prior_id, new).await;
        }

        let year = new.period_end.year();
        let invoice_number = self.next_invoice_number(year).await?;
        let total_amount = new.subtotal + new.vat_amount;

        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices (
                invoice_number, store_id, subscription_id, invoice_type, status,
                subtotal, vat_rate, vat_amount, total_amount,
                period_start, period_end,
                gateway_transaction_id, gateway_invoice_ref,
                attempt_count, last_error, last_attempt_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 1, $14, NOW())
            RETURNING *
            "#,
        )
        .bind(&invoice_number)
        .bind(new.store_id)
        .bind(new.subscription_id)
        .bind(new.invoice_type)
        .bind(new.status)
        .bind(new.subtotal)
        .bind(new.vat_rate)
        .bind(new.vat_amount)
        .bind(total_amount)
        .bind(new.period_start)
        .bind(new.period_end)
        .bind(&new.gateway_transaction_id)
        .bind(&new.gateway_invoice_ref)
        .bind(&new.last_error)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            invoice_number = %invoice.invoice_number,
            store_id = %invoice.store_id,
            invoice_type = %invoice.invoice_type.as_str(),
            status = %invoice.status.as_str(),
            total = %invoice.total_amount,
            "Invoice recorded"
        );

        Ok(invoice)
    }

    /// Fold a repeat charge attempt into the period's existing unpaid invoice
    ///
    /// The prior attempt's line items are dropped; the caller re-records the
    /// items for the attempt that just ran.
    async fn record_retry(&self, invoice_id: Uuid, new: NewInvoice) -> BillingResult<Invoice> {
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await?;

        let total_amount = new.subtotal + new.vat_amount;
        let invoice: Invoice = sqlx::query_as(
            r#"
            UPDATE invoices
            SET status = $2,
                subtotal = $3, vat_rate = $4, vat_amount = $5, total_amount = $6,
                gateway_transaction_id = $7, gateway_invoice_ref = $8,
                attempt_count = attempt_count + 1,
                last_error = $9,
                last_attempt_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(new.status)
        .bind(new.subtotal)
        .bind(new.vat_rate)
        .bind(new.vat_amount)
        .bind(total_amount)
        .bind(&new.gateway_transaction_id)
        .bind(&new.gateway_invoice_ref)
        .bind(&new.last_error)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            invoice_number = %invoice.invoice_number,
            store_id = %invoice.store_id,
            status = %invoice.status.as_str(),
            attempt = invoice.attempt_count,
            "Invoice attempt re-recorded"
        );

        Ok(invoice)
    }

    /// Persist line items under an invoice
    ///
    /// Each `total_price` is `unit_price × quantity`; the item totals must sum
    /// to the parent invoice's subtotal or the call is rejected.
    pub async fn record_line_items(
        &self,
        invoice_id: Uuid,
        items: &[NewInvoiceItem],
    ) -> BillingResult<Vec<InvoiceItem>> {
        let (subtotal,): (Decimal,) =
            sqlx::query_as("SELECT subtotal FROM invoices WHERE id = $1")
                .bind(invoice_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| BillingError::Internal(format!("invoice {invoice_id} not found")))?;

        let items_total: Decimal = items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();

        if items_total != subtotal {
            return Err(BillingError::LineItemMismatch {
                items_total,
                subtotal,
            });
        }

        let mut recorded = Vec::with_capacity(items.len());
        for item in items {
            let total_price = item.unit_price * Decimal::from(item.quantity);
            let row: InvoiceItem = sqlx::query_as(
                r#"
                INSERT INTO invoice_items (
                    invoice_id, description, quantity, unit_price, total_price,
                    reference_type, reference_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
                "#,
            )
            .bind(invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(total_price)
            .bind(&item.reference_type)
            .bind(&item.reference_id)
            .fetch_one(&self.pool)
            .await?;
            recorded.push(row);
        }

        Ok(recorded)
    }

    /// Mark an invoice paid by its gateway request/invoice reference
    /// (async settlement reported through the gateway callback)
    pub async fn mark_paid_by_gateway_ref(
        &self,
        gateway_invoice_ref: &str,
        transaction_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            UPDATE invoices
            SET status = 'paid', gateway_transaction_id = $2, last_error = NULL
            WHERE gateway_invoice_ref = $1 AND status <> 'paid'
            RETURNING *
            "#,
        )
        .bind(gateway_invoice_ref)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref inv) = invoice {
            tracing::info!(
                invoice_number = %inv.invoice_number,
                gateway_invoice_ref = %gateway_invoice_ref,
                "Invoice marked paid from gateway callback"
            );
        }
        Ok(invoice)
    }

    /// Mark an invoice failed by its gateway reference, recording the error
    pub async fn mark_failed_by_gateway_ref(
        &self,
        gateway_invoice_ref: &str,
        error: &str,
    ) -> BillingResult<Option<Invoice>> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            UPDATE invoices
            SET status = 'failed',
                last_error = $2,
                attempt_count = attempt_count + 1,
                last_attempt_at = NOW()
            WHERE gateway_invoice_ref = $1 AND status <> 'paid'
            RETURNING *
            "#,
        )
        .bind(gateway_invoice_ref)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invoice)
    }

    /// Fetch an invoice by its human-readable number
    pub async fn get_by_number(&self, invoice_number: &str) -> BillingResult<Option<Invoice>> {
        let invoice = sqlx::query_as("SELECT * FROM invoices WHERE invoice_number = $1")
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invoice)
    }

    /// Invoices for a store, newest first (admin console listing)
    pub async fn list_for_store(&self, store_id: Uuid, limit: i64) -> BillingResult<Vec<Invoice>> {
        let invoices = sqlx::query_as(
            "SELECT * FROM invoices WHERE store_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(store_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    /// Line items for an invoice
    pub async fn items_for_invoice(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoiceItem>> {
        let items = sqlx::query_as(
            "SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY description ASC",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_number_format() {
        assert_eq!(format_invoice_number(2026, 1), "QS-2026-000001");
        assert_eq!(format_invoice_number(2026, 42), "QS-2026-000042");
        assert_eq!(format_invoice_number(2026, 999_999), "QS-2026-999999");
        // Sequences past six digits widen rather than wrap
        assert_eq!(format_invoice_number(2026, 1_000_000), "QS-2026-1000000");
    }

    #[test]
    fn invoice_numbers_sort_within_year() {
        let a = format_invoice_number(2026, 7);
        let b = format_invoice_number(2026, 8);
        assert!(a < b);
    }
}
