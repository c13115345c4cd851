//! Billing orchestrator
//!
//! Scheduled batch driver for the three settlement cycles (renewals,
//! transaction fees, plugin fees) plus trial expiry and the card-health
//! sweep. Each job claims its due stores by stamping `billing_locked_at` in
//! the same statement that selects them, then processes the claimed stores
//! one at a time; no two charge attempts for the same store are ever in
//! flight together, even across overlapping runs. Failures never abort a
//! run; they flip the one store to `past_due` and the run moves on.
//!
//! The mandated ordering for every charge is: attempt the gateway charge
//! first, then persist the invoice reflecting the actual outcome.

use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use quickshop_shared::{
    advance_plugin_billing_date, due_plugins_for_store, paid_orders_in_window, sum_orders,
    InvoiceStatus, InvoiceType, Plan,
};

use crate::error::{BillingError, BillingResult};
use crate::fees::record_fee_period;
use crate::gateway::{idempotency_key, ChargeOutcome, GatewayLineItem, PaymentGatewayClient};
use crate::ledger::{InvoiceLedger, NewInvoice, NewInvoiceItem};
use crate::periods::add_one_month;
use crate::pricing::{round2, subscription_price, transaction_fee, MINIMUM_CHARGE};
use crate::settings::{BillingRates, SettingsStore};
use crate::subscription::{Subscription, SubscriptionStateMachine};

/// How long a per-store claim lasts before an overlapping run may take over
/// (a run that died mid-batch cannot wedge its stores forever)
const CLAIM_TTL: Duration = Duration::minutes(10);

/// Outcome counts for one batch job run
#[derive(Debug, Clone, Default)]
pub struct BillingRunSummary {
    pub processed: usize,
    pub charged: usize,
    pub declined: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BillingRunSummary {
    fn note_charged(&mut self) {
        self.processed += 1;
        self.charged += 1;
    }
    fn note_declined(&mut self) {
        self.processed += 1;
        self.declined += 1;
    }
    fn note_failed(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }
    fn note_skipped(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }
}

/// Per-store result of one charge job
enum StoreOutcome {
    /// Charged successfully
    Charged,
    /// Nothing due, or the window was already settled
    Skipped,
    /// Gateway declined; recorded on a failed invoice, store now past_due
    Declined,
}

/// The window a renewal purchases: the month after the period that just ended
///
/// The lapsed period was paid when it was opened (by the activation checkout
/// or the previous renewal), so keying the renewal to the lapsed period would
/// collide with that paid invoice.
fn renewal_window(period_end: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    (period_end, add_one_month(period_end))
}

/// Batch driver over all tenants
#[derive(Clone)]
pub struct BillingOrchestrator {
    pool: PgPool,
    settings: Arc<SettingsStore>,
    gateway: PaymentGatewayClient,
    ledger: InvoiceLedger,
    subscriptions: SubscriptionStateMachine,
}

impl BillingOrchestrator {
    pub fn new(
        pool: PgPool,
        settings: Arc<SettingsStore>,
        gateway: PaymentGatewayClient,
        ledger: InvoiceLedger,
        subscriptions: SubscriptionStateMachine,
    ) -> Self {
        Self {
            pool,
            settings,
            gateway,
            ledger,
            subscriptions,
        }
    }

    /// Release a store's claim after processing
    ///
    /// A lost release is harmless: the stamp expires after `CLAIM_TTL`.
    async fn release_claim(&self, store_id: Uuid) {
        if let Err(e) = sqlx::query(
            "UPDATE subscriptions SET billing_locked_at = NULL WHERE store_id = $1",
        )
        .bind(store_id)
        .execute(&self.pool)
        .await
        {
            tracing::warn!(store_id = %store_id, error = %e, "Claim release failed; it will expire");
        }
    }

    // =========================================================================
    // Renewal job
    // =========================================================================

    /// Claim the stores whose subscription period has lapsed
    ///
    /// The claim stamp is written by the same statement that selects, so an
    /// overlapping run cannot pick up a store that is still being processed;
    /// SKIP LOCKED keeps two concurrent claim statements from stalling on the
    /// same rows. Stale stamps expire after `CLAIM_TTL`.
    pub async fn find_due_renewals(&self, now: OffsetDateTime) -> BillingResult<Vec<Uuid>> {
        let stale = now - CLAIM_TTL;
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET billing_locked_at = $1
            WHERE store_id IN (
                SELECT store_id FROM subscriptions
                WHERE status = 'active' AND current_period_end <= $1
                  AND (billing_locked_at IS NULL OR billing_locked_at < $2)
                ORDER BY current_period_end ASC
                FOR UPDATE SKIP LOCKED
            )
            RETURNING store_id
            "#,
        )
        .bind(now)
        .bind(stale)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Renew every due subscription, one store at a time
    pub async fn run_renewals(&self, now: OffsetDateTime) -> BillingResult<BillingRunSummary> {
        let rates = self.settings.billing_rates().await;
        let due = self.find_due_renewals(now).await?;
        let mut summary = BillingRunSummary::default();

        tracing::info!(due = due.len(), "Renewal run starting");
        for store_id in due {
            match self.renew_one_store(store_id, &rates, now).await {
                Ok(StoreOutcome::Charged) => summary.note_charged(),
                Ok(StoreOutcome::Skipped) => summary.note_skipped(),
                Ok(StoreOutcome::Declined) => summary.note_declined(),
                Err(e) => {
                    tracing::error!(store_id = %store_id, error = %e, "Renewal failed");
                    summary.note_failed();
                }
            }
            self.release_claim(store_id).await;
        }

        tracing::info!(
            processed = summary.processed,
            charged = summary.charged,
            declined = summary.declined,
            failed = summary.failed,
            skipped = summary.skipped,
            "Renewal run complete"
        );
        Ok(summary)
    }

    /// Renew a single store's subscription
    ///
    /// The renewal charges for the month *after* the lapsed period and keys
    /// its invoice and idempotency to that window. A declined charge records
    /// a failed invoice, flips the store to past_due, and leaves the period
    /// where it is.
    async fn renew_one_store(
        &self,
        store_id: Uuid,
        rates: &BillingRates,
        now: OffsetDateTime,
    ) -> BillingResult<StoreOutcome> {
        let Some(sub) = self.subscriptions.get(store_id).await? else {
            return Err(BillingError::SubscriptionNotFound(store_id.to_string()));
        };
        let Some(period_end) = sub.current_period_end else {
            return Ok(StoreOutcome::Skipped);
        };
        if period_end > now {
            return Ok(StoreOutcome::Skipped);
        }

        let (next_start, next_end) = renewal_window(period_end);

        // A prior run already charged this window but stopped before
        // advancing; repair the period without another charge
        if self
            .ledger
            .period_is_paid(store_id, InvoiceType::Subscription, next_start, next_end)
            .await?
        {
            tracing::info!(store_id = %store_id, "Renewal window already paid, advancing period");
            self.subscriptions.advance_period(store_id).await?;
            return Ok(StoreOutcome::Skipped);
        }

        let price = subscription_price(sub.plan, sub.override_price, rates);
        if price.total < MINIMUM_CHARGE {
            return Ok(StoreOutcome::Skipped);
        }

        let description = format!("{} subscription renewal", plan_display(sub.plan));
        let outcome = if sub.token_invalid {
            // Card-health sweep flagged this token; skip the gateway round-trip
            ChargeOutcome::Declined {
                error: "stored card token is no longer valid".to_string(),
            }
        } else {
            let (customer_ref, token_ref) = gateway_refs(&sub)?;
            let key = idempotency_key(store_id, InvoiceType::Subscription, next_start, next_end);
            self.gateway
                .charge_with_token(
                    token_ref,
                    customer_ref,
                    price.total,
                    &[GatewayLineItem {
                        description: description.clone(),
                        quantity: 1,
                        unit_price: price.total,
                    }],
                    &key,
                )
                .await?
        };

        let invoice = self
            .record_charge_invoice(
                &sub,
                InvoiceType::Subscription,
                price.base,
                rates.vat_rate,
                price.vat,
                next_start,
                next_end,
                &outcome,
            )
            .await?;
        self.ledger
            .record_line_items(
                invoice.id,
                &[NewInvoiceItem {
                    description,
                    quantity: 1,
                    unit_price: price.base,
                    reference_type: Some("plan".to_string()),
                    reference_id: Some(sub.plan.as_str().to_string()),
                }],
            )
            .await?;

        match outcome {
            ChargeOutcome::Approved { .. } => {
                // Advance into the window just paid for; status stays active
                self.subscriptions.advance_period(store_id).await?;
                Ok(StoreOutcome::Charged)
            }
            ChargeOutcome::Declined { error } => {
                tracing::warn!(store_id = %store_id, error = %error, "Renewal charge declined");
                self.subscriptions.mark_past_due(store_id).await?;
                Ok(StoreOutcome::Declined)
            }
        }
    }

    // =========================================================================
    // Transaction-fee job
    // =========================================================================

    /// Claim the stores billable for transaction fees (active or past_due)
    pub async fn find_fee_billable_stores(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<Uuid>> {
        let stale = now - CLAIM_TTL;
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET billing_locked_at = $1
            WHERE store_id IN (
                SELECT store_id FROM subscriptions
                WHERE status IN ('active', 'past_due')
                  AND (billing_locked_at IS NULL OR billing_locked_at < $2)
                ORDER BY store_id ASC
                FOR UPDATE SKIP LOCKED
            )
            RETURNING store_id
            "#,
        )
        .bind(now)
        .bind(stale)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Settle accrued transaction fees for every billable store
    pub async fn run_transaction_fees(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<BillingRunSummary> {
        let rates = self.settings.billing_rates().await;
        let stores = self.find_fee_billable_stores(now).await?;
        let mut summary = BillingRunSummary::default();

        tracing::info!(stores = stores.len(), "Transaction fee run starting");
        for store_id in stores {
            match self.settle_fees_one_store(store_id, &rates, now).await {
                Ok(StoreOutcome::Charged) => summary.note_charged(),
                Ok(StoreOutcome::Skipped) => summary.note_skipped(),
                Ok(StoreOutcome::Declined) => summary.note_declined(),
                Err(e) => {
                    tracing::error!(store_id = %store_id, error = %e, "Fee settlement failed");
                    summary.note_failed();
                }
            }
            self.release_claim(store_id).await;
        }

        tracing::info!(
            processed = summary.processed,
            charged = summary.charged,
            declined = summary.declined,
            failed = summary.failed,
            skipped = summary.skipped,
            "Transaction fee run complete"
        );
        Ok(summary)
    }

    /// Settle one store's fee window `[watermark_or_activation, now)`
    ///
    /// The watermark only advances on a successful charge, so a re-run with an
    /// unchanged watermark re-computes the same orders and the order-id
    /// uniqueness constraint guarantees none of them is ever billed twice.
    async fn settle_fees_one_store(
        &self,
        store_id: Uuid,
        rates: &BillingRates,
        now: OffsetDateTime,
    ) -> BillingResult<StoreOutcome> {
        let Some(sub) = self.subscriptions.get(store_id).await? else {
            return Err(BillingError::SubscriptionNotFound(store_id.to_string()));
        };
        if !sub.status.is_billable() {
            return Ok(StoreOutcome::Skipped);
        }

        let window_start = sub
            .last_fee_period_end
            .or(sub.activated_at)
            .unwrap_or(sub.created_at);
        if window_start >= now {
            return Ok(StoreOutcome::Skipped);
        }

        let orders = paid_orders_in_window(&self.pool, store_id, window_start, now).await?;
        let (transacted_total, order_ids) = sum_orders(&orders);
        let fee = transaction_fee(transacted_total, sub.override_fee_rate, rates);

        if fee.total_fee < MINIMUM_CHARGE {
            // Below minimum: no invoice, watermark unchanged; orders roll into
            // the next window
            tracing::debug!(
                store_id = %store_id,
                accrued = %fee.total_fee,
                "Fee window under minimum charge, deferring"
            );
            return Ok(StoreOutcome::Skipped);
        }

        let (customer_ref, token_ref) = gateway_refs(&sub)?;
        let description = format!(
            "Transaction fees on {} orders (rate {})",
            order_ids.len(),
            fee.applied_rate
        );
        let key = idempotency_key(store_id, InvoiceType::TransactionFee, window_start, now);
        let outcome = self
            .gateway
            .charge_with_token(
                token_ref,
                customer_ref,
                fee.total_fee,
                &[GatewayLineItem {
                    description: description.clone(),
                    quantity: 1,
                    unit_price: fee.total_fee,
                }],
                &key,
            )
            .await?;

        let invoice = self
            .record_charge_invoice(
                &sub,
                InvoiceType::TransactionFee,
                fee.fee_amount,
                rates.vat_rate,
                fee.vat_amount,
                window_start,
                now,
                &outcome,
            )
            .await?;
        self.ledger
            .record_line_items(
                invoice.id,
                &[NewInvoiceItem {
                    description,
                    quantity: 1,
                    unit_price: fee.fee_amount,
                    reference_type: Some("fee_period".to_string()),
                    reference_id: Some(format!("{}", now.unix_timestamp())),
                }],
            )
            .await?;

        match outcome {
            ChargeOutcome::Approved { .. } => {
                record_fee_period(
                    &self.pool,
                    store_id,
                    window_start,
                    now,
                    transacted_total,
                    fee.applied_rate,
                    fee.fee_amount,
                    invoice.id,
                    &order_ids,
                )
                .await?;
                self.subscriptions.set_fee_watermark(store_id, now).await?;
                // A past_due store recovers on any successful charge
                self.subscriptions.restore_active(store_id).await?;
                Ok(StoreOutcome::Charged)
            }
            ChargeOutcome::Declined { error } => {
                tracing::warn!(store_id = %store_id, error = %error, "Fee charge declined");
                // No-op when already past_due
                self.subscriptions.mark_past_due(store_id).await?;
                Ok(StoreOutcome::Declined)
            }
        }
    }

    // =========================================================================
    // Plugin-fee job
    // =========================================================================

    /// Claim the stores with at least one subscribed plugin whose billing
    /// date is due
    pub async fn find_due_plugin_stores(&self, now: OffsetDateTime) -> BillingResult<Vec<Uuid>> {
        let stale = now - CLAIM_TTL;
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET billing_locked_at = $1
            WHERE store_id IN (
                SELECT s.store_id FROM subscriptions s
                JOIN store_plugins sp ON sp.store_id = s.store_id
                WHERE s.status IN ('active', 'past_due')
                  AND sp.subscribed = true
                  AND sp.next_billing_date <= $1
                  AND (s.billing_locked_at IS NULL OR s.billing_locked_at < $2)
                FOR UPDATE OF s SKIP LOCKED
            )
            RETURNING store_id
            "#,
        )
        .bind(now)
        .bind(stale)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Bill every store's due plugins as one combined charge per store
    pub async fn run_plugin_fees(&self, now: OffsetDateTime) -> BillingResult<BillingRunSummary> {
        let rates = self.settings.billing_rates().await;
        let stores = self.find_due_plugin_stores(now).await?;
        let mut summary = BillingRunSummary::default();

        tracing::info!(stores = stores.len(), "Plugin fee run starting");
        for store_id in stores {
            match self.bill_plugins_one_store(store_id, &rates, now).await {
                Ok(StoreOutcome::Charged) => summary.note_charged(),
                Ok(StoreOutcome::Skipped) => summary.note_skipped(),
                Ok(StoreOutcome::Declined) => summary.note_declined(),
                Err(e) => {
                    tracing::error!(store_id = %store_id, error = %e, "Plugin billing failed");
                    summary.note_failed();
                }
            }
            self.release_claim(store_id).await;
        }

        tracing::info!(
            processed = summary.processed,
            charged = summary.charged,
            declined = summary.declined,
            failed = summary.failed,
            skipped = summary.skipped,
            "Plugin fee run complete"
        );
        Ok(summary)
    }

    /// One combined charge covering all of a store's due plugins
    async fn bill_plugins_one_store(
        &self,
        store_id: Uuid,
        rates: &BillingRates,
        now: OffsetDateTime,
    ) -> BillingResult<StoreOutcome> {
        let Some(sub) = self.subscriptions.get(store_id).await? else {
            return Err(BillingError::SubscriptionNotFound(store_id.to_string()));
        };
        if !sub.status.is_billable() {
            return Ok(StoreOutcome::Skipped);
        }

        let plugins = due_plugins_for_store(&self.pool, store_id, now).await?;
        if plugins.is_empty() {
            return Ok(StoreOutcome::Skipped);
        }

        let subtotal: Decimal = plugins.iter().map(|p| p.monthly_price).sum();
        let vat_amount = round2(subtotal * rates.vat_rate);
        let total = subtotal + vat_amount;
        if total < MINIMUM_CHARGE {
            return Ok(StoreOutcome::Skipped);
        }

        // The covered month starts at the earliest due date, so a retried run
        // addresses the same period and carries the same idempotency key
        let period_start = plugins
            .iter()
            .map(|p| p.next_billing_date)
            .min()
            .unwrap_or(now);
        let period_end = add_one_month(period_start);

        if self
            .ledger
            .period_is_paid(store_id, InvoiceType::Plugin, period_start, period_end)
            .await?
        {
            return Ok(StoreOutcome::Skipped);
        }

        let (customer_ref, token_ref) = gateway_refs(&sub)?;
        let description = format!("Monthly plugin fees ({} plugins)", plugins.len());
        let key = idempotency_key(store_id, InvoiceType::Plugin, period_start, period_end);
        let outcome = self
            .gateway
            .charge_with_token(
                token_ref,
                customer_ref,
                total,
                &[GatewayLineItem {
                    description: description.clone(),
                    quantity: 1,
                    unit_price: total,
                }],
                &key,
            )
            .await?;

        let invoice = self
            .record_charge_invoice(
                &sub,
                InvoiceType::Plugin,
                subtotal,
                rates.vat_rate,
                vat_amount,
                period_start,
                period_end,
                &outcome,
            )
            .await?;

        let items: Vec<NewInvoiceItem> = plugins
            .iter()
            .map(|p| NewInvoiceItem {
                description: format!("Plugin: {}", p.plugin_slug),
                quantity: 1,
                unit_price: p.monthly_price,
                reference_type: Some("plugin".to_string()),
                reference_id: Some(p.plugin_slug.clone()),
            })
            .collect();
        self.ledger.record_line_items(invoice.id, &items).await?;

        match outcome {
            ChargeOutcome::Approved { .. } => {
                for plugin in &plugins {
                    let next = add_one_month(plugin.next_billing_date);
                    advance_plugin_billing_date(&self.pool, store_id, &plugin.plugin_slug, next)
                        .await?;
                }
                self.subscriptions.restore_active(store_id).await?;
                Ok(StoreOutcome::Charged)
            }
            ChargeOutcome::Declined { error } => {
                tracing::warn!(store_id = %store_id, error = %error, "Plugin charge declined");
                self.subscriptions.mark_past_due(store_id).await?;
                Ok(StoreOutcome::Declined)
            }
        }
    }

    // =========================================================================
    // Trial expiry job
    // =========================================================================

    /// Expire trials that lapsed without activation, deactivating storefronts
    pub async fn expire_lapsed_trials(
        &self,
        now: OffsetDateTime,
    ) -> BillingResult<BillingRunSummary> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT store_id FROM subscriptions
            WHERE status = 'trial' AND trial_ends_at < $1
            ORDER BY trial_ends_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = BillingRunSummary::default();
        for (store_id,) in rows {
            match self.subscriptions.expire(store_id, now).await {
                Ok(t) if t.applied().is_some() => summary.note_charged(),
                Ok(_) => summary.note_skipped(),
                Err(e) => {
                    tracing::error!(store_id = %store_id, error = %e, "Trial expiry failed");
                    summary.note_failed();
                }
            }
        }

        if summary.processed > 0 {
            tracing::info!(
                expired = summary.charged,
                skipped = summary.skipped,
                failed = summary.failed,
                "Trial expiry run complete"
            );
        }
        Ok(summary)
    }

    // =========================================================================
    // Card-health sweep
    // =========================================================================

    /// Proactively validate stored tokens for active subscriptions
    ///
    /// Flagged subscriptions fail their next renewal fast, without a doomed
    /// gateway round-trip.
    pub async fn card_health_sweep(&self) -> BillingResult<BillingRunSummary> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT store_id, gateway_token_ref FROM subscriptions
            WHERE status IN ('active', 'past_due')
              AND gateway_token_ref IS NOT NULL
              AND token_invalid = false
            ORDER BY store_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = BillingRunSummary::default();
        for (store_id, token_ref) in rows {
            match self.gateway.check_token(&token_ref).await {
                Ok(true) => summary.note_skipped(),
                Ok(false) => {
                    tracing::warn!(store_id = %store_id, "Stored card token invalid, flagging");
                    self.subscriptions.flag_token_invalid(store_id).await?;
                    summary.note_charged();
                }
                Err(e) => {
                    tracing::warn!(store_id = %store_id, error = %e, "Token check failed, leaving unflagged");
                    summary.note_failed();
                }
            }
        }

        tracing::info!(
            checked = summary.processed,
            flagged = summary.charged,
            errors = summary.failed,
            "Card health sweep complete"
        );
        Ok(summary)
    }

    // =========================================================================
    // Shared
    // =========================================================================

    /// Persist the invoice reflecting a charge attempt's actual outcome
    #[allow(clippy::too_many_arguments)]
    async fn record_charge_invoice(
        &self,
        sub: &Subscription,
        invoice_type: InvoiceType,
        subtotal: Decimal,
        vat_rate: Decimal,
        vat_amount: Decimal,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        outcome: &ChargeOutcome,
    ) -> BillingResult<crate::ledger::Invoice> {
        let (status, transaction_id, gateway_ref, error) = match outcome {
            ChargeOutcome::Approved {
                transaction_id,
                gateway_invoice_ref,
            } => (
                InvoiceStatus::Paid,
                Some(transaction_id.clone()),
                gateway_invoice_ref.clone(),
                None,
            ),
            ChargeOutcome::Declined { error } => {
                (InvoiceStatus::Failed, None, None, Some(error.clone()))
            }
        };

        self.ledger
            .record_invoice(NewInvoice {
                store_id: sub.store_id,
                subscription_id: sub.id,
                invoice_type,
                status,
                subtotal,
                vat_rate,
                vat_amount,
                period_start,
                period_end,
                gateway_transaction_id: transaction_id,
                gateway_invoice_ref: gateway_ref,
                last_error: error,
            })
            .await
    }
}

fn plan_display(plan: Plan) -> &'static str {
    match plan {
        Plan::Trial => "Trial",
        Plan::PlanA => "Plan A",
        Plan::PlanB => "Plan B",
    }
}

fn gateway_refs(sub: &Subscription) -> BillingResult<(&str, &str)> {
    let customer_ref = sub
        .gateway_customer_ref
        .as_deref()
        .ok_or_else(|| BillingError::Internal("billable subscription without customer ref".to_string()))?;
    let token_ref = sub
        .gateway_token_ref
        .as_deref()
        .ok_or_else(|| BillingError::Internal("billable subscription without token ref".to_string()))?;
    Ok((customer_ref, token_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn renewal_window_is_the_month_after_the_lapsed_period() {
        let (start, end) = renewal_window(datetime!(2026-07-25 00:00 UTC));
        assert_eq!(start, datetime!(2026-07-25 00:00 UTC));
        assert_eq!(end, datetime!(2026-08-25 00:00 UTC));
    }

    #[test]
    fn renewal_window_never_overlaps_the_paid_first_period() {
        // The activation checkout pays [activation, first period end); the
        // first renewal must start exactly at that end, not inside it
        let first_period_end = datetime!(2026-02-28 00:00 UTC);
        let (start, end) = renewal_window(first_period_end);
        assert_eq!(start, first_period_end);
        assert!(end > start);
    }

    #[test]
    fn declines_are_counted_apart_from_skips() {
        let mut summary = BillingRunSummary::default();
        summary.note_charged();
        summary.note_skipped();
        summary.note_declined();
        summary.note_declined();
        summary.note_failed();
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.charged, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.declined, 2);
        assert_eq!(summary.failed, 1);
    }
}
