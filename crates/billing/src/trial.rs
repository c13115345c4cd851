//! Trial reconciliation
//!
//! Transaction fees accrue during the free trial and are settled in one shot
//! when the store converts to paid, using the card token minted by the
//! activation checkout. Settlement is best-effort by design: failing to
//! collect a small trial-period fee must never stop a paying customer from
//! starting their subscription. The caller (the state machine's `activate`)
//! logs a reconciliation error and proceeds.

use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;

use quickshop_shared::{paid_orders_in_window, sum_orders, InvoiceStatus, InvoiceType};

use crate::error::{BillingError, BillingResult};
use crate::fees::record_fee_period;
use crate::gateway::{idempotency_key, ChargeOutcome, GatewayLineItem, PaymentGatewayClient};
use crate::ledger::{InvoiceLedger, NewInvoice, NewInvoiceItem};
use crate::pricing::{transaction_fee, MINIMUM_CHARGE};
use crate::settings::SettingsStore;
use crate::subscription::Subscription;

/// What the reconciliation pass did
#[derive(Debug, Clone)]
pub enum TrialSettlement {
    /// Accrued fee under the minimum charge; the trial is fee-free
    FeeFree { accrued: Decimal },
    /// Fee charged and invoiced as paid
    Settled { invoice_number: String },
    /// Charge declined; invoiced as failed, activation unaffected
    ChargeFailed {
        invoice_number: String,
        error: String,
    },
}

/// Settles trial-window transaction fees at conversion time
#[derive(Clone)]
pub struct TrialReconciliationEngine {
    pool: PgPool,
    gateway: PaymentGatewayClient,
    ledger: InvoiceLedger,
    settings: Arc<SettingsStore>,
}

impl TrialReconciliationEngine {
    pub fn new(
        pool: PgPool,
        gateway: PaymentGatewayClient,
        ledger: InvoiceLedger,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            pool,
            gateway,
            ledger,
            settings,
        }
    }

    /// Settle fees for the trial window `[trial_start, now)`
    ///
    /// Runs synchronously inside activation. The subscription passed in is the
    /// just-activated record carrying the fresh gateway refs.
    pub async fn reconcile(
        &self,
        subscription: &Subscription,
        trial_start: OffsetDateTime,
        now: OffsetDateTime,
    ) -> BillingResult<TrialSettlement> {
        let store_id = subscription.store_id;
        let orders = paid_orders_in_window(&self.pool, store_id, trial_start, now).await?;
        let (transacted_total, order_ids) = sum_orders(&orders);

        let rates = self.settings.billing_rates().await;
        let fee = transaction_fee(transacted_total, subscription.override_fee_rate, &rates);

        if fee.total_fee < MINIMUM_CHARGE {
            tracing::info!(
                store_id = %store_id,
                accrued = %fee.total_fee,
                orders = order_ids.len(),
                "Trial fees under minimum charge, treating trial as fee-free"
            );
            return Ok(TrialSettlement::FeeFree {
                accrued: fee.total_fee,
            });
        }

        let customer_ref = subscription
            .gateway_customer_ref
            .as_deref()
            .ok_or_else(|| BillingError::Internal("activated without customer ref".to_string()))?;
        let token_ref = subscription
            .gateway_token_ref
            .as_deref()
            .ok_or_else(|| BillingError::Internal("activated without token ref".to_string()))?;

        let description = format!(
            "Trial period transaction fees ({} orders, rate {})",
            order_ids.len(),
            fee.applied_rate
        );
        let line_items = vec![GatewayLineItem {
            description: description.clone(),
            quantity: 1,
            unit_price: fee.total_fee,
        }];
        let key = idempotency_key(store_id, InvoiceType::TransactionFee, trial_start, now);

        // Charge first, then persist the invoice reflecting the actual outcome
        let outcome = self
            .gateway
            .charge_with_token(token_ref, customer_ref, fee.total_fee, &line_items, &key)
            .await?;

        let (status, transaction_id, gateway_ref, error) = match &outcome {
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

        let invoice = self
            .ledger
            .record_invoice(NewInvoice {
                store_id,
                subscription_id: subscription.id,
                invoice_type: InvoiceType::TransactionFee,
                status,
                subtotal: fee.fee_amount,
                vat_rate: rates.vat_rate,
                vat_amount: fee.vat_amount,
                period_start: trial_start,
                period_end: now,
                gateway_transaction_id: transaction_id,
                gateway_invoice_ref: gateway_ref,
                last_error: error.clone(),
            })
            .await?;

        self.ledger
            .record_line_items(
                invoice.id,
                &[NewInvoiceItem {
                    description,
                    quantity: 1,
                    unit_price: fee.fee_amount,
                    reference_type: Some("fee_period".to_string()),
                    reference_id: Some(format!("trial:{}", now.unix_timestamp())),
                }],
            )
            .await?;

        match outcome {
            ChargeOutcome::Approved { .. } => {
                record_fee_period(
                    &self.pool,
                    store_id,
                    trial_start,
                    now,
                    transacted_total,
                    fee.applied_rate,
                    fee.fee_amount,
                    invoice.id,
                    &order_ids,
                )
                .await?;

                tracing::info!(
                    store_id = %store_id,
                    invoice_number = %invoice.invoice_number,
                    total = %fee.total_fee,
                    "Trial fees settled"
                );
                Ok(TrialSettlement::Settled {
                    invoice_number: invoice.invoice_number,
                })
            }
            ChargeOutcome::Declined { error } => {
                tracing::warn!(
                    store_id = %store_id,
                    invoice_number = %invoice.invoice_number,
                    error = %error,
                    "Trial fee charge declined; recorded and forgiven"
                );
                Ok(TrialSettlement::ChargeFailed {
                    invoice_number: invoice.invoice_number,
                    error,
                })
            }
        }
    }
}
