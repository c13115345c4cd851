//! Payment gateway callback webhook
//!
//! The gateway signs every callback with HMAC-SHA256 (base64) over the raw
//! body. Verification happens against the raw bytes before anything is
//! parsed; a mismatch is logged and dropped with no state change.
//!
//! Two callback kinds arrive here:
//! - checkout completion (carries a fresh card token + masked card): drives
//!   trial activation
//! - async charge settlement (carries our gateway invoice ref): correlates
//!   back to the invoice ledger

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use quickshop_billing::verify_callback_signature;
use quickshop_billing::{NewInvoice, NewInvoiceItem};
use quickshop_shared::{CardInfo, InvoiceStatus, InvoiceType, Plan};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Deserialize)]
struct CallbackPayload {
    request_id: String,
    status: String,
    transaction_id: Option<String>,
    invoice_ref: Option<String>,
    customer_ref: Option<String>,
    token_ref: Option<String>,
    card: Option<CardInfo>,
    error_message: Option<String>,
    metadata: Option<CallbackMetadata>,
}

/// Caller-supplied metadata echoed back by the gateway
#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    store_id: Uuid,
    plan: Option<Plan>,
    base: Option<Decimal>,
    vat: Option<Decimal>,
}

/// POST /billing/callback
pub async fn gateway_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::SignatureInvalid)?;

    let secret = &state.billing.gateway.config().secret_key;
    if let Err(e) = verify_callback_signature(&body, signature, secret) {
        tracing::warn!(error = %e, "Discarding callback with bad signature");
        return Err(ApiError::SignatureInvalid);
    }

    let payload: CallbackPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("unreadable callback body: {e}")))?;

    tracing::info!(
        request_id = %payload.request_id,
        status = %payload.status,
        "Gateway callback received"
    );

    match payload.status.as_str() {
        "success" => handle_success(&state, payload).await?,
        "failure" => handle_failure(&state, payload).await,
        other => {
            tracing::warn!(status = %other, "Unknown callback status, ignoring");
        }
    }

    Ok(Json(json!({ "received": true })))
}

/// Successful payment: either a checkout completion (activation) or an async
/// settlement of a token charge
async fn handle_success(state: &AppState, payload: CallbackPayload) -> ApiResult<()> {
    // A fresh token + card means the hosted checkout completed
    if let (Some(token_ref), Some(card)) = (payload.token_ref.as_deref(), payload.card.as_ref()) {
        let meta = payload
            .metadata
            .as_ref()
            .ok_or_else(|| ApiError::BadRequest("checkout callback without metadata".to_string()))?;
        let plan = meta
            .plan
            .ok_or_else(|| ApiError::BadRequest("checkout callback without plan".to_string()))?;
        let customer_ref = payload
            .customer_ref
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("checkout callback without customer".to_string()))?;

        let transition = state
            .billing
            .subscriptions
            .activate(
                meta.store_id,
                plan,
                customer_ref,
                token_ref,
                card,
                &state.billing.trial,
            )
            .await?;

        let Some(subscription) = transition.applied() else {
            // Duplicate or late callback; activation already happened
            tracing::info!(store_id = %meta.store_id, "Activation callback was a no-op");
            return Ok(());
        };

        // Invoice the first subscription period the checkout just paid for
        if let (Some(period_start), Some(period_end), Some(base), Some(vat)) = (
            subscription.current_period_start,
            subscription.current_period_end,
            meta.base,
            meta.vat,
        ) {
            let rates = state.billing.settings.billing_rates().await;
            let invoice = state
                .billing
                .ledger
                .record_invoice(NewInvoice {
                    store_id: meta.store_id,
                    subscription_id: subscription.id,
                    invoice_type: InvoiceType::Subscription,
                    status: InvoiceStatus::Paid,
                    subtotal: base,
                    vat_rate: rates.vat_rate,
                    vat_amount: vat,
                    period_start,
                    period_end,
                    gateway_transaction_id: payload.transaction_id.clone(),
                    gateway_invoice_ref: payload.invoice_ref.clone(),
                    last_error: None,
                })
                .await?;
            state
                .billing
                .ledger
                .record_line_items(
                    invoice.id,
                    &[NewInvoiceItem {
                        description: format!("{} subscription (first month)", plan.as_str()),
                        quantity: 1,
                        unit_price: base,
                        reference_type: Some("plan".to_string()),
                        reference_id: Some(plan.as_str().to_string()),
                    }],
                )
                .await?;
        }

        tracing::info!(store_id = %meta.store_id, "Store activated from checkout callback");
        return Ok(());
    }

    // Otherwise: async settlement of an earlier token charge
    if let (Some(invoice_ref), Some(transaction_id)) =
        (payload.invoice_ref.as_deref(), payload.transaction_id.as_deref())
    {
        let updated = state
            .billing
            .ledger
            .mark_paid_by_gateway_ref(invoice_ref, transaction_id)
            .await?;
        if let Some(invoice) = updated {
            // Any successful charge recovers a past_due store
            state
                .billing
                .subscriptions
                .restore_active(invoice.store_id)
                .await?;
        }
        return Ok(());
    }

    tracing::warn!("Success callback without token or invoice ref, nothing to correlate");
    Ok(())
}

/// Failed payment: record the failure, no subscription state change (a failed
/// checkout just leaves the store in trial)
async fn handle_failure(state: &AppState, payload: CallbackPayload) {
    let error = payload
        .error_message
        .unwrap_or_else(|| "payment failed".to_string());

    if let Some(invoice_ref) = payload.invoice_ref.as_deref() {
        if let Err(e) = state
            .billing
            .ledger
            .mark_failed_by_gateway_ref(invoice_ref, &error)
            .await
        {
            tracing::error!(invoice_ref = %invoice_ref, error = %e, "Failed to record callback failure");
        }
    }

    tracing::warn!(
        request_id = %payload.request_id,
        error = %error,
        "Gateway reported payment failure"
    );
}
