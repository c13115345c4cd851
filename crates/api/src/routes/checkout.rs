//! Activation checkout
//!
//! Opens a hosted payment page for a trial store converting to a paid plan.
//! The gateway mints a reusable card token during this checkout; the actual
//! activation happens when the signed gateway callback arrives.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use quickshop_billing::gateway::{CustomerProfile, InitiatePaymentRequest};
use quickshop_billing::{subscription_price, GatewayLineItem};
use quickshop_shared::{get_store, Plan, SubscriptionStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub store_id: Uuid,
    pub plan: Plan,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub payment_url: String,
    pub request_id: String,
}

/// POST /billing/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    if !req.plan.is_paid() {
        return Err(ApiError::BadRequest(
            "checkout requires a paid plan".to_string(),
        ));
    }

    let store = get_store(&state.pool, req.store_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let subscription = state
        .billing
        .subscriptions
        .get_or_create(req.store_id)
        .await?;
    if subscription.status != SubscriptionStatus::Trial {
        return Err(ApiError::Conflict(format!(
            "subscription is {}, only trial stores can check out",
            subscription.status.as_str()
        )));
    }

    let rates = state.billing.settings.billing_rates().await;
    let price = subscription_price(req.plan, subscription.override_price, &rates);

    let customer_ref = state
        .billing
        .gateway
        .get_or_create_customer(&CustomerProfile {
            store_id: store.id,
            email: store.owner_email.clone(),
            name: store.name.clone(),
        })
        .await?;

    let app_base = &state.billing.gateway.config().app_base_url;
    let initiated = state
        .billing
        .gateway
        .initiate_payment(&InitiatePaymentRequest {
            customer_ref,
            amount: price.total,
            line_items: vec![GatewayLineItem {
                description: format!("{} subscription (first month, VAT included)", plan_label(req.plan)),
                quantity: 1,
                unit_price: price.total,
            }],
            success_url: format!("{app_base}/admin/billing/success"),
            failure_url: format!("{app_base}/admin/billing/failure"),
            callback_url: format!("{app_base}/billing/callback"),
            // Echoed back in the callback for correlation
            metadata: json!({
                "store_id": store.id,
                "plan": req.plan,
                "base": price.base,
                "vat": price.vat,
                "total": price.total,
            }),
        })
        .await?;

    tracing::info!(
        store_id = %store.id,
        plan = %req.plan.as_str(),
        request_id = %initiated.request_id,
        "Checkout initiated"
    );

    Ok(Json(CheckoutResponse {
        payment_url: initiated.payment_url,
        request_id: initiated.request_id,
    }))
}

fn plan_label(plan: Plan) -> &'static str {
    match plan {
        Plan::Trial => "Trial",
        Plan::PlanA => "Plan A",
        Plan::PlanB => "Plan B",
    }
}
