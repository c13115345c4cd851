//! Payment gateway client
//!
//! Boundary to the external tokenized-payment gateway. The gateway hosts the
//! card-entry page; we never see PANs, only an opaque reusable token minted
//! during the first hosted checkout (`create_token: true`). All later charges
//! are server-to-server against that token.
//!
//! Transport failures, timeouts and non-2xx responses are all surfaced as a
//! `ChargeOutcome::Declined` with the gateway's (or transport's) error string.
//! This client never retries on its own; retries belong to the next scheduled
//! batch run.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

use quickshop_shared::InvoiceType;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Bounded timeout for all gateway calls
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the payment gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway API key (sent as the `api-key` header)
    pub api_key: String,
    /// Gateway secret key (sent as the `secret-key` header; also the shared
    /// secret for callback signatures)
    pub secret_key: String,
    /// Gateway REST base URL
    pub base_url: String,
    /// Base URL for success/failure redirects and the callback endpoint
    pub app_base_url: String,
}

impl GatewayConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            api_key: std::env::var("GATEWAY_API_KEY")
                .map_err(|_| BillingError::Config("GATEWAY_API_KEY not set".to_string()))?,
            secret_key: std::env::var("GATEWAY_SECRET_KEY")
                .map_err(|_| BillingError::Config("GATEWAY_SECRET_KEY not set".to_string()))?,
            base_url: std::env::var("GATEWAY_BASE_URL")
                .map_err(|_| BillingError::Config("GATEWAY_BASE_URL not set".to_string()))?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

/// Customer profile used for gateway customer creation
#[derive(Debug, Clone, Serialize)]
pub struct CustomerProfile {
    pub store_id: Uuid,
    pub email: String,
    pub name: String,
}

/// A line item as the gateway displays it on the hosted page / invoice
#[derive(Debug, Clone, Serialize)]
pub struct GatewayLineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Request to open a hosted payment page
#[derive(Debug, Clone)]
pub struct InitiatePaymentRequest {
    pub customer_ref: String,
    pub amount: Decimal,
    pub line_items: Vec<GatewayLineItem>,
    pub success_url: String,
    pub failure_url: String,
    pub callback_url: String,
    /// Echoed back verbatim in the gateway callback for correlation
    pub metadata: serde_json::Value,
}

/// Hosted payment page handle
#[derive(Debug, Clone, Deserialize)]
pub struct InitiatedPayment {
    pub payment_url: String,
    pub request_id: String,
}

/// Result of a server-to-server token charge
///
/// Both arms are an `Ok` from the client's perspective; only infrastructure
/// problems on our side (building the request) are `Err`.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Approved {
        transaction_id: String,
        gateway_invoice_ref: Option<String>,
    },
    Declined {
        error: String,
    },
}

impl ChargeOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}

/// Idempotency key for a charge attempt, derived from what is being billed
///
/// A retried batch run after an ambiguous network failure sends the same key,
/// so the gateway can collapse the duplicate.
pub fn idempotency_key(
    store_id: Uuid,
    invoice_type: InvoiceType,
    period_start: OffsetDateTime,
    period_end: OffsetDateTime,
) -> String {
    format!(
        "{}:{}:{}:{}",
        store_id,
        invoice_type.as_str(),
        period_start.unix_timestamp(),
        period_end.unix_timestamp()
    )
}

// Wire types, gateway side

#[derive(Debug, Deserialize)]
struct CustomerSearchResponse {
    customers: Vec<GatewayCustomer>,
}

#[derive(Debug, Deserialize)]
struct GatewayCustomer {
    customer_ref: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    status: String,
    transaction_id: Option<String>,
    invoice_ref: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenStatusResponse {
    valid: bool,
}

/// Payment gateway REST client
#[derive(Clone)]
pub struct PaymentGatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl PaymentGatewayClient {
    pub fn new(config: GatewayConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("api-key", &self.config.api_key)
            .header("secret-key", &self.config.secret_key)
    }

    /// Get or create a gateway customer, idempotent by email
    ///
    /// Searches first and only creates when absent, so a re-run never mints a
    /// duplicate customer record gateway-side.
    pub async fn get_or_create_customer(&self, profile: &CustomerProfile) -> BillingResult<String> {
        let search: CustomerSearchResponse = self
            .authed(self.http.post(self.url("customers/search")))
            .json(&serde_json::json!({ "email": profile.email }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(existing) = search.customers.into_iter().next() {
            tracing::debug!(
                store_id = %profile.store_id,
                customer_ref = %existing.customer_ref,
                "Found existing gateway customer"
            );
            return Ok(existing.customer_ref);
        }

        let created: GatewayCustomer = self
            .authed(self.http.post(self.url("customers")))
            .json(&serde_json::json!({
                "email": profile.email,
                "name": profile.name,
                "external_id": profile.store_id,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!(
            store_id = %profile.store_id,
            customer_ref = %created.customer_ref,
            "Created gateway customer"
        );
        Ok(created.customer_ref)
    }

    /// Open a hosted payment page
    ///
    /// `create_token: true` makes the gateway mint a reusable card token as a
    /// side effect of the checkout, enabling every later charge without the
    /// customer re-entering card details.
    pub async fn initiate_payment(
        &self,
        req: &InitiatePaymentRequest,
    ) -> BillingResult<InitiatedPayment> {
        let body = serde_json::json!({
            "customer_ref": req.customer_ref,
            "amount": req.amount,
            "line_items": req.line_items,
            "success_url": req.success_url,
            "failure_url": req.failure_url,
            "callback_url": req.callback_url,
            "metadata": req.metadata,
            "create_token": true,
        });

        let initiated: InitiatedPayment = self
            .authed(self.http.post(self.url("payment-pages")))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!(request_id = %initiated.request_id, "Hosted payment page created");
        Ok(initiated)
    }

    /// Charge a stored card token, server-to-server
    ///
    /// Returns `Declined` for any failure mode the gateway or the network can
    /// produce; the caller decides what a decline means for the subscription.
    pub async fn charge_with_token(
        &self,
        token_ref: &str,
        customer_ref: &str,
        amount: Decimal,
        line_items: &[GatewayLineItem],
        idempotency_key: &str,
    ) -> BillingResult<ChargeOutcome> {
        let body = serde_json::json!({
            "token_ref": token_ref,
            "customer_ref": customer_ref,
            "amount": amount,
            "line_items": line_items,
        });

        let response = self
            .authed(self.http.post(self.url("charges")))
            .header("x-idempotency-key", idempotency_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                // Timeout or transport failure: a charge failure, never a success
                tracing::warn!(error = %e, "Gateway charge transport failure");
                return Ok(ChargeOutcome::Declined {
                    error: format!("gateway unreachable: {e}"),
                });
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, detail = %detail, "Gateway charge rejected");
            return Ok(ChargeOutcome::Declined {
                error: format!("gateway returned {status}: {detail}"),
            });
        }

        let parsed: ChargeResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return Ok(ChargeOutcome::Declined {
                    error: format!("unreadable gateway response: {e}"),
                })
            }
        };

        if parsed.status == "success" {
            let transaction_id = parsed.transaction_id.ok_or_else(|| {
                BillingError::Gateway("success response without transaction_id".to_string())
            })?;
            Ok(ChargeOutcome::Approved {
                transaction_id,
                gateway_invoice_ref: parsed.invoice_ref,
            })
        } else {
            Ok(ChargeOutcome::Declined {
                error: parsed
                    .error_message
                    .unwrap_or_else(|| "declined without reason".to_string()),
            })
        }
    }

    /// Check whether a stored token is still chargeable
    pub async fn check_token(&self, token_ref: &str) -> BillingResult<bool> {
        let status: TokenStatusResponse = self
            .authed(
                self.http
                    .get(self.url(&format!("tokens/{token_ref}/status"))),
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status.valid)
    }

    /// Remove a stored token (card removed or store cancelled)
    pub async fn remove_token(&self, token_ref: &str) -> BillingResult<()> {
        self.authed(self.http.delete(self.url(&format!("tokens/{token_ref}"))))
            .send()
            .await?
            .error_for_status()?;
        tracing::info!("Gateway token removed");
        Ok(())
    }
}

/// Verify a callback's HMAC-SHA256 signature (base64) over the raw body
///
/// The signature must be recomputed over the exact raw bytes as received; any
/// mismatch means the callback is untrusted and must cause no state change.
pub fn verify_callback_signature(
    raw_body: &[u8],
    signature: &str,
    secret: &str,
) -> BillingResult<()> {
    let expected = BASE64
        .decode(signature.trim())
        .map_err(|_| BillingError::CallbackSignatureInvalid)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::CallbackSignatureInvalid)?;
    mac.update(raw_body);

    // verify_slice is constant-time
    mac.verify_slice(&expected)
        .map_err(|_| BillingError::CallbackSignatureInvalid)
}

/// Compute the base64 HMAC-SHA256 signature for a body (test/tooling helper)
pub fn sign_callback_body(raw_body: &[u8], secret: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::CallbackSignatureInvalid)?;
    mac.update(raw_body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = br#"{"status":"success","request_id":"req_1"}"#;
        let sig = sign_callback_body(body, "shared-secret").unwrap();
        assert!(verify_callback_signature(body, &sig, "shared-secret").is_ok());
    }

    #[test]
    fn signature_rejects_tampered_body() {
        let body = br#"{"status":"success"}"#;
        let sig = sign_callback_body(body, "shared-secret").unwrap();
        let tampered = br#"{"status":"failure"}"#;
        assert!(verify_callback_signature(tampered, &sig, "shared-secret").is_err());
    }

    #[test]
    fn signature_rejects_wrong_secret() {
        let body = br#"{"status":"success"}"#;
        let sig = sign_callback_body(body, "secret-a").unwrap();
        assert!(verify_callback_signature(body, &sig, "secret-b").is_err());
    }

    #[test]
    fn signature_rejects_garbage() {
        assert!(verify_callback_signature(b"body", "not base64 !!!", "secret").is_err());
        assert!(verify_callback_signature(b"body", "", "secret").is_err());
    }

    #[test]
    fn idempotency_key_is_stable_per_period() {
        let store = Uuid::new_v4();
        let start = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let end = OffsetDateTime::from_unix_timestamp(1_702_592_000).unwrap();

        let a = idempotency_key(store, InvoiceType::Subscription, start, end);
        let b = idempotency_key(store, InvoiceType::Subscription, start, end);
        assert_eq!(a, b);

        let other_type = idempotency_key(store, InvoiceType::TransactionFee, start, end);
        assert_ne!(a, other_type);

        let other_store = idempotency_key(Uuid::new_v4(), InvoiceType::Subscription, start, end);
        assert_ne!(a, other_store);
    }
}
