// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Charge recording carries full invoice context
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Quickshop Billing Engine
//!
//! Recurring billing and subscription lifecycle for the platform's tenant
//! stores.
//!
//! ## Components
//!
//! - **SettingsStore**: cached platform pricing configuration with explicit
//!   invalidation
//! - **PricingCalculator**: VAT-inclusive subscription and transaction-fee
//!   math with deterministic rounding
//! - **PaymentGatewayClient**: tokenized-payment gateway boundary (hosted
//!   checkout, token charges, callback signatures)
//! - **InvoiceLedger**: tamper-evident sequential invoices plus line items
//! - **SubscriptionStateMachine**: trial/active/past_due/cancelled/expired
//!   lifecycle
//! - **TrialReconciliationEngine**: settles trial-period fees at conversion
//! - **BillingOrchestrator**: scheduled renewal, transaction-fee and
//!   plugin-fee settlement cycles

pub mod error;
pub mod fees;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod periods;
pub mod pricing;
pub mod settings;
pub mod subscription;
pub mod trial;

#[cfg(test)]
mod edge_case_tests;
#[cfg(test)]
mod scenario_tests;

use std::sync::Arc;

use sqlx::PgPool;

// Error
pub use error::{BillingError, BillingResult};

// Fees
pub use fees::TransactionFeeRecord;

// Gateway
pub use gateway::{
    idempotency_key, sign_callback_body, verify_callback_signature, ChargeOutcome,
    CustomerProfile, GatewayConfig, GatewayLineItem, InitiatePaymentRequest, InitiatedPayment,
    PaymentGatewayClient,
};

// Ledger
pub use ledger::{Invoice, InvoiceItem, InvoiceLedger, NewInvoice, NewInvoiceItem};

// Orchestrator
pub use orchestrator::{BillingOrchestrator, BillingRunSummary};

// Periods
pub use periods::add_one_month;

// Pricing
pub use pricing::{
    round2, subscription_price, transaction_fee, FeeBreakdown, PriceBreakdown, MINIMUM_CHARGE,
};

// Settings
pub use settings::{BillingRates, SettingsStore};

// Subscription
pub use subscription::{Subscription, SubscriptionStateMachine, Transition};

// Trial
pub use trial::{TrialReconciliationEngine, TrialSettlement};

/// Aggregate wiring for the billing engine
///
/// One construction point for everything the worker and the API surface need.
#[derive(Clone)]
pub struct BillingService {
    pub settings: Arc<SettingsStore>,
    pub gateway: PaymentGatewayClient,
    pub ledger: InvoiceLedger,
    pub subscriptions: SubscriptionStateMachine,
    pub trial: TrialReconciliationEngine,
    pub orchestrator: BillingOrchestrator,
}

impl BillingService {
    /// Build the full service graph from environment configuration
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let gateway = PaymentGatewayClient::from_env()?;
        Ok(Self::new(pool, gateway))
    }

    pub fn new(pool: PgPool, gateway: PaymentGatewayClient) -> Self {
        let settings = Arc::new(SettingsStore::new(pool.clone()));
        let ledger = InvoiceLedger::new(pool.clone());
        let subscriptions = SubscriptionStateMachine::new(pool.clone(), settings.clone());
        let trial = TrialReconciliationEngine::new(
            pool.clone(),
            gateway.clone(),
            ledger.clone(),
            settings.clone(),
        );
        let orchestrator = BillingOrchestrator::new(
            pool,
            settings.clone(),
            gateway.clone(),
            ledger.clone(),
            subscriptions.clone(),
        );
        Self {
            settings,
            gateway,
            ledger,
            subscriptions,
            trial,
            orchestrator,
        }
    }
}
