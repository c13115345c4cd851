//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Subscription not found for store: {0}")]
    SubscriptionNotFound(String),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Period already billed: store {store_id}, {invoice_type} [{period_start} .. {period_end})")]
    PeriodAlreadyBilled {
        store_id: uuid::Uuid,
        invoice_type: String,
        period_start: time::OffsetDateTime,
        period_end: time::OffsetDateTime,
    },

    #[error("Callback signature verification failed")]
    CallbackSignatureInvalid,

    #[error("Line items do not sum to invoice subtotal: items {items_total}, subtotal {subtotal}")]
    LineItemMismatch {
        items_total: rust_decimal::Decimal,
        subtotal: rust_decimal::Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
