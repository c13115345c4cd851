//! Core domain types shared across the Quickshop platform

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Subscription plan a store is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Trial,
    PlanA,
    PlanB,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Trial
    }
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::PlanA => "plan_a",
            Self::PlanB => "plan_b",
        }
    }

    /// Plans that are charged a recurring subscription price
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Trial)
    }
}

/// Lifecycle status of a store's subscription
///
/// Valid transitions:
/// - `Trial -> Active` (activation) and `Trial -> Expired` (trial lapsed)
/// - `Active -> PastDue` (charge failed) and `PastDue -> Active` (next charge ok)
/// - `Active/PastDue -> Cancelled` (explicit)
///
/// `Cancelled` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Cancelled,
    Expired,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Trial
    }
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// States in which the store is billed for transaction fees
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Active | Self::PastDue)
    }
}

/// What a given invoice bills for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Subscription,
    TransactionFee,
    Plugin,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::TransactionFee => "transaction_fee",
            Self::Plugin => "plugin",
        }
    }
}

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// =============================================================================
// Collaborator records
// =============================================================================

/// A tenant store (collaborator record; catalog/storefront live elsewhere)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Store {
    pub id: Uuid,
    pub name: String,
    pub plan: Plan,
    pub is_active: bool,
    pub owner_email: String,
    pub created_at: OffsetDateTime,
}

/// A storefront order, as exposed by the orders subsystem
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub store_id: Uuid,
    pub total: Decimal,
    pub financial_status: String,
    pub paid_at: Option<OffsetDateTime>,
}

/// Monthly price book entry for a feature plugin
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PluginPricing {
    pub plugin_slug: String,
    pub monthly_price: Decimal,
    pub trial_days: i32,
}

/// A plugin a store has enabled, joined with its monthly price
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivePlugin {
    pub plugin_slug: String,
    pub monthly_price: Decimal,
    pub next_billing_date: OffsetDateTime,
}

/// Masked card metadata persisted after a hosted checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardInfo {
    /// First six digits (card BIN)
    pub bin: String,
    /// Last four digits
    pub last_four: String,
    pub brand: Option<String>,
    pub expiry_month: Option<u8>,
    pub expiry_year: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminality() {
        assert!(SubscriptionStatus::Cancelled.is_terminal());
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(!SubscriptionStatus::PastDue.is_terminal());
        assert!(!SubscriptionStatus::Trial.is_terminal());
    }

    #[test]
    fn billable_states() {
        assert!(SubscriptionStatus::Active.is_billable());
        assert!(SubscriptionStatus::PastDue.is_billable());
        assert!(!SubscriptionStatus::Trial.is_billable());
        assert!(!SubscriptionStatus::Cancelled.is_billable());
    }

    #[test]
    fn plan_strings_match_settings_keys() {
        assert_eq!(Plan::PlanA.as_str(), "plan_a");
        assert_eq!(Plan::PlanB.as_str(), "plan_b");
        assert!(!Plan::Trial.is_paid());
        assert!(Plan::PlanB.is_paid());
    }
}
