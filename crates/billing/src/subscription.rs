//! Subscription state machine
//!
//! Owns the per-store subscription record and its lifecycle. One subscription
//! per store, created lazily with a trial window on first access, never
//! deleted; terminal states are `cancelled` and `expired`.
//!
//! Every transition is a conditional `UPDATE ... WHERE status = <expected>`:
//! a call from the wrong source state updates zero rows and reports
//! `Transition::Noop` instead of erroring, so overlapping batch runs stay
//! idempotent.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use quickshop_shared::{deactivate_store, CardInfo, Plan, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::periods::add_one_month;
use crate::settings::SettingsStore;
use crate::trial::TrialReconciliationEngine;

/// A store's subscription record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub store_id: Uuid,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub trial_ends_at: OffsetDateTime,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub gateway_customer_ref: Option<String>,
    pub gateway_token_ref: Option<String>,
    pub card_bin: Option<String>,
    pub card_last_four: Option<String>,
    pub card_brand: Option<String>,
    pub override_price: Option<Decimal>,
    pub override_fee_rate: Option<Decimal>,
    /// Set by the card-health sweep when the stored token stopped validating
    pub token_invalid: bool,
    /// Watermark: end of the last settled transaction-fee window
    pub last_fee_period_end: Option<OffsetDateTime>,
    pub activated_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Outcome of a requested transition
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Box<Subscription>),
    /// The subscription was not in a valid source state; nothing changed
    Noop,
}

impl Transition {
    pub fn applied(&self) -> Option<&Subscription> {
        match self {
            Self::Applied(sub) => Some(sub),
            Self::Noop => None,
        }
    }
}

/// Subscription lifecycle service
#[derive(Clone)]
pub struct SubscriptionStateMachine {
    pool: PgPool,
    settings: Arc<SettingsStore>,
}

impl SubscriptionStateMachine {
    pub fn new(pool: PgPool, settings: Arc<SettingsStore>) -> Self {
        Self { pool, settings }
    }

    /// Fetch a store's subscription, creating it in `trial` on first access
    pub async fn get_or_create(&self, store_id: Uuid) -> BillingResult<Subscription> {
        if let Some(existing) = self.get(store_id).await? {
            return Ok(existing);
        }

        let trial_days = self.settings.billing_rates().await.trial_days;
        let trial_ends_at = OffsetDateTime::now_utc() + time::Duration::days(trial_days);

        // ON CONFLICT DO NOTHING + re-select keeps concurrent first accesses safe
        sqlx::query(
            r#"
            INSERT INTO subscriptions (store_id, plan, status, trial_ends_at)
            VALUES ($1, 'trial', 'trial', $2)
            ON CONFLICT (store_id) DO NOTHING
            "#,
        )
        .bind(store_id)
        .bind(trial_ends_at)
        .execute(&self.pool)
        .await?;

        self.get(store_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(store_id.to_string()))
    }

    /// Fetch a store's subscription, if one exists
    pub async fn get(&self, store_id: Uuid) -> BillingResult<Option<Subscription>> {
        let sub = sqlx::query_as("SELECT * FROM subscriptions WHERE store_id = $1")
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sub)
    }

    /// Convert a trial store to a paying plan
    ///
    /// Valid from `trial` only. Opens the first billing period `[now, now+1m)`,
    /// persists the gateway refs and masked card, then settles trial-window
    /// transaction fees best-effort: a failed trial-fee charge is recorded on
    /// its invoice and never blocks the activation.
    pub async fn activate(
        &self,
        store_id: Uuid,
        plan: Plan,
        gateway_customer_ref: &str,
        gateway_token_ref: &str,
        card: &CardInfo,
        trial_engine: &TrialReconciliationEngine,
    ) -> BillingResult<Transition> {
        if !plan.is_paid() {
            return Err(BillingError::Internal(format!(
                "cannot activate onto plan {}",
                plan.as_str()
            )));
        }

        // Ensure the record exists before transitioning
        let before = self.get_or_create(store_id).await?;
        let now = OffsetDateTime::now_utc();
        let period_end = add_one_month(now);

        let updated: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET plan = $2,
                status = 'active',
                current_period_start = $3,
                current_period_end = $4,
                gateway_customer_ref = $5,
                gateway_token_ref = $6,
                card_bin = $7,
                card_last_four = $8,
                card_brand = $9,
                token_invalid = false,
                activated_at = $3,
                updated_at = NOW()
            WHERE store_id = $1 AND status = 'trial'
            RETURNING *
            "#,
        )
        .bind(store_id)
        .bind(plan)
        .bind(now)
        .bind(period_end)
        .bind(gateway_customer_ref)
        .bind(gateway_token_ref)
        .bind(&card.bin)
        .bind(&card.last_four)
        .bind(&card.brand)
        .fetch_optional(&self.pool)
        .await?;

        let Some(subscription) = updated else {
            tracing::warn!(
                store_id = %store_id,
                status = %before.status.as_str(),
                "Activation ignored: subscription not in trial"
            );
            return Ok(Transition::Noop);
        };

        tracing::info!(
            store_id = %store_id,
            plan = %plan.as_str(),
            period_end = %period_end,
            "Subscription activated"
        );

        // Best-effort: failure is captured on the trial-fee invoice, never
        // propagated as an activation failure
        if let Err(e) = trial_engine
            .reconcile(&subscription, before.created_at, now)
            .await
        {
            tracing::error!(
                store_id = %store_id,
                error = %e,
                "Trial fee reconciliation failed; activation stands"
            );
        }

        Ok(Transition::Applied(Box::new(subscription)))
    }

    /// Record a failed charge: `active -> past_due`
    pub async fn mark_past_due(&self, store_id: Uuid) -> BillingResult<Transition> {
        self.transition(
            store_id,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
        )
        .await
    }

    /// Recover after a successful charge of any kind: `past_due -> active`
    pub async fn restore_active(&self, store_id: Uuid) -> BillingResult<Transition> {
        self.transition(
            store_id,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Active,
        )
        .await
    }

    /// Explicit cancellation: `active/past_due -> cancelled` (terminal)
    pub async fn cancel(&self, store_id: Uuid) -> BillingResult<Transition> {
        let updated: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', updated_at = NOW()
            WHERE store_id = $1 AND status IN ('active', 'past_due')
            RETURNING *
            "#,
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(sub) => {
                tracing::info!(store_id = %store_id, "Subscription cancelled");
                Ok(Transition::Applied(Box::new(sub)))
            }
            None => Ok(Transition::Noop),
        }
    }

    /// Trial lapsed without activation: `trial -> expired` (terminal)
    ///
    /// Side effect: the store's public storefront is deactivated.
    pub async fn expire(&self, store_id: Uuid, now: OffsetDateTime) -> BillingResult<Transition> {
        let updated: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE store_id = $1 AND status = 'trial' AND trial_ends_at < $2
            RETURNING *
            "#,
        )
        .bind(store_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(sub) => {
                deactivate_store(&self.pool, store_id).await?;
                tracing::info!(store_id = %store_id, "Trial expired, storefront deactivated");
                Ok(Transition::Applied(Box::new(sub)))
            }
            None => Ok(Transition::Noop),
        }
    }

    /// Advance the billing period by one month after a successful renewal
    pub async fn advance_period(&self, store_id: Uuid) -> BillingResult<Transition> {
        let current: Option<Subscription> = self.get(store_id).await?;
        let Some(sub) = current else {
            return Err(BillingError::SubscriptionNotFound(store_id.to_string()));
        };
        let Some(period_end) = sub.current_period_end else {
            return Ok(Transition::Noop);
        };

        let next_end = add_one_month(period_end);
        let updated: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET current_period_start = $2,
                current_period_end = $3,
                updated_at = NOW()
            WHERE store_id = $1 AND status = 'active' AND current_period_end = $2
            RETURNING *
            "#,
        )
        .bind(store_id)
        .bind(period_end)
        .bind(next_end)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(sub) => Ok(Transition::Applied(Box::new(sub))),
            None => Ok(Transition::Noop),
        }
    }

    /// Move the transaction-fee watermark after a settled fee window
    pub async fn set_fee_watermark(
        &self,
        store_id: Uuid,
        period_end: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET last_fee_period_end = $2, updated_at = NOW()
            WHERE store_id = $1
              AND (last_fee_period_end IS NULL OR last_fee_period_end < $2)
            "#,
        )
        .bind(store_id)
        .bind(period_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flag a subscription whose stored card token stopped validating
    pub async fn flag_token_invalid(&self, store_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE subscriptions SET token_invalid = true, updated_at = NOW() WHERE store_id = $1",
        )
        .bind(store_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        store_id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> BillingResult<Transition> {
        let updated: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = $3, updated_at = NOW()
            WHERE store_id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(store_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(sub) => {
                tracing::info!(
                    store_id = %store_id,
                    from = %from.as_str(),
                    to = %to.as_str(),
                    "Subscription transitioned"
                );
                Ok(Transition::Applied(Box::new(sub)))
            }
            None => {
                tracing::debug!(
                    store_id = %store_id,
                    from = %from.as_str(),
                    to = %to.as_str(),
                    "Transition ignored: not in source state"
                );
                Ok(Transition::Noop)
            }
        }
    }
}
