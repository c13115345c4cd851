//! Platform settings with a read-through TTL cache
//!
//! Pricing knobs (plan prices, fee rate, VAT rate, trial length) live in the
//! `platform_settings` table so admins can change them without a deploy.
//! Reads go through a 5-minute in-memory cache; writes invalidate the key
//! immediately so an edited price is visible on the very next read.
//! A failed load falls back to hard-coded defaults so billing and checkout
//! keep working in degraded mode.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;

use crate::error::BillingResult;

/// Default cache TTL (5 minutes)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

pub const KEY_PLAN_A_PRICE: &str = "subscription_plan_a_price";
pub const KEY_PLAN_B_PRICE: &str = "subscription_plan_b_price";
pub const KEY_TRIAL_DAYS: &str = "subscription_trial_days";
pub const KEY_TRANSACTION_FEE_RATE: &str = "transaction_fee_rate";
pub const KEY_VAT_RATE: &str = "vat_rate";

/// Hard-coded fallbacks used when the settings table is unreachable or a key
/// is missing
fn default_for(key: &str) -> Option<Decimal> {
    match key {
        KEY_PLAN_A_PRICE => Some(dec!(99.00)),
        KEY_PLAN_B_PRICE => Some(dec!(199.00)),
        KEY_TRIAL_DAYS => Some(dec!(14)),
        KEY_TRANSACTION_FEE_RATE => Some(dec!(0.005)),
        KEY_VAT_RATE => Some(dec!(0.18)),
        _ => None,
    }
}

/// Cache entry with expiration
#[derive(Clone)]
struct CacheEntry {
    value: Decimal,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: Decimal, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Resolved billing rates, fetched once per billing pass
#[derive(Debug, Clone, Copy)]
pub struct BillingRates {
    pub plan_a_price: Decimal,
    pub plan_b_price: Decimal,
    pub trial_days: i64,
    pub transaction_fee_rate: Decimal,
    pub vat_rate: Decimal,
}

/// Cached key/value platform configuration
pub struct SettingsStore {
    pool: PgPool,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Create a store with a custom TTL (tests use a zero TTL)
    pub fn with_ttl(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Read a numeric setting, hitting the cache first
    ///
    /// Falls back to the hard-coded default (warn-logged) on database failure
    /// or when the key is absent, so callers never fail on configuration.
    pub async fn get(&self, key: &str) -> Decimal {
        if let Some(value) = self.cached(key) {
            return value;
        }

        let row: Result<Option<(Decimal,)>, sqlx::Error> =
            sqlx::query_as("SELECT value FROM platform_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await;

        let value = match row {
            Ok(Some((v,))) => v,
            Ok(None) => {
                let fallback = default_for(key).unwrap_or(Decimal::ZERO);
                tracing::warn!(key = %key, fallback = %fallback, "Setting missing, using default");
                fallback
            }
            Err(e) => {
                let fallback = default_for(key).unwrap_or(Decimal::ZERO);
                tracing::warn!(key = %key, error = %e, fallback = %fallback, "Settings load failed, using default");
                // Do not cache the fallback: recover as soon as the db is back
                return fallback;
            }
        };

        self.store(key, value);
        value
    }

    /// Snapshot of all billing rates; fetch once per batch pass so every store
    /// in the run sees the same rates
    pub async fn billing_rates(&self) -> BillingRates {
        BillingRates {
            plan_a_price: self.get(KEY_PLAN_A_PRICE).await,
            plan_b_price: self.get(KEY_PLAN_B_PRICE).await,
            trial_days: self.get(KEY_TRIAL_DAYS).await.to_i64().unwrap_or(14),
            transaction_fee_rate: self.get(KEY_TRANSACTION_FEE_RATE).await,
            vat_rate: self.get(KEY_VAT_RATE).await,
        }
    }

    /// Write a setting and invalidate its cache entry immediately
    pub async fn set(&self, key: &str, value: Decimal, updated_by: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_settings (key, value, updated_by, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_by = EXCLUDED.updated_by,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_by)
        .execute(&self.pool)
        .await?;

        self.invalidate(key);
        tracing::info!(key = %key, value = %value, updated_by = %updated_by, "Platform setting updated");
        Ok(())
    }

    /// Drop a single key from the cache
    pub fn invalidate(&self, key: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(key);
        }
    }

    /// Drop every cached entry
    pub fn invalidate_all(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    fn cached(&self, key: &str) -> Option<Decimal> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(key)?;
        if entry.is_expired() {
            None
        } else {
            Some(entry.value)
        }
    }

    fn store(&self, key: &str, value: Decimal) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key.to_string(), CacheEntry::new(value, self.ttl));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_billing_keys() {
        for key in [
            KEY_PLAN_A_PRICE,
            KEY_PLAN_B_PRICE,
            KEY_TRIAL_DAYS,
            KEY_TRANSACTION_FEE_RATE,
            KEY_VAT_RATE,
        ] {
            assert!(default_for(key).is_some(), "missing default for {key}");
        }
        assert!(default_for("unknown_key").is_none());
    }

    #[test]
    fn cache_entry_expiry() {
        let entry = CacheEntry::new(dec!(1), Duration::from_secs(300));
        assert!(!entry.is_expired());

        let entry = CacheEntry {
            value: dec!(1),
            expires_at: Instant::now() - Duration::from_secs(1),
        };
        assert!(entry.is_expired());
    }
}
