//! Queries against collaborator subsystems (stores, orders, plugins)
//!
//! The billing core does not own these tables; it only reads what it needs to
//! compute fees and flips the single `is_active` switch on trial expiry.

use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::{ActivePlugin, Order, Store};

/// Fetch a store by id
pub async fn get_store(pool: &PgPool, store_id: Uuid) -> Result<Option<Store>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, name, plan, is_active, owner_email, created_at FROM stores WHERE id = $1",
    )
    .bind(store_id)
    .fetch_optional(pool)
    .await
}

/// Deactivate a store's public storefront (trial expiry side effect)
pub async fn deactivate_store(pool: &PgPool, store_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE stores SET is_active = false WHERE id = $1")
        .bind(store_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Paid orders for a store inside the half-open window `[start, end)`
pub async fn paid_orders_in_window(
    pool: &PgPool,
    store_id: Uuid,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, store_id, total, financial_status, paid_at
        FROM orders
        WHERE store_id = $1
          AND financial_status = 'paid'
          AND paid_at >= $2
          AND paid_at < $3
        ORDER BY paid_at ASC
        "#,
    )
    .bind(store_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

/// Sum of paid-order totals in `[start, end)` plus the order ids included
pub fn sum_orders(orders: &[Order]) -> (Decimal, Vec<Uuid>) {
    let total = orders.iter().map(|o| o.total).sum();
    let ids = orders.iter().map(|o| o.id).collect();
    (total, ids)
}

/// Active, subscribed plugins for a store whose billing date has come due
pub async fn due_plugins_for_store(
    pool: &PgPool,
    store_id: Uuid,
    now: OffsetDateTime,
) -> Result<Vec<ActivePlugin>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT sp.plugin_slug, pp.monthly_price, sp.next_billing_date
        FROM store_plugins sp
        JOIN plugin_pricing pp ON pp.plugin_slug = sp.plugin_slug
        WHERE sp.store_id = $1
          AND sp.subscribed = true
          AND sp.next_billing_date <= $2
        ORDER BY sp.plugin_slug ASC
        "#,
    )
    .bind(store_id)
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Advance a plugin's next billing date after a successful combined charge
pub async fn advance_plugin_billing_date(
    pool: &PgPool,
    store_id: Uuid,
    plugin_slug: &str,
    next: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE store_plugins SET next_billing_date = $3 WHERE store_id = $1 AND plugin_slug = $2",
    )
    .bind(store_id)
    .bind(plugin_slug)
    .bind(next)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(total: Decimal) -> Order {
        Order {
            id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            total,
            financial_status: "paid".to_string(),
            paid_at: Some(OffsetDateTime::now_utc()),
        }
    }

    #[test]
    fn sum_orders_totals_and_ids() {
        let orders = vec![order(dec!(10.50)), order(dec!(4.25)), order(dec!(0.25))];
        let (total, ids) = sum_orders(&orders);
        assert_eq!(total, dec!(15.00));
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], orders[0].id);
    }

    #[test]
    fn sum_orders_empty() {
        let (total, ids) = sum_orders(&[]);
        assert_eq!(total, Decimal::ZERO);
        assert!(ids.is_empty());
    }
}
