//! Shared application state

use sqlx::PgPool;
use std::sync::Arc;

use quickshop_billing::BillingService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, billing: Arc<BillingService>) -> Self {
        Self { pool, billing }
    }
}
