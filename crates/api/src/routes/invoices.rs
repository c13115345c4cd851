//! Invoice listing for the admin surface

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quickshop_billing::{Invoice, InvoiceItem};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// GET /stores/:store_id/invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    Path(store_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Invoice>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let invoices = state.billing.ledger.list_for_store(store_id, limit).await?;
    Ok(Json(invoices))
}

#[derive(Debug, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

/// GET /invoices/:invoice_number
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_number): Path<String>,
) -> ApiResult<Json<InvoiceDetail>> {
    let invoice = state
        .billing
        .ledger
        .get_by_number(&invoice_number)
        .await?
        .ok_or(ApiError::NotFound)?;
    let items = state.billing.ledger.items_for_invoice(invoice.id).await?;
    Ok(Json(InvoiceDetail { invoice, items }))
}
