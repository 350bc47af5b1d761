//! Inventory read handlers: derived balances and the append-only audit trail.

use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{BalancesQuery, BalancesResponse, LedgerQuery, LedgerResponse},
    startup::AppState,
};

/// Current balance per SKU: the signed sum of ledger entries, never a
/// stored field.
pub async fn balances(
    State(state): State<AppState>,
    Query(query): Query<BalancesQuery>,
) -> Result<Json<BalancesResponse>, AppError> {
    let sku_ids = query
        .sku_ids
        .split(',')
        .map(|raw| raw.trim().parse::<Uuid>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid SKU id: {}", e)))?;

    if sku_ids.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "At least one SKU id is required"
        )));
    }

    let balances = state.db.get_balances(&sku_ids).await?;

    Ok(Json(BalancesResponse { balances }))
}

/// Ledger entries for one SKU in posting order.
pub async fn ledger(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerResponse>, AppError> {
    let entries = state.db.list_ledger(query.sku_id).await?;
    Ok(Json(LedgerResponse { entries }))
}
