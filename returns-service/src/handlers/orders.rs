//! Order handlers: seeding the stand-in order store and the return-entry
//! lookup that annotates each line with eligibility.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{
        CreateOrderRequest, OrderResponse, OrderReturnabilityResponse, ReturnableLineResponse,
    },
    models::{NewOrder, NewOrderLine},
    startup::AppState,
};

/// Create an order with its lines.
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    payload.validate()?;
    for line in &payload.lines {
        line.validate()?;
    }

    let input = NewOrder {
        order_number: payload.order_number,
        customer_name: payload.customer_name,
        lines: payload
            .lines
            .into_iter()
            .map(|line| NewOrderLine {
                sku_id: line.sku_id,
                qty: line.qty,
                unit_price: line.unit_price,
                shipped_utc: line.shipped_utc,
            })
            .collect(),
    };

    let (order, lines) = state.db.create_order(&input).await?;

    Ok((StatusCode::CREATED, Json(OrderResponse { order, lines })))
}

/// Look up an order for return entry. Read-only; every line carries its
/// eligibility verdict and the quantity already returned.
pub async fn order_returnability(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderReturnabilityResponse>, AppError> {
    tracing::info!(order_number = %order_number, "Evaluating order returnability");

    let (order, annotated) = state
        .db
        .order_returnability(&order_number, &state.config.policy, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order '{}' not found", order_number)))?;

    let lines = annotated
        .into_iter()
        .map(|(line, already_returned_qty, eligibility)| ReturnableLineResponse {
            line,
            already_returned_qty,
            eligibility,
        })
        .collect();

    Ok(Json(OrderReturnabilityResponse { order, lines }))
}
