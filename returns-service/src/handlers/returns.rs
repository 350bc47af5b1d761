//! Return lifecycle handlers: request entry, the action queue, and every
//! state-machine transition.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        BatchLineOutcome, BatchSchedulePickupRequest, BatchScheduleResponse, CreateReturnRequest,
        ExchangeResponse, InitiateReturnResponse, ListReturnsQuery, QcRequest, QcResponse,
        ReceiveRequest, RefundPreviewQuery, RefundPreviewResponse, RefundRequest, RefundResponse,
        ReturnLineResponse, SchedulePickupRequest, UpdateNotesRequest,
    },
    models::{NewReturnLine, NewReturnRequest},
    services::database::ProcessRefundInput,
    services::fees::{self, Deductions},
    startup::AppState,
};

/// Initiate a return request. Atomic: every selected line is created or the
/// whole request is rejected.
pub async fn create_return(
    State(state): State<AppState>,
    Json(payload): Json<CreateReturnRequest>,
) -> Result<(StatusCode, Json<InitiateReturnResponse>), AppError> {
    payload.validate()?;
    for selection in &payload.lines {
        selection.validate()?;
    }

    tracing::info!(
        order_id = %payload.order_id,
        line_count = payload.lines.len(),
        resolution = ?payload.resolution,
        "Initiating return request"
    );

    let input = NewReturnRequest {
        order_id: payload.order_id,
        lines: payload
            .lines
            .iter()
            .map(|selection| NewReturnLine {
                order_line_id: selection.order_line_id,
                qty: selection.qty,
            })
            .collect(),
        reason_category: payload.reason_category,
        reason_detail: payload.reason_detail,
        resolution: payload.resolution,
        pickup_type: payload.pickup_type,
        notes: payload.notes,
        exchange_sku_id: payload.exchange_sku_id,
    };

    let created = state
        .db
        .initiate_return(&input, &state.config.policy, Utc::now())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateReturnResponse {
            lines: created.into_iter().map(ReturnLineResponse::from).collect(),
        }),
    ))
}

/// List return lines with their derived next action. `status=open` (the
/// default) is the operator's action queue; `status=all` includes terminal
/// lines.
pub async fn list_returns(
    State(state): State<AppState>,
    Query(query): Query<ListReturnsQuery>,
) -> Result<Json<Vec<ReturnLineResponse>>, AppError> {
    let open_only = match query.status.as_deref() {
        None | Some("open") => true,
        Some("all") => false,
        Some(other) => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown status filter '{}'; expected 'open' or 'all'",
                other
            )))
        }
    };

    let lines = state.db.list_returns(open_only, query.order_id).await?;

    Ok(Json(
        lines.into_iter().map(ReturnLineResponse::from).collect(),
    ))
}

/// Get a single return line with its derived next action.
pub async fn get_return(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
) -> Result<Json<ReturnLineResponse>, AppError> {
    let line = state
        .db
        .get_return(return_line_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Return line {} not found", return_line_id))
        })?;

    Ok(Json(ReturnLineResponse::from(line)))
}

/// Schedule courier pickup for one line.
pub async fn schedule_pickup(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
    Json(payload): Json<SchedulePickupRequest>,
) -> Result<Json<ReturnLineResponse>, AppError> {
    payload.validate()?;

    let line = state
        .db
        .schedule_pickup(return_line_id, &payload.courier, &payload.awb_number, None)
        .await?;

    Ok(Json(ReturnLineResponse::from(line)))
}

/// Schedule pickup for several lines travelling under one AWB. Reports one
/// outcome per line; a failing line never aborts the rest.
pub async fn schedule_pickup_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchSchedulePickupRequest>,
) -> Result<Json<BatchScheduleResponse>, AppError> {
    payload.validate()?;

    let (batch_number, outcomes) = state
        .db
        .schedule_pickup_batch(&payload.return_line_ids, &payload.courier, &payload.awb_number)
        .await;

    let outcomes = outcomes
        .into_iter()
        .map(|(return_line_id, result)| match result {
            Ok(line) => BatchLineOutcome {
                return_line_id,
                scheduled: true,
                error: None,
                line: Some(ReturnLineResponse::from(line)),
            },
            Err(e) => BatchLineOutcome {
                return_line_id,
                scheduled: false,
                error: Some(e.to_string()),
                line: None,
            },
        })
        .collect();

    Ok(Json(BatchScheduleResponse {
        batch_number,
        outcomes,
    }))
}

/// Mark a scheduled pickup as in transit.
pub async fn mark_in_transit(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
) -> Result<Json<ReturnLineResponse>, AppError> {
    let line = state.db.mark_in_transit(return_line_id).await?;
    Ok(Json(ReturnLineResponse::from(line)))
}

/// Record physical receipt and the item's condition.
pub async fn receive(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
    Json(payload): Json<ReceiveRequest>,
) -> Result<Json<ReturnLineResponse>, AppError> {
    let line = state.db.receive(return_line_id, payload.condition).await?;
    Ok(Json(ReturnLineResponse::from(line)))
}

/// Record the QC decision. Approving a sellable unit posts the single
/// inward ledger entry for this line.
pub async fn record_qc(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
    Json(payload): Json<QcRequest>,
) -> Result<Json<QcResponse>, AppError> {
    let (line, inventory_entry) = state
        .db
        .record_qc(
            return_line_id,
            payload.decision,
            payload.comments.as_deref(),
            payload.write_off_reason.as_deref(),
            payload.operator_id,
        )
        .await?;

    Ok(Json(QcResponse {
        line: ReturnLineResponse::from(line),
        inventory_entry,
    }))
}

/// Suggest a refund breakdown from the configured return policy. The
/// operator may override every component before submitting.
pub async fn refund_preview(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
    Query(query): Query<RefundPreviewQuery>,
) -> Result<Json<RefundPreviewResponse>, AppError> {
    let line = state
        .db
        .get_return(return_line_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Return line {} not found", return_line_id))
        })?;

    let gross = query
        .gross
        .unwrap_or_else(|| line.unit_price * Decimal::from(line.return_qty));
    let suggested = fees::suggested_deductions(
        state.config.policy.shipping_fee,
        &state.config.policy.restocking_fee,
        gross,
    );
    let breakdown = fees::compute_breakdown(
        gross,
        query.discount_clawback.unwrap_or(Decimal::ZERO),
        suggested,
    );

    Ok(Json(RefundPreviewResponse { breakdown }))
}

/// Post the refund for a QC-approved refund line.
pub async fn process_refund(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, AppError> {
    payload.validate()?;

    let input = ProcessRefundInput {
        gross_amount: payload.gross_amount,
        discount_clawback: payload.discount_clawback,
        deductions: Deductions {
            shipping: payload.shipping_fee,
            restocking: payload.restocking_fee,
            other: payload.other_deductions,
        },
        deduction_notes: payload.deduction_notes,
        refund_method: payload.refund_method,
        processed_by: payload.processed_by,
    };

    let (line, refund) = state.db.process_refund(return_line_id, &input).await?;

    Ok(Json(RefundResponse {
        line: ReturnLineResponse::from(line),
        refund,
    }))
}

/// Create the exchange order for a QC-approved exchange line.
pub async fn create_exchange(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
) -> Result<Json<ExchangeResponse>, AppError> {
    let (line, exchange_order) = state.db.create_exchange(return_line_id).await?;

    Ok(Json(ExchangeResponse {
        line: ReturnLineResponse::from(line),
        exchange_order,
    }))
}

/// Complete a line that has nothing left to pay or ship.
pub async fn complete(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
) -> Result<Json<ReturnLineResponse>, AppError> {
    let line = state.db.complete_line(return_line_id).await?;
    Ok(Json(ReturnLineResponse::from(line)))
}

/// Cancel a line from any non-terminal state.
pub async fn cancel(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
) -> Result<Json<ReturnLineResponse>, AppError> {
    let line = state.db.cancel_line(return_line_id).await?;
    Ok(Json(ReturnLineResponse::from(line)))
}

/// Update audit notes; permitted at any status, including terminal.
pub async fn update_notes(
    State(state): State<AppState>,
    Path(return_line_id): Path<Uuid>,
    Json(payload): Json<UpdateNotesRequest>,
) -> Result<Json<ReturnLineResponse>, AppError> {
    let line = state
        .db
        .update_notes(return_line_id, payload.notes.as_deref())
        .await?;
    Ok(Json(ReturnLineResponse::from(line)))
}
