//! Database service for returns-service.
//!
//! Every state-machine transition runs in one transaction: lock the line,
//! re-derive the required action from current state, reject on mismatch,
//! then write the new state plus any ledger/refund row. A concurrent writer
//! that loses the race fails the precondition check; nothing here relies on
//! in-process locking.

use crate::config::ReturnPolicy;
use crate::models::{
    ActionNeeded, InventoryLedgerEntry, ItemCondition, LedgerReason, NewOrder, NewReturnRequest,
    Order, OrderLine, QcResult, RefundRecord, ReturnLine, ReturnStatus, TxnType,
};
use crate::services::eligibility::{self, LineEligibility};
use crate::services::fees::{self, Deductions};
use crate::services::metrics::{
    DB_QUERY_DURATION, LEDGER_ENTRIES_TOTAL, REFUNDS_TOTAL, RETURN_LINES_CREATED,
    TRANSITIONS_TOTAL,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Input for posting a refund against a received, QC-approved line.
#[derive(Debug, Clone)]
pub struct ProcessRefundInput {
    pub gross_amount: Decimal,
    pub discount_clawback: Decimal,
    pub deductions: Deductions,
    pub deduction_notes: Option<String>,
    pub refund_method: String,
    pub processed_by: Option<Uuid>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "returns-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Order Operations (stand-in for the external order store)
    // -------------------------------------------------------------------------

    /// Create an order with its lines.
    #[instrument(skip(self, input), fields(order_number = %input.order_number))]
    pub async fn create_order(&self, input: &NewOrder) -> Result<(Order, Vec<OrderLine>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_order"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let (order, lines) = insert_order(&mut tx, input, None).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            order_id = %order.order_id,
            line_count = lines.len(),
            "Order created"
        );

        Ok((order, lines))
    }

    /// Get an order and its lines by order number.
    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<(Order, Vec<OrderLine>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order_by_number"])
            .start_timer();

        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get order: {}", e)))?;

        let order = match order {
            Some(o) => o,
            None => return Ok(None),
        };

        let lines = sqlx::query_as::<_, OrderLine>(
            "SELECT * FROM order_lines WHERE order_id = $1 ORDER BY order_line_id",
        )
        .bind(order.order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get order lines: {}", e)))?;

        timer.observe_duration();

        Ok(Some((order, lines)))
    }

    /// Look up an order for return entry: every line annotated with the
    /// quantity already covered by non-cancelled returns and its eligibility
    /// verdict. Read-only; the verdict is re-checked inside `initiate_return`.
    #[instrument(skip(self, policy))]
    pub async fn order_returnability(
        &self,
        order_number: &str,
        policy: &ReturnPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<(Order, Vec<(OrderLine, i64, LineEligibility)>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["order_returnability"])
            .start_timer();

        let (order, lines) = match self.get_order_by_number(order_number).await? {
            Some(found) => found,
            None => return Ok(None),
        };

        let returned: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT order_line_id, COALESCE(SUM(return_qty), 0)
            FROM return_lines
            WHERE order_id = $1 AND return_status <> $2
            GROUP BY order_line_id
            "#,
        )
        .bind(order.order_id)
        .bind(ReturnStatus::Cancelled)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum returned quantities: {}", e))
        })?;

        let returned_by_line: std::collections::HashMap<Uuid, i64> =
            returned.into_iter().collect();

        let annotated = lines
            .into_iter()
            .map(|line| {
                let returned_qty = returned_by_line
                    .get(&line.order_line_id)
                    .copied()
                    .unwrap_or(0);
                let verdict = eligibility::evaluate_line(
                    order.status,
                    &line,
                    returned_qty,
                    policy.window_days,
                    policy.grace_days,
                    now,
                );
                (line, returned_qty, verdict)
            })
            .collect();

        timer.observe_duration();

        Ok(Some((order, annotated)))
    }

    // -------------------------------------------------------------------------
    // Return Request
    // -------------------------------------------------------------------------

    /// Create return lines for the selected order lines, atomically.
    ///
    /// Eligibility and quantity bounds are re-validated here, under row locks
    /// on the order lines, so two concurrent requests cannot jointly exceed
    /// the returnable quantity. Any failing line aborts the whole request;
    /// either every requested line is created or none are.
    #[instrument(skip(self, input, policy), fields(order_id = %input.order_id, line_count = input.lines.len()))]
    pub async fn initiate_return(
        &self,
        input: &NewReturnRequest,
        policy: &ReturnPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReturnLine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["initiate_return"])
            .start_timer();

        if input.lines.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A return request must select at least one order line"
            )));
        }

        if input.resolution == crate::models::Resolution::Exchange
            && input.exchange_sku_id.is_none()
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "An exchange resolution requires an exchange SKU"
            )));
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let order =
            sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_id = $1 FOR UPDATE")
                .bind(input.order_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to lock order: {}", e))
                })?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Order {} not found", input.order_id))
                })?;

        let mut created = Vec::with_capacity(input.lines.len());

        for selected in &input.lines {
            let line = sqlx::query_as::<_, OrderLine>(
                "SELECT * FROM order_lines WHERE order_line_id = $1 AND order_id = $2 FOR UPDATE",
            )
            .bind(selected.order_line_id)
            .bind(order.order_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to lock order line: {}", e))
            })?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Order line {} not found on order {}",
                    selected.order_line_id,
                    order.order_number
                ))
            })?;

            let returned_qty: i64 = sqlx::query_scalar(
                r#"
                SELECT COALESCE(SUM(return_qty), 0)
                FROM return_lines
                WHERE order_line_id = $1 AND return_status <> $2
                "#,
            )
            .bind(line.order_line_id)
            .bind(ReturnStatus::Cancelled)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to sum returned qty: {}", e))
            })?;

            let verdict = eligibility::evaluate_line(
                order.status,
                &line,
                returned_qty,
                policy.window_days,
                policy.grace_days,
                now,
            );
            if !verdict.eligible {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Order line {} is not eligible for return: {}",
                    line.order_line_id,
                    verdict.reason.unwrap_or_else(|| "ineligible".to_string())
                )));
            }

            let remaining = i64::from(line.qty) - returned_qty;
            if selected.qty < 1 || i64::from(selected.qty) > remaining {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Requested quantity {} for order line {} is outside 1..={} returnable",
                    selected.qty,
                    line.order_line_id,
                    remaining
                )));
            }

            let return_line = sqlx::query_as::<_, ReturnLine>(
                r#"
                INSERT INTO return_lines (
                    return_line_id, order_id, order_line_id, return_qty, unit_price,
                    reason_category, reason_detail, resolution, notes, pickup_type,
                    exchange_sku_id, return_status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order.order_id)
            .bind(line.order_line_id)
            .bind(selected.qty)
            .bind(line.unit_price)
            .bind(input.reason_category)
            .bind(&input.reason_detail)
            .bind(input.resolution)
            .bind(&input.notes)
            .bind(input.pickup_type)
            .bind(input.exchange_sku_id)
            .bind(ReturnStatus::Requested)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert return line: {}", e))
            })?;

            created.push(return_line);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        for line in &created {
            RETURN_LINES_CREATED
                .with_label_values(&[match line.resolution {
                    crate::models::Resolution::Refund => "refund",
                    crate::models::Resolution::Exchange => "exchange",
                    crate::models::Resolution::Rejected => "rejected",
                }])
                .inc();
        }

        info!(
            order_id = %order.order_id,
            created = created.len(),
            "Return request initiated"
        );

        Ok(created)
    }

    // -------------------------------------------------------------------------
    // Return Line Reads
    // -------------------------------------------------------------------------

    /// Get a single return line.
    #[instrument(skip(self))]
    pub async fn get_return(&self, return_line_id: Uuid) -> Result<Option<ReturnLine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_return"])
            .start_timer();

        let line = sqlx::query_as::<_, ReturnLine>(
            "SELECT * FROM return_lines WHERE return_line_id = $1",
        )
        .bind(return_line_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get return line: {}", e)))?;

        timer.observe_duration();

        Ok(line)
    }

    /// List return lines, optionally only open (non-terminal) ones and/or
    /// scoped to an order.
    #[instrument(skip(self))]
    pub async fn list_returns(
        &self,
        open_only: bool,
        order_id: Option<Uuid>,
    ) -> Result<Vec<ReturnLine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_returns"])
            .start_timer();

        let lines = sqlx::query_as::<_, ReturnLine>(
            r#"
            SELECT * FROM return_lines
            WHERE ($1::uuid IS NULL OR order_id = $1)
              AND ($2 = false OR (return_status <> $3 AND return_status <> $4))
            ORDER BY requested_utc, return_line_id
            "#,
        )
        .bind(order_id)
        .bind(open_only)
        .bind(ReturnStatus::Complete)
        .bind(ReturnStatus::Cancelled)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list return lines: {}", e))
        })?;

        timer.observe_duration();

        Ok(lines)
    }

    // -------------------------------------------------------------------------
    // Return Line State Machine
    // -------------------------------------------------------------------------

    /// Schedule courier pickup for a line awaiting it.
    #[instrument(skip(self))]
    pub async fn schedule_pickup(
        &self,
        return_line_id: Uuid,
        courier: &str,
        awb_number: &str,
        batch_number: Option<&str>,
    ) -> Result<ReturnLine, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["schedule_pickup"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;
        require_action(&line, ActionNeeded::SchedulePickup, "schedule pickup")?;

        let updated = sqlx::query_as::<_, ReturnLine>(
            r#"
            UPDATE return_lines
            SET return_courier = $2,
                return_awb_number = $3,
                return_batch_number = COALESCE($4, return_batch_number),
                return_status = $5
            WHERE return_line_id = $1
            RETURNING *
            "#,
        )
        .bind(return_line_id)
        .bind(courier)
        .bind(awb_number)
        .bind(batch_number)
        .bind(ReturnStatus::PickupScheduled)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to schedule pickup: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSITIONS_TOTAL
            .with_label_values(&["schedule_pickup", "ok"])
            .inc();

        info!(
            return_line_id = %return_line_id,
            courier = courier,
            awb_number = awb_number,
            "Pickup scheduled"
        );

        Ok(updated)
    }

    /// Schedule pickup for several lines travelling together. Each line gets
    /// its own transaction and its own verdict; one bad line never aborts the
    /// rest. The shared batch number groups the lines that succeeded.
    #[instrument(skip(self, return_line_ids), fields(line_count = return_line_ids.len()))]
    pub async fn schedule_pickup_batch(
        &self,
        return_line_ids: &[Uuid],
        courier: &str,
        awb_number: &str,
    ) -> (String, Vec<(Uuid, Result<ReturnLine, AppError>)>) {
        let suffix = Uuid::new_v4().simple().to_string();
        let batch_number = format!("RB-{}", suffix[..8].to_uppercase());

        let mut outcomes = Vec::with_capacity(return_line_ids.len());
        for &line_id in return_line_ids {
            let result = self
                .schedule_pickup(line_id, courier, awb_number, Some(&batch_number))
                .await;
            if let Err(ref e) = result {
                warn!(return_line_id = %line_id, error = %e, "Batch pickup line rejected");
            }
            outcomes.push((line_id, result));
        }

        (batch_number, outcomes)
    }

    /// Mark a scheduled pickup as in transit (courier scan or operator).
    #[instrument(skip(self))]
    pub async fn mark_in_transit(&self, return_line_id: Uuid) -> Result<ReturnLine, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_in_transit"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;
        if line.return_status != ReturnStatus::PickupScheduled {
            TRANSITIONS_TOTAL
                .with_label_values(&["mark_in_transit", "rejected"])
                .inc();
            return Err(AppError::precondition(
                "mark in transit",
                current_state(&line),
                ReturnStatus::PickupScheduled,
            ));
        }

        let updated = set_status(&mut tx, return_line_id, ReturnStatus::InTransit).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSITIONS_TOTAL
            .with_label_values(&["mark_in_transit", "ok"])
            .inc();

        Ok(updated)
    }

    /// Record physical receipt of the item and its condition.
    ///
    /// Deliberately does not touch inventory: condition recording and stock
    /// re-entry are decoupled so QC can stop damaged stock from being
    /// inwarded by a hasty scan.
    #[instrument(skip(self))]
    pub async fn receive(
        &self,
        return_line_id: Uuid,
        condition: ItemCondition,
    ) -> Result<ReturnLine, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["receive"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;
        require_action(&line, ActionNeeded::Receive, "receive")?;

        let updated = sqlx::query_as::<_, ReturnLine>(
            r#"
            UPDATE return_lines
            SET condition = $2, received_utc = now(), return_status = $3
            WHERE return_line_id = $1
            RETURNING *
            "#,
        )
        .bind(return_line_id)
        .bind(condition)
        .bind(ReturnStatus::Received)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to receive line: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSITIONS_TOTAL.with_label_values(&["receive", "ok"]).inc();

        info!(
            return_line_id = %return_line_id,
            condition = ?condition,
            "Return line received"
        );

        Ok(updated)
    }

    /// Record the QC decision for a received line, exactly once.
    ///
    /// Approval of a sellable unit posts the single `return_received` inward
    /// ledger entry for this line; a write-off posts nothing and the unit
    /// never re-enters stock. A second call fails with CONFLICT and can never
    /// post twice.
    #[instrument(skip(self, comments, write_off_reason))]
    pub async fn record_qc(
        &self,
        return_line_id: Uuid,
        decision: QcResult,
        comments: Option<&str>,
        write_off_reason: Option<&str>,
        operator_id: Option<Uuid>,
    ) -> Result<(ReturnLine, Option<InventoryLedgerEntry>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_qc"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;
        if line.return_status != ReturnStatus::Received {
            TRANSITIONS_TOTAL
                .with_label_values(&["record_qc", "rejected"])
                .inc();
            return Err(AppError::precondition(
                "record QC",
                current_state(&line),
                ReturnStatus::Received,
            ));
        }
        if line.qc_result.is_some() {
            TRANSITIONS_TOTAL
                .with_label_values(&["record_qc", "rejected"])
                .inc();
            return Err(AppError::Conflict(anyhow::anyhow!(
                "A QC decision has already been recorded for line {}",
                return_line_id
            )));
        }

        let posted = if decision == QcResult::Approved
            && line.condition.map(|c| c.is_sellable()).unwrap_or(false)
        {
            let sku_id: Uuid =
                sqlx::query_scalar("SELECT sku_id FROM order_lines WHERE order_line_id = $1")
                    .bind(line.order_line_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!("Failed to get SKU: {}", e))
                    })?;

            let entry = post_ledger_entry(
                &mut tx,
                sku_id,
                TxnType::Inward,
                line.return_qty,
                LedgerReason::ReturnReceived,
                Some(return_line_id),
                operator_id,
            )
            .await?;
            Some(entry)
        } else {
            None
        };

        let updated = sqlx::query_as::<_, ReturnLine>(
            r#"
            UPDATE return_lines
            SET qc_result = $2, qc_comments = $3, write_off_reason = $4
            WHERE return_line_id = $1
            RETURNING *
            "#,
        )
        .bind(return_line_id)
        .bind(decision)
        .bind(comments)
        .bind(write_off_reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record QC: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSITIONS_TOTAL
            .with_label_values(&["record_qc", "ok"])
            .inc();

        info!(
            return_line_id = %return_line_id,
            decision = ?decision,
            inventory_posted = posted.is_some(),
            "QC recorded"
        );

        Ok((updated, posted))
    }

    /// Post the refund for a QC-approved refund line and complete it.
    ///
    /// The net is computed from the submitted breakdown; a net of zero or
    /// less is rejected outright, never clamped. This is a money event only:
    /// stock was already handled at QC time.
    #[instrument(skip(self, input))]
    pub async fn process_refund(
        &self,
        return_line_id: Uuid,
        input: &ProcessRefundInput,
    ) -> Result<(ReturnLine, RefundRecord), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["process_refund"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT refund_id FROM refund_records WHERE return_line_id = $1 AND NOT voided",
        )
        .bind(return_line_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check existing refund: {}", e))
        })?;
        if existing.is_some() {
            REFUNDS_TOTAL.with_label_values(&["conflict"]).inc();
            return Err(AppError::Conflict(anyhow::anyhow!(
                "A refund has already been processed for line {}",
                return_line_id
            )));
        }

        require_action(&line, ActionNeeded::ProcessRefund, "process refund")?;

        if input.gross_amount <= Decimal::ZERO
            || input.discount_clawback < Decimal::ZERO
            || input.deductions.shipping < Decimal::ZERO
            || input.deductions.restocking < Decimal::ZERO
            || input.deductions.other < Decimal::ZERO
        {
            REFUNDS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Gross must be positive and clawback/deductions non-negative"
            )));
        }

        let breakdown =
            fees::compute_breakdown(input.gross_amount, input.discount_clawback, input.deductions);
        if !breakdown.is_payable() {
            REFUNDS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Computed net refund {} is not positive; clawback and deductions may not reach or exceed gross",
                breakdown.net
            )));
        }

        let record = sqlx::query_as::<_, RefundRecord>(
            r#"
            INSERT INTO refund_records (
                refund_id, return_line_id, gross_amount, discount_clawback,
                deduction_shipping, deduction_restocking, deduction_other,
                deduction_notes, net_amount, refund_method, processed_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(return_line_id)
        .bind(breakdown.gross)
        .bind(breakdown.clawback)
        .bind(breakdown.deductions.shipping)
        .bind(breakdown.deductions.restocking)
        .bind(breakdown.deductions.other)
        .bind(&input.deduction_notes)
        .bind(breakdown.net)
        .bind(&input.refund_method)
        .bind(input.processed_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "A refund has already been processed for line {}",
                    return_line_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to insert refund: {}", e)),
        })?;

        let updated = sqlx::query_as::<_, ReturnLine>(
            r#"
            UPDATE return_lines
            SET refund_gross_amount = $2,
                discount_clawback = $3,
                deduction_shipping = $4,
                deduction_restocking = $5,
                deduction_other = $6,
                deduction_notes = $7,
                net_refund_amount = $8,
                refund_method = $9,
                return_status = $10,
                completed_utc = now()
            WHERE return_line_id = $1
            RETURNING *
            "#,
        )
        .bind(return_line_id)
        .bind(breakdown.gross)
        .bind(breakdown.clawback)
        .bind(breakdown.deductions.shipping)
        .bind(breakdown.deductions.restocking)
        .bind(breakdown.deductions.other)
        .bind(&input.deduction_notes)
        .bind(breakdown.net)
        .bind(&input.refund_method)
        .bind(ReturnStatus::Complete)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to complete line: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        REFUNDS_TOTAL.with_label_values(&["ok"]).inc();
        TRANSITIONS_TOTAL
            .with_label_values(&["process_refund", "ok"])
            .inc();

        info!(
            return_line_id = %return_line_id,
            net_amount = %record.net_amount,
            refund_method = %record.refund_method,
            "Refund posted"
        );

        Ok((updated, record))
    }

    /// Create the exchange order for a QC-approved exchange line and
    /// complete it. The new order ships the exchange SKU at the original
    /// line's snapshotted price.
    #[instrument(skip(self))]
    pub async fn create_exchange(
        &self,
        return_line_id: Uuid,
    ) -> Result<(ReturnLine, Order), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_exchange"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;
        require_action(&line, ActionNeeded::CreateExchange, "create exchange")?;

        let exchange_sku_id = line.exchange_sku_id.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "No exchange SKU recorded on line {}",
                return_line_id
            ))
        })?;

        let customer_name: String =
            sqlx::query_scalar("SELECT customer_name FROM orders WHERE order_id = $1")
                .bind(line.order_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to get source order: {}", e))
                })?;

        let suffix = Uuid::new_v4().simple().to_string();
        let exchange_order = NewOrder {
            order_number: format!("EX-{}", suffix[..8].to_uppercase()),
            customer_name,
            lines: vec![crate::models::order::NewOrderLine {
                sku_id: exchange_sku_id,
                qty: line.return_qty,
                unit_price: line.unit_price,
                shipped_utc: None,
            }],
        };
        let (order, _lines) = insert_order(&mut tx, &exchange_order, Some(return_line_id)).await?;

        let updated = sqlx::query_as::<_, ReturnLine>(
            r#"
            UPDATE return_lines
            SET exchange_order_id = $2,
                exchange_order_number = $3,
                return_status = $4,
                completed_utc = now()
            WHERE return_line_id = $1
            RETURNING *
            "#,
        )
        .bind(return_line_id)
        .bind(order.order_id)
        .bind(&order.order_number)
        .bind(ReturnStatus::Complete)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to link exchange: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSITIONS_TOTAL
            .with_label_values(&["create_exchange", "ok"])
            .inc();

        info!(
            return_line_id = %return_line_id,
            exchange_order_number = %order.order_number,
            "Exchange order created"
        );

        Ok((updated, order))
    }

    /// Terminal transition for lines with nothing left to pay or ship
    /// (write-offs and up-front rejections).
    #[instrument(skip(self))]
    pub async fn complete_line(&self, return_line_id: Uuid) -> Result<ReturnLine, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_line"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;
        require_action(&line, ActionNeeded::Complete, "complete")?;

        if line.needs_manual_review() {
            warn!(
                return_line_id = %return_line_id,
                "Completing a written-off line that requested an exchange; routing to manual review"
            );
        }

        let updated = sqlx::query_as::<_, ReturnLine>(
            r#"
            UPDATE return_lines
            SET return_status = $2, completed_utc = now()
            WHERE return_line_id = $1
            RETURNING *
            "#,
        )
        .bind(return_line_id)
        .bind(ReturnStatus::Complete)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to complete line: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSITIONS_TOTAL
            .with_label_values(&["complete", "ok"])
            .inc();

        Ok(updated)
    }

    /// Cancel a line from any non-terminal state. Never reverses postings;
    /// by transition ordering a cancellable line has none to reverse.
    #[instrument(skip(self))]
    pub async fn cancel_line(&self, return_line_id: Uuid) -> Result<ReturnLine, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_line"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let line = lock_line(&mut tx, return_line_id).await?;
        if line.is_terminal() {
            TRANSITIONS_TOTAL
                .with_label_values(&["cancel", "rejected"])
                .inc();
            return Err(AppError::precondition(
                "cancel",
                current_state(&line),
                "any non-terminal status",
            ));
        }

        let updated = set_status(&mut tx, return_line_id, ReturnStatus::Cancelled).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        TRANSITIONS_TOTAL.with_label_values(&["cancel", "ok"]).inc();

        info!(return_line_id = %return_line_id, "Return line cancelled");

        Ok(updated)
    }

    /// Update audit notes. The only mutation permitted after a line reaches
    /// a terminal status.
    #[instrument(skip(self, notes))]
    pub async fn update_notes(
        &self,
        return_line_id: Uuid,
        notes: Option<&str>,
    ) -> Result<ReturnLine, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_notes"])
            .start_timer();

        let updated = sqlx::query_as::<_, ReturnLine>(
            "UPDATE return_lines SET notes = $2 WHERE return_line_id = $1 RETURNING *",
        )
        .bind(return_line_id)
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update notes: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Return line {} not found", return_line_id))
        })?;

        timer.observe_duration();

        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Inventory Ledger Reads
    // -------------------------------------------------------------------------

    /// Current balances for the given SKUs: the signed sum of each SKU's
    /// ledger entries. SKUs with no entries report zero.
    #[instrument(skip(self, sku_ids), fields(sku_count = sku_ids.len()))]
    pub async fn get_balances(&self, sku_ids: &[Uuid]) -> Result<Vec<crate::models::SkuBalance>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_balances"])
            .start_timer();

        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT sku_id,
                   COALESCE(SUM(CASE WHEN txn_type = 'inward' THEN qty ELSE -qty END), 0)
            FROM inventory_ledger
            WHERE sku_id = ANY($1)
            GROUP BY sku_id
            "#,
        )
        .bind(sku_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get balances: {}", e)))?;

        let found: std::collections::HashMap<Uuid, i64> = rows.into_iter().collect();
        let balances = sku_ids
            .iter()
            .map(|&sku_id| crate::models::SkuBalance {
                sku_id,
                balance: found.get(&sku_id).copied().unwrap_or(0),
            })
            .collect();

        timer.observe_duration();

        Ok(balances)
    }

    /// List a SKU's ledger entries in posting order.
    #[instrument(skip(self))]
    pub async fn list_ledger(&self, sku_id: Uuid) -> Result<Vec<InventoryLedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_ledger"])
            .start_timer();

        let entries = sqlx::query_as::<_, InventoryLedgerEntry>(
            "SELECT * FROM inventory_ledger WHERE sku_id = $1 ORDER BY posted_utc, entry_id",
        )
        .bind(sku_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list ledger: {}", e)))?;

        timer.observe_duration();

        Ok(entries)
    }
}

// -------------------------------------------------------------------------
// Transaction-scoped helpers
// -------------------------------------------------------------------------

/// Lock a return line for the duration of the transaction.
async fn lock_line(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    return_line_id: Uuid,
) -> Result<ReturnLine, AppError> {
    sqlx::query_as::<_, ReturnLine>(
        "SELECT * FROM return_lines WHERE return_line_id = $1 FOR UPDATE",
    )
    .bind(return_line_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock return line: {}", e)))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Return line {} not found", return_line_id)))
}

/// Reject the operation unless the line's derived next action matches.
fn require_action(
    line: &ReturnLine,
    expected: ActionNeeded,
    operation: &str,
) -> Result<(), AppError> {
    let actual = line.action_needed();
    if actual != expected {
        TRANSITIONS_TOTAL
            .with_label_values(&[expected.as_str(), "rejected"])
            .inc();
        return Err(AppError::precondition(
            operation,
            current_state(line),
            expected,
        ));
    }
    Ok(())
}

fn current_state(line: &ReturnLine) -> String {
    format!(
        "status '{}', next action '{}'",
        line.return_status,
        line.action_needed()
    )
}

async fn set_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    return_line_id: Uuid,
    status: ReturnStatus,
) -> Result<ReturnLine, AppError> {
    sqlx::query_as::<_, ReturnLine>(
        "UPDATE return_lines SET return_status = $2 WHERE return_line_id = $1 RETURNING *",
    )
    .bind(return_line_id)
    .bind(status)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update status: {}", e)))
}

/// Append one inventory ledger entry. The only write path to the ledger;
/// there is no update or delete path anywhere in the service.
async fn post_ledger_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    sku_id: Uuid,
    txn_type: TxnType,
    qty: i32,
    reason: LedgerReason,
    reference_id: Option<Uuid>,
    created_by: Option<Uuid>,
) -> Result<InventoryLedgerEntry, AppError> {
    let entry = sqlx::query_as::<_, InventoryLedgerEntry>(
        r#"
        INSERT INTO inventory_ledger (entry_id, sku_id, txn_type, qty, reason, reference_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(sku_id)
    .bind(txn_type)
    .bind(qty)
    .bind(reason)
    .bind(reference_id)
    .bind(created_by)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to post ledger entry: {}", e)))?;

    LEDGER_ENTRIES_TOTAL
        .with_label_values(&[reason.as_str()])
        .inc();

    Ok(entry)
}

/// Insert an order with its lines inside an open transaction.
async fn insert_order(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    input: &NewOrder,
    source_return_line_id: Option<Uuid>,
) -> Result<(Order, Vec<OrderLine>), AppError> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (order_id, order_number, customer_name, source_return_line_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&input.order_number)
    .bind(&input.customer_name)
    .bind(source_return_line_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => AppError::Conflict(
            anyhow::anyhow!("Order number '{}' already exists", input.order_number),
        ),
        _ => AppError::DatabaseError(anyhow::anyhow!("Failed to insert order: {}", e)),
    })?;

    let mut lines = Vec::with_capacity(input.lines.len());
    for line in &input.lines {
        let inserted = sqlx::query_as::<_, OrderLine>(
            r#"
            INSERT INTO order_lines (order_line_id, order_id, sku_id, qty, unit_price, shipped_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.order_id)
        .bind(line.sku_id)
        .bind(line.qty)
        .bind(line.unit_price)
        .bind(line.shipped_utc)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert order line: {}", e))
        })?;
        lines.push(inserted);
    }

    Ok((order, lines))
}
