//! Return line state machine integration tests.
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test -- --ignored

mod common;

use common::{field_uuid, initiate_return, receive_line, record_qc, seed_order, TestApp};
use serde_json::{json, Value};

#[tokio::test]
#[ignore]
async fn pickup_flow_walks_through_transit() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "799.00", Some(3)).await;
    let line = initiate_return(&app, &order, 1, "refund", "arranged_by_us", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    let response = app
        .post(
            &format!("/returns/{}/schedule-pickup", line_id),
            &json!({ "courier": "BlueDart", "awb_number": "AWB123456" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["return_status"], "pickup_scheduled");
    assert_eq!(body["return_courier"], "BlueDart");
    assert_eq!(body["return_awb_number"], "AWB123456");
    assert_eq!(body["action_needed"], "receive");

    let response = app
        .post(&format!("/returns/{}/mark-in-transit", line_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["return_status"], "in_transit");
    assert_eq!(body["action_needed"], "receive");

    let body = receive_line(&app, line_id, "good").await;
    assert_eq!(body["return_status"], "received");
    assert_eq!(body["condition"], "good");
    assert_eq!(body["action_needed"], "awaiting_qc");
}

/// Scenario F: scheduling a pickup on a received line is rejected with the
/// mismatched precondition spelled out.
#[tokio::test]
#[ignore]
async fn schedule_on_received_line_is_rejected_with_detail() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "799.00", Some(3)).await;
    let line = initiate_return(&app, &order, 1, "refund", "customer_shipped", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "good").await;

    let response = app
        .post(
            &format!("/returns/{}/schedule-pickup", line_id),
            &json!({ "courier": "BlueDart", "awb_number": "AWB999" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("received"), "got: {message}");
    assert!(message.contains("schedule_pickup"), "got: {message}");
}

/// Scenario B: a sellable approved unit posts exactly one inward entry.
#[tokio::test]
#[ignore]
async fn approving_good_condition_posts_inventory_once() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 2, "450.00", Some(4)).await;
    let line = initiate_return(&app, &order, 2, "refund", "customer_shipped", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "good").await;
    let body = record_qc(&app, line_id, "approved").await;

    let entry = &body["inventory_entry"];
    assert_eq!(entry["txn_type"], "inward");
    assert_eq!(entry["reason"], "return_received");
    assert_eq!(entry["qty"], 2);
    assert_eq!(field_uuid(entry, "reference_id"), line_id);
    assert_eq!(body["line"]["action_needed"], "process_refund");

    let balances: Value = app
        .get(&format!("/inventory/balances?sku_ids={}", order.sku_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(balances["balances"][0]["balance"], 2);
}

/// Scenario C: a written-off unit posts nothing and the line just needs
/// closing out.
#[tokio::test]
#[ignore]
async fn write_off_posts_no_inventory() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "450.00", Some(4)).await;
    let line = initiate_return(&app, &order, 1, "refund", "customer_shipped", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "damaged").await;
    let response = app
        .post(
            &format!("/returns/{}/qc", line_id),
            &json!({ "decision": "written_off", "write_off_reason": "crushed packaging" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body.get("inventory_entry").is_none());
    assert_eq!(body["line"]["action_needed"], "complete");

    let balances: Value = app
        .get(&format!("/inventory/balances?sku_ids={}", order.sku_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(balances["balances"][0]["balance"], 0);

    let response = app
        .post(&format!("/returns/{}/complete", line_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["return_status"], "complete");
    assert_eq!(body["action_needed"], "none");
}

#[tokio::test]
#[ignore]
async fn second_qc_decision_conflicts_and_never_posts_twice() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "450.00", Some(4)).await;
    let line = initiate_return(&app, &order, 1, "refund", "customer_shipped", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "good").await;
    record_qc(&app, line_id, "approved").await;

    let response = app
        .post(
            &format!("/returns/{}/qc", line_id),
            &json!({ "decision": "approved" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 409);

    let ledger: Value = app
        .get(&format!("/inventory/ledger?sku_id={}", order.sku_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ledger["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
#[ignore]
async fn exchange_line_creates_linked_order() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "999.00", Some(2)).await;
    let exchange_sku = uuid::Uuid::new_v4();
    let line = initiate_return(
        &app,
        &order,
        1,
        "exchange",
        "customer_shipped",
        Some(exchange_sku),
    )
    .await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "good").await;
    let body = record_qc(&app, line_id, "approved").await;
    assert_eq!(body["line"]["action_needed"], "create_exchange");

    let response = app
        .post(&format!("/returns/{}/exchange", line_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["line"]["return_status"], "complete");
    assert_eq!(
        body["line"]["exchange_order_number"],
        body["exchange_order"]["order_number"]
    );
    assert_eq!(field_uuid(&body["exchange_order"], "source_return_line_id"), line_id);
    assert!(body["exchange_order"]["order_number"]
        .as_str()
        .unwrap()
        .starts_with("EX-"));
}

#[tokio::test]
#[ignore]
async fn written_off_exchange_is_flagged_for_manual_review() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "999.00", Some(2)).await;
    let line = initiate_return(
        &app,
        &order,
        1,
        "exchange",
        "customer_shipped",
        Some(uuid::Uuid::new_v4()),
    )
    .await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "defective").await;
    let body = record_qc(&app, line_id, "written_off").await;
    assert_eq!(body["line"]["action_needed"], "complete");
    assert_eq!(body["line"]["needs_manual_review"], true);

    // No exchange may be created for a written-off item
    let response = app
        .post(&format!("/returns/{}/exchange", line_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
#[ignore]
async fn batch_schedule_reports_per_line_outcomes() {
    let app = TestApp::spawn().await;

    let order_a = seed_order(&app, 1, "300.00", Some(2)).await;
    let schedulable = initiate_return(&app, &order_a, 1, "refund", "arranged_by_us", None).await;
    let schedulable_id = field_uuid(&schedulable, "return_line_id");

    // This one skips the pickup step entirely, so scheduling must fail
    let order_b = seed_order(&app, 1, "300.00", Some(2)).await;
    let unschedulable = initiate_return(&app, &order_b, 1, "refund", "customer_shipped", None).await;
    let unschedulable_id = field_uuid(&unschedulable, "return_line_id");

    let response = app
        .post(
            "/returns/schedule-pickup",
            &json!({
                "return_line_ids": [schedulable_id, unschedulable_id],
                "courier": "Delhivery",
                "awb_number": "AWB777",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();

    let batch_number = body["batch_number"].as_str().unwrap();
    assert!(batch_number.starts_with("RB-"));

    let outcomes = body["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["scheduled"], true);
    assert_eq!(outcomes[0]["line"]["return_batch_number"], batch_number);
    assert_eq!(outcomes[1]["scheduled"], false);
    assert!(outcomes[1]["error"].as_str().unwrap().contains("schedule"));
}

#[tokio::test]
#[ignore]
async fn cancel_is_rejected_after_completion() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "450.00", Some(4)).await;
    let line = initiate_return(&app, &order, 1, "refund", "customer_shipped", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "damaged").await;
    record_qc(&app, line_id, "written_off").await;
    app.post(&format!("/returns/{}/complete", line_id), &json!({}))
        .await;

    let response = app
        .post(&format!("/returns/{}/cancel", line_id), &json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
#[ignore]
async fn notes_remain_editable_after_completion() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 1, "450.00", Some(4)).await;
    let line = initiate_return(&app, &order, 1, "refund", "customer_shipped", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    receive_line(&app, line_id, "damaged").await;
    record_qc(&app, line_id, "written_off").await;
    app.post(&format!("/returns/{}/complete", line_id), &json!({}))
        .await;

    let response = app
        .patch(
            &format!("/returns/{}/notes", line_id),
            &json!({ "notes": "customer informed, goodwill voucher issued" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["notes"],
        "customer informed, goodwill voucher issued"
    );
    // Still terminal
    assert_eq!(body["return_status"], "complete");
}

#[tokio::test]
#[ignore]
async fn open_queue_excludes_terminal_lines() {
    let app = TestApp::spawn().await;
    let order = seed_order(&app, 2, "450.00", Some(4)).await;
    let line = initiate_return(&app, &order, 1, "refund", "customer_shipped", None).await;
    let line_id = field_uuid(&line, "return_line_id");

    app.post(&format!("/returns/{}/cancel", line_id), &json!({}))
        .await;

    let open: Value = app
        .get(&format!("/returns?order_id={}", order.order_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(open.as_array().unwrap().len(), 0);

    let all: Value = app
        .get(&format!("/returns?order_id={}&status=all", order.order_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 1);
    assert_eq!(all[0]["return_status"], "cancelled");
    assert_eq!(all[0]["action_needed"], "none");
}
