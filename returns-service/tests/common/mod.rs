//! Common test utilities for returns-service integration tests.

use chrono::{DateTime, Duration, Utc};
use returns_service::config::{DatabaseConfig, ReturnPolicy, ReturnsConfig};
use returns_service::services::fees::RestockingFee;
use returns_service::startup::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,returns_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Default policy for tests: 30-day window, 3-day grace, flat 50 shipping
/// fee suggestion, no restocking fee.
pub fn default_policy() -> ReturnPolicy {
    ReturnPolicy {
        window_days: 30,
        grace_days: 3,
        shipping_fee: Decimal::new(5000, 2),
        restocking_fee: RestockingFee::None,
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_policy(default_policy()).await
    }

    /// Spawn a test application on a random port with the given policy.
    pub async fn spawn_with_policy(policy: ReturnPolicy) -> Self {
        init_tracing();

        let database_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must be set to run integration tests");

        let config = ReturnsConfig {
            common: CommonConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            service_name: "returns-service-test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: Secret::new(database_url),
                max_connections: 2,
                min_connections: 1,
            },
            policy,
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let address = format!("http://127.0.0.1:{}", port);
        let client = reqwest::Client::new();

        // Wait for the server to be ready by polling the health endpoint
        let health_url = format!("{}/health", address);
        let mut attempts = 0;
        loop {
            match client.get(&health_url).send().await {
                Ok(response) if response.status().is_success() => break,
                _ if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                _ => panic!("Server did not become ready after 20 attempts"),
            }
        }

        Self { address, client }
    }

    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn patch(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .patch(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }
}

/// An order seeded through the API, with the ids tests need to drive a
/// return through its lifecycle.
pub struct SeededOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub order_line_id: Uuid,
    pub sku_id: Uuid,
}

/// Seed a single-line order. `shipped_days_ago: None` leaves the line
/// unshipped (ineligible for return).
pub async fn seed_order(
    app: &TestApp,
    qty: i32,
    unit_price: &str,
    shipped_days_ago: Option<i64>,
) -> SeededOrder {
    let sku_id = Uuid::new_v4();
    let order_number = format!("ORD-{}", &Uuid::new_v4().simple().to_string()[..12]);
    let shipped_utc: Option<DateTime<Utc>> = shipped_days_ago.map(|d| Utc::now() - Duration::days(d));

    let response = app
        .post(
            "/orders",
            &json!({
                "order_number": order_number,
                "customer_name": "Asha Rao",
                "lines": [{
                    "sku_id": sku_id,
                    "qty": qty,
                    "unit_price": unit_price,
                    "shipped_utc": shipped_utc,
                }],
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201, "Failed to seed order");

    let body: Value = response.json().await.expect("Failed to parse order JSON");
    SeededOrder {
        order_id: field_uuid(&body["order"], "order_id"),
        order_number: body["order"]["order_number"].as_str().unwrap().to_string(),
        order_line_id: field_uuid(&body["lines"][0], "order_line_id"),
        sku_id,
    }
}

/// Initiate a return for one order line and return the created line JSON.
pub async fn initiate_return(
    app: &TestApp,
    order: &SeededOrder,
    qty: i32,
    resolution: &str,
    pickup_type: &str,
    exchange_sku_id: Option<Uuid>,
) -> Value {
    let response = app
        .post(
            "/returns",
            &json!({
                "order_id": order.order_id,
                "lines": [{ "order_line_id": order.order_line_id, "qty": qty }],
                "reason_category": "size_issue",
                "resolution": resolution,
                "pickup_type": pickup_type,
                "exchange_sku_id": exchange_sku_id,
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201, "Failed to initiate return");

    let body: Value = response.json().await.expect("Failed to parse return JSON");
    body["lines"][0].clone()
}

/// Drive a customer-shipped line to `received` with the given condition.
pub async fn receive_line(app: &TestApp, line_id: Uuid, condition: &str) -> Value {
    let response = app
        .post(
            &format!("/returns/{}/receive", line_id),
            &json!({ "condition": condition }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200, "Failed to receive line");
    response.json().await.expect("Failed to parse line JSON")
}

/// Record a QC decision for a received line.
pub async fn record_qc(app: &TestApp, line_id: Uuid, decision: &str) -> Value {
    let response = app
        .post(
            &format!("/returns/{}/qc", line_id),
            &json!({ "decision": decision }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200, "Failed to record QC");
    response.json().await.expect("Failed to parse QC JSON")
}

/// Extract a UUID field from a JSON object.
pub fn field_uuid(value: &Value, field: &str) -> Uuid {
    value[field]
        .as_str()
        .unwrap_or_else(|| panic!("Missing field '{}' in {}", field, value))
        .parse()
        .expect("Invalid UUID")
}
