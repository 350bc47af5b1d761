use anyhow::{Context, Result};
use dotenvy::dotenv;
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config::Config as CommonConfig;
use std::env;

use crate::services::fees::RestockingFee;

#[derive(Clone, Debug)]
pub struct ReturnsConfig {
    pub common: CommonConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub policy: ReturnPolicy,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Return policy knobs consumed by eligibility checks and fee suggestions.
#[derive(Clone, Debug)]
pub struct ReturnPolicy {
    pub window_days: i64,
    pub grace_days: i64,
    pub shipping_fee: Decimal,
    pub restocking_fee: RestockingFee,
}

impl ReturnsConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let common = CommonConfig::load().context("Failed to load common configuration")?;

        let log_level = env::var("RETURNS_LOG_LEVEL")
            .unwrap_or_else(|_| "info,returns_service=debug".to_string());
        let otlp_endpoint = env::var("RETURNS_OTLP_ENDPOINT").ok();

        let db_url =
            env::var("RETURNS_DATABASE_URL").context("RETURNS_DATABASE_URL must be set")?;
        let max_connections = env::var("RETURNS_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("RETURNS_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()?;

        let window_days = env::var("RETURN_WINDOW_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;
        let grace_days = env::var("RETURN_GRACE_DAYS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()?;
        let shipping_fee = env::var("RETURN_SHIPPING_FEE")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<Decimal>()?;

        let restocking_fee = match env::var("RESTOCKING_FEE_TYPE").ok().as_deref() {
            Some("flat") => RestockingFee::Flat(restocking_fee_value()?),
            Some("percent") => RestockingFee::Percent(restocking_fee_value()?),
            Some(other) => {
                anyhow::bail!("RESTOCKING_FEE_TYPE must be 'flat' or 'percent', got '{other}'")
            }
            None => RestockingFee::None,
        };

        Ok(Self {
            common,
            service_name: "returns-service".to_string(),
            log_level,
            otlp_endpoint,
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            policy: ReturnPolicy {
                window_days,
                grace_days,
                shipping_fee,
                restocking_fee,
            },
        })
    }
}

fn restocking_fee_value() -> Result<Decimal> {
    env::var("RESTOCKING_FEE_VALUE")
        .context("RESTOCKING_FEE_VALUE must be set when RESTOCKING_FEE_TYPE is")?
        .parse::<Decimal>()
        .context("RESTOCKING_FEE_VALUE must be a decimal number")
}
