use anyhow::{bail, Context};
use std::env;
use std::time::Duration;

pub const DEFAULT_FIREHOSE_URL: &str = "wss://firehose.subcults.net/commits";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Process configuration, read once at startup and validated before anything
/// else is wired up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_previous_secret: Option<String>,
    pub firehose_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub platform_fee_percent: f64,
    pub rank_trust_enabled: bool,
    pub recompute_interval: Duration,
    pub rate_limit_rpm: u32,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // .env is optional; real deployments inject the environment directly.
        let _ = dotenvy::dotenv();

        let environment = match env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is required")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 bytes");
        }
        let jwt_previous_secret = env::var("JWT_PREVIOUS_SECRET").ok().filter(|s| !s.is_empty());

        let stripe_secret_key =
            env::var("STRIPE_SECRET_KEY").context("STRIPE_SECRET_KEY is required")?;
        let stripe_webhook_secret =
            env::var("STRIPE_WEBHOOK_SECRET").context("STRIPE_WEBHOOK_SECRET is required")?;

        let firehose_url =
            env::var("FIREHOSE_URL").unwrap_or_else(|_| DEFAULT_FIREHOSE_URL.to_string());

        let platform_fee_percent = match env::var("PLATFORM_FEE_PERCENT") {
            Ok(raw) => {
                let value: f64 = raw.parse().context("PLATFORM_FEE_PERCENT must be a number")?;
                if !(0.0..=100.0).contains(&value) {
                    bail!("PLATFORM_FEE_PERCENT must be between 0 and 100");
                }
                value
            }
            Err(_) => 5.0,
        };

        let rank_trust_enabled = env::var("RANK_TRUST_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let recompute_interval = Duration::from_secs(
            env::var("RECOMPUTE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        );

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10 * 1024 * 1024);

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        Ok(Self {
            environment,
            bind_addr,
            database_url,
            jwt_secret,
            jwt_previous_secret,
            firehose_url,
            stripe_secret_key,
            stripe_webhook_secret,
            platform_fee_percent,
            rank_trust_enabled,
            recompute_interval,
            rate_limit_rpm,
            max_upload_bytes,
        })
    }
}
