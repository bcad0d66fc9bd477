use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::EngineSettings;

// Top-level configuration, one section per concern.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub reservation: ReservationConfig,
    pub qr: QrConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub availability_ttl_seconds: u64,
}

// Reservation engine knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    pub hold_minutes: i64,
    pub service_fee_rate: Decimal,
    pub currency: String,
    pub lock_timeout_ms: u64,
    pub transaction_timeout_seconds: u64,
    pub reaper_interval_seconds: u64,
    pub reaper_batch_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QrConfig {
    pub prefix: String,
    pub secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PaymentMode {
    Mock,
    Gateway,
}

// Payment collaborator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub mode: PaymentMode,
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Chat collaborator; enrollment is disabled when no URL is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub service_url: Option<String>,
}

// Lock waits shorter than this surface too eagerly, longer ones hold
// request slots for too long.
const MIN_LOCK_TIMEOUT_MS: u64 = 5_000;
const MAX_LOCK_TIMEOUT_MS: u64 = 10_000;

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(name: &str, default: &str) -> T {
    var_or(name, default)
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid value"))
}

impl Config {
    pub fn from_env() -> Self {
        let payment_mode = match var_or("PAYMENT_MODE", "mock").to_lowercase().as_str() {
            "gateway" => PaymentMode::Gateway,
            _ => PaymentMode::Mock,
        };

        Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parsed("PORT", "8000"),
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "ticket_marketplace=debug,tower_http=debug"),
                json_logs: var_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: parsed("DB_POOL_SIZE", "20"),
                acquire_timeout_seconds: parsed("DB_ACQUIRE_TIMEOUT_SECONDS", "5"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
                availability_ttl_seconds: parsed("AVAILABILITY_CACHE_TTL_SECONDS", "30"),
            },
            reservation: ReservationConfig {
                hold_minutes: parsed("RESERVATION_HOLD_MINUTES", "15"),
                service_fee_rate: parsed("SERVICE_FEE_RATE", "0.05"),
                currency: var_or("CURRENCY", "USD"),
                lock_timeout_ms: parsed::<u64>("LOCK_TIMEOUT_MS", "5000")
                    .clamp(MIN_LOCK_TIMEOUT_MS, MAX_LOCK_TIMEOUT_MS),
                transaction_timeout_seconds: parsed("TRANSACTION_TIMEOUT_SECONDS", "30"),
                reaper_interval_seconds: parsed("REAPER_INTERVAL_SECONDS", "60"),
                reaper_batch_size: parsed("REAPER_BATCH_SIZE", "500"),
            },
            qr: QrConfig {
                prefix: var_or("QR_PREFIX", "TKT"),
                secret: env::var("QR_SECRET").expect("QR_SECRET must be set"),
            },
            payment: PaymentConfig {
                mode: payment_mode,
                merchant_id: var_or("MERCHANT_ID", ""),
                merchant_password: var_or("MERCHANT_PASSWORD", ""),
                gateway_url: var_or("PAYMENT_GATEWAY_URL", "https://gateway.example.com"),
                timeout_seconds: parsed("PAYMENT_TIMEOUT_SECONDS", "30"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "5"),
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", "60"),
            },
            chat: ChatConfig {
                service_url: env::var("CHAT_SERVICE_URL").ok().filter(|url| !url.is_empty()),
            },
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            hold_duration: chrono::Duration::minutes(self.reservation.hold_minutes),
            service_fee_rate: self.reservation.service_fee_rate,
            currency: self.reservation.currency.clone(),
            transaction_timeout: Duration::from_secs(self.reservation.transaction_timeout_seconds),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.reservation.lock_timeout_ms)
    }
}
