use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// Shared secret for payment provider callbacks. Empty skips the
    /// signature check (dev mode).
    pub payment_webhook_secret: String,
    pub engine: EngineConfig,
}

/// Knobs the reservation engine itself reads.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub reservation_timeout_minutes: i64,
    pub pending_booking_ttl_minutes: i64,
    pub sweep_interval_seconds: u64,
    pub customer_cancellation_cutoff_hours: i64,
    pub owner_cancellation_cutoff_hours: i64,
    pub payment_ttl_minutes: i64,
    pub auto_refund_late_payments: bool,
    pub booking_code_attempts: u32,
    pub lazy_heal: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_timeout_minutes: 10,
            pending_booking_ttl_minutes: 10,
            sweep_interval_seconds: 60,
            customer_cancellation_cutoff_hours: 2,
            owner_cancellation_cutoff_hours: 1,
            payment_ttl_minutes: 15,
            auto_refund_late_payments: false,
            booking_code_attempts: 5,
            lazy_heal: true,
        }
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reservation_timeout_minutes: var_or(
                "RESERVATION_TIMEOUT_MINUTES",
                defaults.reservation_timeout_minutes,
            ),
            pending_booking_ttl_minutes: var_or(
                "PENDING_BOOKING_TTL_MINUTES",
                defaults.pending_booking_ttl_minutes,
            ),
            sweep_interval_seconds: var_or("SWEEP_INTERVAL_SECONDS", defaults.sweep_interval_seconds),
            customer_cancellation_cutoff_hours: var_or(
                "CUSTOMER_CANCELLATION_CUTOFF_HOURS",
                defaults.customer_cancellation_cutoff_hours,
            ),
            owner_cancellation_cutoff_hours: var_or(
                "OWNER_CANCELLATION_CUTOFF_HOURS",
                defaults.owner_cancellation_cutoff_hours,
            ),
            payment_ttl_minutes: var_or("PAYMENT_TTL_MINUTES", defaults.payment_ttl_minutes),
            auto_refund_late_payments: var_or(
                "AUTO_REFUND_LATE_PAYMENTS",
                defaults.auto_refund_late_payments,
            ),
            booking_code_attempts: var_or("BOOKING_CODE_ATTEMPTS", defaults.booking_code_attempts),
            lazy_heal: var_or("LAZY_HEAL", defaults.lazy_heal),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: var_or("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "slotbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            engine: EngineConfig::from_env(),
        }
    }
}
