use std::{env, sync::Arc, time::Duration};

use uuid::Uuid;

use crate::plans::{PlanCatalog, PlanIds};

#[derive(Clone, Debug)]
/// Configuration struct for the server.
///
/// Holds the database connection details, the plan ids the catalog is built
/// from, gateway credentials and the knobs of the background refund worker.
pub struct Config {
    // environment
    pub environment: String, // development or production
    /// The URL of the database to connect to.
    pub database_url: String,
    /// The hostname or IP address the server will bind to.
    pub server_host: String,
    /// The port number the server will listen on.
    pub server_port: u16,
    /// The number of worker threads to spawn for handling requests.
    pub num_workers: usize,
    /// The allowed origin for CORS (Cross-Origin Resource Sharing).
    pub cors_allowed_origin: String,
    /// A boolean indicating whether console logging is enabled.
    pub console_logging_enabled: bool,
    /// Minimum level passed to the logger.
    pub log_level: log::LevelFilter,
    /// File the logger mirrors its output into.
    pub log_file: String,
    /// Ids of the free, basic and pro plans.
    pub plan_ids: PlanIds,
    /// Payment gateway configuration.
    pub gateway: GatewayConfig,
    /// Base URL of the notification service. Empty disables notifications.
    pub notification_url: String,
    /// Retry policy of the refund worker.
    pub refund_retry: RetryPolicy,
}

#[derive(Clone, Debug)]
/// Credentials and endpoint of the payment gateway.
pub struct GatewayConfig {
    /// Public key id, used as the basic auth user.
    pub api_key: String,
    /// Shared secret. Signs payment callbacks and authenticates API calls.
    pub api_secret: String,
    /// REST base URL.
    pub base_url: String,
    /// Upper bound for a single gateway call.
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

fn required_uuid(name: &str) -> Uuid {
    let raw = env::var(name).unwrap_or_else(|_| panic!("{} must be set", name));
    Uuid::parse_str(&raw).unwrap_or_else(|_| panic!("{} must be a valid UUID", name))
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `ENVIRONMENT`: `development` or `production`
    /// - `DATABASE_URL`: Connection string for the database
    /// - `FREE_PLAN_ID`, `BASIC_PLAN_ID`, `PRO_PLAN_ID`: plan UUIDs
    /// - `RAZORPAY_API_SECRET`: gateway secret, also the callback signing key
    ///
    /// Optional (with defaults):
    /// - `IP`: Server host (default: "127.0.0.1")
    /// - `PORT`: Server port (default: 8080)
    /// - `WORKERS`: Number of worker threads (default: 4)
    /// - `CORS_ALLOWED_ORIGIN`: Allowed CORS origin (default: "http://localhost:3000")
    /// - `ENABLE_CONSOLE_LOGGING`: Whether to enable console logging (default: true)
    /// - `LOG_LEVEL` (default: "debug"), `LOG_FILE` (default: "subscriptions.log")
    /// - `RAZORPAY_API_KEY`, `RAZORPAY_BASE_URL` (default: "https://api.razorpay.com/v1")
    /// - `GATEWAY_TIMEOUT_SECS` (default: 10)
    /// - `NOTIFICATION_URL` (default: empty, notifications disabled)
    /// - `REFUND_MAX_ATTEMPTS` (default: 5), `REFUND_RETRY_BASE_MS` (default: 500)
    ///
    /// # Panics
    ///
    /// This function will panic if required environment variables are missing or
    /// if a plan id is not a UUID.
    pub fn from_env() -> Arc<Self> {
        dotenvy::dotenv().ok();

        Arc::new(Config {
            environment: env::var("ENVIRONMENT").expect("ENVIRONMENT must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            server_host: env::var("IP").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: parsed_or("PORT", 8080),
            num_workers: parsed_or("WORKERS", 4),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            console_logging_enabled: env::var("ENABLE_CONSOLE_LOGGING")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            log_level: parsed_or("LOG_LEVEL", log::LevelFilter::Debug),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "subscriptions.log".to_string()),
            plan_ids: PlanIds {
                free: required_uuid("FREE_PLAN_ID"),
                basic: required_uuid("BASIC_PLAN_ID"),
                pro: required_uuid("PRO_PLAN_ID"),
            },
            gateway: GatewayConfig {
                api_key: env::var("RAZORPAY_API_KEY").unwrap_or_default(),
                api_secret: env::var("RAZORPAY_API_SECRET")
                    .expect("RAZORPAY_API_SECRET must be set"),
                base_url: env::var("RAZORPAY_BASE_URL")
                    .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
                timeout: Duration::from_secs(parsed_or("GATEWAY_TIMEOUT_SECS", 10)),
            },
            notification_url: env::var("NOTIFICATION_URL").unwrap_or_default(),
            refund_retry: RetryPolicy {
                max_attempts: parsed_or("REFUND_MAX_ATTEMPTS", 5),
                base_delay: Duration::from_millis(parsed_or("REFUND_RETRY_BASE_MS", 500)),
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn plan_catalog(&self) -> PlanCatalog {
        PlanCatalog::new(self.plan_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }
}
