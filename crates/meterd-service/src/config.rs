//! Service configuration.

use meterd_engine::DEFAULT_GRACE_HOURS;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/meterd").
    pub data_dir: String,

    /// API key for service-to-service metering calls.
    pub service_api_key: Option<String>,

    /// API key for configuration (plans, credits, period overrides).
    pub admin_api_key: Option<String>,

    /// Payment collaborator base URL (optional).
    pub payment_api_url: Option<String>,

    /// Payment collaborator API key (optional).
    pub payment_api_key: Option<String>,

    /// Secret for verifying inbound payment-status webhooks (optional).
    pub payment_webhook_secret: Option<String>,

    /// Notification collaborator webhook URL for threshold alerts (optional).
    pub notify_webhook_url: Option<String>,

    /// Grace window in hours between a period's end and its final close.
    pub grace_hours: i64,

    /// Interval in seconds between billing-cycle passes.
    pub billing_cycle_interval_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/meterd".into()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            payment_api_url: std::env::var("PAYMENT_API_URL").ok(),
            payment_api_key: std::env::var("PAYMENT_API_KEY").ok(),
            payment_webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET").ok(),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
            grace_hours: std::env::var("GRACE_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_GRACE_HOURS),
            billing_cycle_interval_seconds: std::env::var("BILLING_CYCLE_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/meterd".into(),
            service_api_key: None,
            admin_api_key: None,
            payment_api_url: None,
            payment_api_key: None,
            payment_webhook_secret: None,
            notify_webhook_url: None,
            grace_hours: DEFAULT_GRACE_HOURS,
            billing_cycle_interval_seconds: 300,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
