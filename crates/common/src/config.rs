use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Address the API server binds to (default: 0.0.0.0:3000)
    pub bind_addr: String,

    /// Shared secret expected in the `X-API-Key` header. Auth is disabled when unset.
    pub api_key: Option<String>,

    /// FCM legacy server key, sent as `Authorization: key=<server key>`
    pub fcm_server_key: Option<String>,

    /// When set, non-2xx FCM responses count as failed attempts (default: false)
    pub fcm_strict_status: bool,

    /// PEM certificate chain presented to APNs as the client identity
    pub apns_cert_path: Option<String>,

    /// PEM private key matching `apns_cert_path`
    pub apns_key_path: Option<String>,

    /// Bundle ID used as `apns-topic` on the HTTP/2 provider API
    pub apns_topic: Option<String>,

    /// Use the production gateways instead of the sandbox (default: true)
    pub apns_production: bool,

    /// How long the binary gateway worker waits for an error response after writing a frame.
    /// Zero disables the read entirely (default: 0)
    pub apns_error_wait_ms: u64,

    /// Maximum number of deliveries in flight at once (default: 100)
    pub push_max_concurrency: usize,

    /// Capacity of the internal worker channel (default: 1024)
    pub push_queue_capacity: usize,

    /// Base pause of the exponential backoff in milliseconds (default: 250)
    pub push_retry_base_ms: u64,

    /// Total pause budget after which retries stop, in milliseconds (default: 16000)
    pub push_retry_max_elapsed_ms: u64,

    /// Optional hard cap on the number of retries per target
    pub push_retry_max_retries: Option<u32>,

    /// Optional timeout applied to every single delivery attempt
    pub push_attempt_timeout_ms: Option<u64>,

    /// Timeout for outbound HTTP requests, and for dialing and writing to the
    /// APNs binary gateway, in seconds (default: 30)
    pub http_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded environment file");
        }

        Ok(Self {
            bind_addr: std::env::var("HERALD_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            api_key: non_empty_var("HERALD_API_KEY"),
            fcm_server_key: non_empty_var("FCM_SERVER_KEY"),
            fcm_strict_status: parse_bool(
                "FCM_STRICT_STATUS",
                &std::env::var("FCM_STRICT_STATUS").unwrap_or_else(|_| "false".to_string()),
            )?,
            apns_cert_path: non_empty_var("APNS_CERT_PATH"),
            apns_key_path: non_empty_var("APNS_KEY_PATH"),
            apns_topic: non_empty_var("APNS_TOPIC"),
            apns_production: parse_bool(
                "APNS_PRODUCTION",
                &std::env::var("APNS_PRODUCTION").unwrap_or_else(|_| "true".to_string()),
            )?,
            apns_error_wait_ms: std::env::var("APNS_ERROR_WAIT_MS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("APNS_ERROR_WAIT_MS must be a valid u64"))?,
            push_max_concurrency: std::env::var("PUSH_MAX_CONCURRENCY")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_MAX_CONCURRENCY must be a valid usize"))?,
            push_queue_capacity: std::env::var("PUSH_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_QUEUE_CAPACITY must be a valid usize"))?,
            push_retry_base_ms: std::env::var("PUSH_RETRY_BASE_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_RETRY_BASE_MS must be a valid u64"))?,
            push_retry_max_elapsed_ms: std::env::var("PUSH_RETRY_MAX_ELAPSED_MS")
                .unwrap_or_else(|_| "16000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PUSH_RETRY_MAX_ELAPSED_MS must be a valid u64"))?,
            push_retry_max_retries: non_empty_var("PUSH_RETRY_MAX_RETRIES")
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| anyhow::anyhow!("PUSH_RETRY_MAX_RETRIES must be a valid u32"))?,
            push_attempt_timeout_ms: non_empty_var("PUSH_ATTEMPT_TIMEOUT_MS")
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| anyhow::anyhow!("PUSH_ATTEMPT_TIMEOUT_MS must be a valid u64"))?,
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a valid u64"))?,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            api_key: None,
            fcm_server_key: None,
            fcm_strict_status: false,
            apns_cert_path: None,
            apns_key_path: None,
            apns_topic: None,
            apns_production: true,
            apns_error_wait_ms: 0,
            push_max_concurrency: 100,
            push_queue_capacity: 1024,
            push_retry_base_ms: 250,
            push_retry_max_elapsed_ms: 16_000,
            push_retry_max_retries: None,
            push_attempt_timeout_ms: None,
            http_timeout_secs: 30,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!("{} must be a boolean (true/false)", name)),
    }
}
