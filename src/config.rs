use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,

    /// Token verification configuration
    pub auth: AuthConfig,

    /// State backend configuration
    pub state: StateConfig,

    /// Chat protocol configuration
    pub chat: ChatConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: REEF_CHAT)
            .add_source(
                config::Environment::with_prefix("REEF_CHAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            state: StateConfig::default(),
            chat: ChatConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the JWT signing secret
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,

    /// Token lifetime for tokens issued by this service (seconds)
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: default_jwt_secret_env(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl AuthConfig {
    /// Resolve the signing secret from the environment.
    ///
    /// Falls back to a development-only secret so local runs and tests work
    /// without setup; production deployments must set the variable.
    pub fn secret(&self) -> String {
        std::env::var(&self.jwt_secret_env).unwrap_or_else(|_| {
            tracing::warn!(
                var = %self.jwt_secret_env,
                "JWT secret not set, using development fallback"
            );
            "reef-chat-dev-secret".to_string()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// State backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Room every community connection may address without joining another
    #[serde(default = "default_room")]
    pub default_room: String,

    /// Maximum message body length in characters
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// History page size when the client omits one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound on client-requested history page sizes
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Transport heartbeat interval (seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Idle time before a session is considered dead (seconds)
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// How often the expired-session sweep runs (seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_room: default_room(),
            max_message_len: default_max_message_len(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            session_timeout_secs: default_session_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
            service_name: default_service_name(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_jwt_secret_env() -> String {
    "REEF_CHAT_JWT_SECRET".to_string()
}

fn default_token_ttl() -> u64 {
    86400
}

fn default_room() -> String {
    "main-chat".to_string()
}

fn default_max_message_len() -> usize {
    5000
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    100
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_session_timeout() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "reef-chat".to_string()
}
