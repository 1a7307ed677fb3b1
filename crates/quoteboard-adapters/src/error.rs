//! Adapter error types.
//!
//! All platform clients surface errors through [`AdapterError`]. Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.

/// Unified error type for quoteboard's platform clients.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The HTTP request itself failed (connection, TLS, timeout).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API answered with a non-success status.
    #[error("api error from {endpoint} (status {status}): {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// A response body could not be decoded into the expected shape.
    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    /// A required credential is missing from the environment.
    #[error("authentication required for {provider}: set {env_var}")]
    AuthRequired {
        provider: &'static str,
        env_var: &'static str,
    },

    /// The gateway websocket failed or closed unexpectedly.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// An operation exceeded its time limit.
    #[error("timeout after {seconds}s: {reason}")]
    Timeout { seconds: u64, reason: String },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client construction failed (bad base URL or similar).
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;
