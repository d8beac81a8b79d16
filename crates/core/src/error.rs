//! Error types for the Stockwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Stockwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Middleware errors ---
    #[error("Middleware error: {0}")]
    Middleware(#[from] MiddlewareError),

    // --- Checkpoint store errors ---
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failure classes a model backend can report.
///
/// Only [`ProviderErrorKind::TransientNetwork`] and
/// [`ProviderErrorKind::RateLimited`] are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    TransientNetwork,
    RateLimited,
    InvalidRequest,
    LocalInference,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Local inference failed: {0}")]
    LocalInference(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Classify this error.
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::ApiError { status_code, .. } if *status_code >= 500 => {
                ProviderErrorKind::TransientNetwork
            }
            Self::ApiError { .. }
            | Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::NotConfigured(_) => ProviderErrorKind::InvalidRequest,
            Self::RateLimited { .. } => ProviderErrorKind::RateLimited,
            Self::Timeout(_) | Self::Network(_) => ProviderErrorKind::TransientNetwork,
            Self::LocalInference(_) => ProviderErrorKind::LocalInference,
            Self::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::RetriesExhausted { .. })
            && matches!(
                self.kind(),
                ProviderErrorKind::TransientNetwork | ProviderErrorKind::RateLimited
            )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("Middleware '{middleware}' failed: {reason}")]
    Failed { middleware: String, reason: String },

    #[error("Summary model call failed: {0}")]
    Summary(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted checkpoint for thread {thread_id}: {reason}")]
    Corrupted { thread_id: String, reason: String },
}
