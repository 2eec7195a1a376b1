//! Error types for prefgen.
//!
//! Taxonomy:
//! - Fatal configuration and quota errors abort a run before more work is done
//! - Generation and validation failures are recoverable at the batch level
//! - Infrastructure failures (network, IO) surface with context

use thiserror::Error;

/// Top-level error type for prefgen.
#[derive(Debug, Error)]
pub enum PrefgenError {
    // ═══════════════════════════════════════════════════════════════════
    // FATAL: abort the run
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Quota exhausted for category '{category}'")]
    QuotaExhausted { category: String },

    #[error("Allocation refers to unknown metadata '{category}' = '{value}'")]
    UnknownAllocation { category: String, value: String },

    #[error("Insufficient corpus: {non_empty} non-empty documents (need at least 2)")]
    InsufficientCorpus { non_empty: usize },

    // ═══════════════════════════════════════════════════════════════════
    // RECOVERABLE: allocation is restored and the item requeued
    // ═══════════════════════════════════════════════════════════════════
    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Record {item_id} failed validation: {reason}")]
    ValidationFailure { item_id: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE
    // ═══════════════════════════════════════════════════════════════════
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Chat completion API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl PrefgenError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is worth another attempt of the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Api(ApiError::Status { status, .. }) => *status >= 500,
            _ => false,
        }
    }

    /// Check if this error leaves the run in a recoverable state.
    ///
    /// Recoverable errors restore the allocation and requeue the item.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::GenerationFailure(_) | Self::ValidationFailure { .. } | Self::ParseError(_) => {
                true
            }
            Self::Api(ApiError::Status { .. } | ApiError::MaxRetriesExceeded { .. }) => true,
            _ => self.is_retryable(),
        }
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// Result type alias for prefgen.
pub type Result<T> = std::result::Result<T, PrefgenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PrefgenError::RateLimited {
            retry_after_secs: 2.0
        }
        .is_retryable());
        assert!(PrefgenError::Api(ApiError::Status {
            status: 503,
            message: "busy".into()
        })
        .is_retryable());
        assert!(!PrefgenError::Api(ApiError::AuthenticationFailed).is_retryable());
        assert!(!PrefgenError::QuotaExhausted {
            category: "tone".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_recoverable_excludes_fatal_errors() {
        assert!(PrefgenError::GenerationFailure("bad json".into()).is_recoverable());
        assert!(!PrefgenError::Api(ApiError::AuthenticationFailed).is_recoverable());
        assert!(!PrefgenError::Configuration("empty".into()).is_recoverable());
        assert!(!PrefgenError::QuotaExhausted {
            category: "tone".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_quota_exhausted_names_category() {
        let err = PrefgenError::QuotaExhausted {
            category: "emotional_intensity".into(),
        };
        assert!(err.to_string().contains("emotional_intensity"));
    }
}
