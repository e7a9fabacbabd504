use thiserror::Error;

/// Main error type for the decision pipeline and execution engine
#[derive(Error, Debug)]
pub enum DeskError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Collaborator errors
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Tool error: {tool} - {reason}")]
    Tool { tool: String, reason: String },

    // Pipeline errors
    #[error("Stage failure: {stage} - {reason}")]
    Stage { stage: String, reason: String },

    #[error("Report already written: {0}")]
    ReportAlreadyWritten(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for DeskError
pub type Result<T> = std::result::Result<T, DeskError>;

/// Message fragments that mark an error as transient.
///
/// Matching is done on the lowercased rendered message, so the same
/// vocabulary classifies LLM and exchange failures alike.
pub const RETRYABLE_MARKERS: &[&str] = &[
    "404",
    "not found",
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "timed out",
    "connection",
    "rate limit",
    "too many requests",
];

/// True when `message` carries one of the transient-failure markers
pub fn message_is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl DeskError {
    /// Classify this error for the retry policy
    pub fn is_retryable(&self) -> bool {
        match self {
            DeskError::RateLimited(_) => true,
            DeskError::Http(e) if e.is_timeout() || e.is_connect() => true,
            DeskError::Auth(_) | DeskError::Validation(_) | DeskError::Config(_) => false,
            other => message_is_retryable(&other.to_string()),
        }
    }

    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        DeskError::Stage {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_messages_are_retryable() {
        assert!(DeskError::Llm("HTTP 503 Service Unavailable".into()).is_retryable());
        assert!(DeskError::Exchange("Connection reset by peer".into()).is_retryable());
        assert!(DeskError::Llm("Too Many Requests".into()).is_retryable());
        assert!(DeskError::RateLimited("slow down".into()).is_retryable());
    }

    #[test]
    fn auth_and_validation_are_fatal() {
        assert!(!DeskError::Llm("invalid api key".into()).is_retryable());
        assert!(!DeskError::Auth("503 but still auth".into()).is_retryable());
        assert!(!DeskError::Validation("leverage out of range".into()).is_retryable());
    }
}
