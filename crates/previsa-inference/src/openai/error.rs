//! Mapping of provider error responses onto previsa errors.

use previsa_core::Error;

/// Error classes reported by OpenAI-compatible providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    AuthenticationError,
    RateLimitExceeded,
    ModelNotFound,
    /// Input longer than the model accepts.
    ContextLengthExceeded,
    ServerError,
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether a later attempt could succeed without a configuration change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Convert a provider error into an embedding error.
///
/// Everything surfaces as `Error::Embedding`; the job queue retries
/// uniformly, the prefix only helps operators reading the job's error.
pub fn to_previsa_error(code: OpenAIErrorCode, message: &str) -> Error {
    let prefix = match code {
        OpenAIErrorCode::AuthenticationError => "Authentication failed",
        OpenAIErrorCode::RateLimitExceeded => "Rate limit exceeded",
        OpenAIErrorCode::ModelNotFound => "Model not found",
        OpenAIErrorCode::ContextLengthExceeded => "Input too long",
        OpenAIErrorCode::ServerError => "Server error",
        OpenAIErrorCode::Unknown => return Error::Embedding(message.to_string()),
    };
    Error::Embedding(format!("{}: {}", prefix, message))
}
