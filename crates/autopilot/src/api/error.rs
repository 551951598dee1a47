//! Typed transport errors.
//!
//! Every failure reaching the turn loop carries an [`ErrorCode`]. The loop
//! branches on the code alone: cost and authentication failures end the run,
//! bad requests roll the transcript back, everything else is retried.

use std::fmt;
use thiserror::Error;

/// Discriminator for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AuthenticationError,
    RateLimit,
    ApiError,
    BadRequest,
    CostLimitExceeded,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthenticationError => "authentication_error",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::ApiError => "api_error",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::CostLimitExceeded => "cost_limit_exceeded",
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Bad requests are retryable only after the caller restores the last
    /// transcript the provider accepted.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimit | ErrorCode::ApiError | ErrorCode::BadRequest
        )
    }

    /// Errors that end the run immediately.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::AuthenticationError | ErrorCode::CostLimitExceeded
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by an [`LlmTransport`](super::transport::LlmTransport).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    #[error("{code}: {message}")]
    Api { code: ErrorCode, message: String },
    #[error("Cost limit exceeded: ${used:.4} >= ${limit:.4}")]
    CostLimitExceeded { used: f64, limit: f64 },
}

impl LlmError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        LlmError::Api {
            code,
            message: message.into(),
        }
    }

    pub fn cost_limit(used: f64, limit: f64) -> Self {
        LlmError::CostLimitExceeded { used, limit }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            LlmError::Api { code, .. } => *code,
            LlmError::CostLimitExceeded { .. } => ErrorCode::CostLimitExceeded,
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            LlmError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Map free-form failure text to an [`ErrorCode`].
pub fn classify_error_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("authentication")
        || lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("unauthorized")
    {
        ErrorCode::AuthenticationError
    } else if lower.contains("http 400") || lower.contains("bad request") {
        ErrorCode::BadRequest
    } else if lower.contains("429") || lower.contains("rate") || lower.contains("limit") {
        ErrorCode::RateLimit
    } else {
        ErrorCode::ApiError
    }
}

/// Map an HTTP status (plus body, for ambiguous statuses) to an [`ErrorCode`].
pub fn classify_http_status(status: u16, body: &str) -> ErrorCode {
    match status {
        401 | 403 => ErrorCode::AuthenticationError,
        429 => ErrorCode::RateLimit,
        400 | 413 | 422 => ErrorCode::BadRequest,
        402 => ErrorCode::CostLimitExceeded,
        _ if (500..600).contains(&status) => ErrorCode::ApiError,
        _ => classify_error_message(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_snake_case() {
        assert_eq!(ErrorCode::AuthenticationError.to_string(), "authentication_error");
        assert_eq!(ErrorCode::CostLimitExceeded.as_str(), "cost_limit_exceeded");
    }

    #[test]
    fn retry_policy_per_code() {
        assert!(ErrorCode::RateLimit.is_retryable());
        assert!(ErrorCode::ApiError.is_retryable());
        assert!(ErrorCode::BadRequest.is_retryable());
        assert!(!ErrorCode::AuthenticationError.is_retryable());
        assert!(!ErrorCode::CostLimitExceeded.is_retryable());
        assert!(ErrorCode::AuthenticationError.is_fatal());
    }

    #[test]
    fn cost_limit_message() {
        let err = LlmError::cost_limit(1.5, 1.0);
        assert_eq!(err.code(), ErrorCode::CostLimitExceeded);
        assert_eq!(err.to_string(), "Cost limit exceeded: $1.5000 >= $1.0000");
    }

    #[test]
    fn api_error_message_has_code_prefix() {
        let err = LlmError::new(ErrorCode::RateLimit, "slow down");
        assert_eq!(err.to_string(), "rate_limit: slow down");
        assert_eq!(err.message(), "slow down");
    }

    #[test]
    fn classify_messages() {
        assert_eq!(
            classify_error_message("Invalid API key provided"),
            ErrorCode::AuthenticationError
        );
        assert_eq!(
            classify_error_message("Rate limit reached for requests"),
            ErrorCode::RateLimit
        );
        assert_eq!(
            classify_error_message("OpenRouter API HTTP 400: bad request"),
            ErrorCode::BadRequest
        );
        assert_eq!(classify_error_message("connection reset"), ErrorCode::ApiError);
    }

    #[test]
    fn classify_statuses() {
        assert_eq!(classify_http_status(401, ""), ErrorCode::AuthenticationError);
        assert_eq!(classify_http_status(429, ""), ErrorCode::RateLimit);
        assert_eq!(classify_http_status(400, ""), ErrorCode::BadRequest);
        assert_eq!(classify_http_status(503, ""), ErrorCode::ApiError);
        assert_eq!(classify_http_status(418, "teapot"), ErrorCode::ApiError);
    }
}
