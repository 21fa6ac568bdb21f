//! Error types for the payjp-rs library.
//!
//! [`ApiError`] is the single failure type returned by every tokenization call.
//! One of its variants, [`ApiError::RequiresThreeDSecure`], is not a failure at all
//! but the signal that the issuer demands a 3-D Secure step-up before a token can
//! be issued.

use crate::types::{ServiceErrorResponse, ThreeDSecureToken};
use thiserror::Error;

/// Main error type for tokenization operations.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Required request fields were absent; no request was sent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transport-level failure (no response was received)
    #[error("System error: {0}")]
    SystemError(String),

    /// A response arrived but could not be used (e.g. empty body, unexpected status class)
    #[error("Invalid response (status: {0:?})")]
    InvalidResponse(Option<u16>),

    /// Business-rule rejection returned by the server
    #[error("Service error [{}]: {}", .0.code, .0.message)]
    ServiceError(ServiceErrorResponse),

    /// The server answered 429 Too Many Requests
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The body could not be decoded into the expected shape
    #[error("Invalid payload: {cause}")]
    InvalidPayload {
        /// Raw response body
        raw: Vec<u8>,
        /// Decoder message
        cause: String,
    },

    /// The card must pass a 3-D Secure verification before a token is issued
    #[error("3-D Secure verification required: {}", .0.id)]
    RequiresThreeDSecure(ThreeDSecureToken),
}

impl ApiError {
    /// Returns true for the step-up signal, which callers should treat as a flow branch.
    pub fn is_step_up(&self) -> bool {
        matches!(self, ApiError::RequiresThreeDSecure(_))
    }

    /// Returns the server error body if this is a [`ApiError::ServiceError`].
    pub fn service_error(&self) -> Option<&ServiceErrorResponse> {
        match self {
            ApiError::ServiceError(response) => Some(response),
            _ => None,
        }
    }

    /// Message suitable for showing to the card holder.
    ///
    /// Service errors are shown verbatim since the server already localizes them.
    pub fn localized_message(&self) -> String {
        match self {
            ApiError::ServiceError(response) => response.message.clone(),
            ApiError::SystemError(cause) => cause.clone(),
            ApiError::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again.".to_string()
            }
            ApiError::InvalidInput(_) => "Please check your card details.".to_string(),
            ApiError::InvalidResponse(_) | ApiError::InvalidPayload { .. } => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
            ApiError::RequiresThreeDSecure(_) => {
                "Additional verification is required for this card.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::SystemError(err.to_string())
    }
}

/// Result type alias for tokenization operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors raised while building a [`crate::config::PayjpConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No public key was provided
    #[error("Missing public key")]
    MissingPublicKey,

    /// A configured URL could not be parsed
    #[error("URL parse error: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_error() -> ServiceErrorResponse {
        ServiceErrorResponse {
            code: "card_declined".to_string(),
            message: "Card declined".to_string(),
            param: None,
            status: 402,
            error_type: "card_error".to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::ServiceError(service_error());
        assert_eq!(err.to_string(), "Service error [card_declined]: Card declined");
        assert_eq!(ApiError::RateLimitExceeded.to_string(), "Rate limit exceeded");
    }

    #[test]
    fn test_localized_message_shows_service_message_verbatim() {
        let err = ApiError::ServiceError(service_error());
        assert_eq!(err.localized_message(), "Card declined");
        assert_eq!(err.service_error().map(|e| e.status), Some(402));
    }

    #[test]
    fn test_step_up_is_not_a_failure_tag() {
        let tds = ThreeDSecureToken::new("tds_123");
        assert!(ApiError::RequiresThreeDSecure(tds).is_step_up());
        assert!(!ApiError::RateLimitExceeded.is_step_up());
        assert!(ApiError::RateLimitExceeded.service_error().is_none());
    }

    #[test]
    fn test_config_error_conversion() {
        let parse_err = url::Url::parse("not a url").unwrap_err();
        let err: ConfigError = parse_err.into();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }
}
