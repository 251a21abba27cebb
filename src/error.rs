//! Error types for loopback-signin
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for sign-in operations
///
/// Covers the loopback interception flow (configuration, cancellation,
/// browser launch, transport) as well as the token endpoint, the token cache
/// and the downstream profile API.
#[derive(Error, Debug)]
pub enum SigninError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The redirect URI cannot be served by a loopback listener
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The wait for the browser callback was cancelled or timed out
    #[error("Operation cancelled while waiting for the authorization callback")]
    Cancelled,

    /// No browser launch strategy is available on this platform
    #[error("Unsupported platform: cannot open a browser on {0}")]
    UnsupportedPlatform(String),

    /// The authorization server redirected back with an `error` parameter
    #[error("Authorization denied: {error} ({description})")]
    AuthorizationDenied {
        /// The `error` code from the callback
        error: String,
        /// The `error_description` from the callback, empty when absent
        description: String,
    },

    /// Socket bind/accept/read/write failures
    #[error("Transport failure: {context}: {source}")]
    Transport {
        /// What the listener was doing when the failure happened
        context: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The `state` returned in the callback does not match the request
    #[error("State mismatch in authorization callback")]
    StateMismatch,

    /// Token endpoint errors (non-2xx, malformed responses, missing code)
    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),

    /// Device code flow errors
    #[error("Device code flow error: {0}")]
    DeviceCode(String),

    /// Downstream profile API errors
    #[error("Graph error: {0}")]
    Graph(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl SigninError {
    /// Builds a [`SigninError::Transport`] from an IO error and a short
    /// description of the failed operation.
    pub fn transport(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias for sign-in operations
///
/// Uses `anyhow::Error` so callers can attach context; the concrete
/// [`SigninError`] can be recovered with `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = SigninError::Config("missing client_id".to_string());
        assert_eq!(error.to_string(), "Configuration error: missing client_id");
    }

    #[test]
    fn test_invalid_configuration_display() {
        let error = SigninError::InvalidConfiguration("https://example.com".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: https://example.com"
        );
    }

    #[test]
    fn test_cancelled_display() {
        let error = SigninError::Cancelled;
        assert!(error.to_string().contains("cancelled"));
    }

    #[test]
    fn test_authorization_denied_display() {
        let error = SigninError::AuthorizationDenied {
            error: "access_denied".to_string(),
            description: "User cancelled".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Authorization denied: access_denied (User cancelled)"
        );
    }

    #[test]
    fn test_transport_keeps_os_error_as_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let error = SigninError::transport("failed to bind 127.0.0.1:8400", io);
        assert!(error.to_string().contains("127.0.0.1:8400"));
        assert!(error.to_string().contains("address in use"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_unsupported_platform_display() {
        let error = SigninError::UnsupportedPlatform("plan9".to_string());
        assert_eq!(
            error.to_string(),
            "Unsupported platform: cannot open a browser on plan9"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: SigninError = io_error.into();
        assert!(matches!(error, SigninError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: SigninError = json_error.into();
        assert!(matches!(error, SigninError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: SigninError = yaml_error.into();
        assert!(matches!(error, SigninError::Yaml(_)));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = SigninError::StateMismatch.into();
        assert!(matches!(
            err.downcast_ref::<SigninError>(),
            Some(SigninError::StateMismatch)
        ));
    }
}
