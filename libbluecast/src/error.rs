//! Error types for Bluecast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BluecastError>;

#[derive(Error, Debug)]
pub enum BluecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BluecastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BluecastError::InvalidInput(_) => 3,
            BluecastError::Platform(PlatformError::Authentication(_)) => 2,
            BluecastError::Platform(_) => 1,
            BluecastError::Config(_) => 1,
            BluecastError::State(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Per-platform failure taxonomy.
///
/// Duplicate detection is deliberately absent: a duplicate-skip is a normal
/// publish outcome, not an error.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Content translation failed: {0}")]
    Translation(String),

    #[error("Publishing failed: {0}")]
    Publish(String),

    #[error("Media handling failed: {0}")]
    Media(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = BluecastError::InvalidInput("Empty handle".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error =
            BluecastError::Platform(PlatformError::Authentication("Bad app password".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_platform_errors() {
        let fetch = BluecastError::Platform(PlatformError::Fetch("timeout".to_string()));
        let publish = BluecastError::Platform(PlatformError::Publish("rejected".to_string()));
        let rate = BluecastError::Platform(PlatformError::RateLimit("429".to_string()));
        let network = BluecastError::Platform(PlatformError::Network("refused".to_string()));
        assert_eq!(fetch.exit_code(), 1);
        assert_eq!(publish.exit_code(), 1);
        assert_eq!(rate.exit_code(), 1);
        assert_eq!(network.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_config_error() {
        let error = BluecastError::Config(ConfigError::MissingField("bluesky.handle".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_state_error() {
        let error = BluecastError::State(StateError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        )));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting() {
        let error = BluecastError::Platform(PlatformError::Fetch("connection reset".to_string()));
        assert_eq!(
            format!("{}", error),
            "Platform error: Fetch failed: connection reset"
        );

        let error = BluecastError::Platform(PlatformError::Translation("empty post".to_string()));
        assert_eq!(
            format!("{}", error),
            "Platform error: Content translation failed: empty post"
        );
    }

    #[test]
    fn test_error_conversion_from_platform_error() {
        let platform_error = PlatformError::Publish("boom".to_string());
        let error: BluecastError = platform_error.into();
        assert!(matches!(error, BluecastError::Platform(_)));
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let config_error = ConfigError::MissingField("mastodon.instance".to_string());
        let error: BluecastError = config_error.into();
        assert!(matches!(error, BluecastError::Config(_)));
    }

    #[test]
    fn test_platform_error_clone() {
        let original = PlatformError::Network("connection failed".to_string());
        let cloned = original.clone();
        assert_eq!(format!("{}", original), format!("{}", cloned));
    }

    #[test]
    fn test_media_error_formatting() {
        let error = PlatformError::Media("download returned 404".to_string());
        assert_eq!(
            format!("{}", error),
            "Media handling failed: download returned 404"
        );
    }
}
