use thiserror::Error;

use crate::config::ConfigError;

/// Cross-crate failure classes. Library crates convert their own errors into
/// one of these at the edges (CLI exit codes, front door log fields).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::Persistence(_) => "persistence",
            Self::Integration(_) => "integration",
            Self::Configuration(_) => "config_validation",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::Persistence(_) => 4,
            Self::Integration(_) => 5,
            Self::MalformedInput(_) => 6,
        }
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::ApplicationError;

    #[test]
    fn error_class_is_stable_for_log_fields() {
        assert_eq!(
            ApplicationError::MalformedInput("bad payload".to_owned()).error_class(),
            "malformed_input"
        );
        assert_eq!(
            ApplicationError::Configuration("missing token".to_owned()).error_class(),
            "config_validation"
        );
    }

    #[test]
    fn configuration_failures_exit_with_code_two() {
        assert_eq!(ApplicationError::Configuration("x".to_owned()).exit_code(), 2);
        assert_eq!(ApplicationError::Persistence("x".to_owned()).exit_code(), 4);
    }

    #[test]
    fn display_carries_the_underlying_detail() {
        let error = ApplicationError::Integration("channel_not_found".to_owned());
        assert_eq!(error.to_string(), "integration failure: channel_not_found");
    }

    #[test]
    fn config_errors_map_to_configuration_class() {
        let error: ApplicationError =
            crate::config::ConfigError::Validation("server.port must be > 0".to_owned()).into();
        assert_eq!(error.exit_code(), 2);
        assert!(error.to_string().contains("server.port"));
    }
}
