use std::fmt;
use thiserror::Error;

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;

    /// Render message, context and suggestions as one block of text.
    ///
    /// The output is passed through the default secret redactor so that
    /// tokens quoted in error messages never reach a terminal.
    fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        forgeflow_redaction::redact_user_string(&output)
    }
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Preflight,
    Generation,
    Validation,
    HumanInput,
    Sandbox,
    Persistence,
    Cancellation,
    Concurrency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Preflight => write!(f, "Preflight"),
            Self::Generation => write!(f, "Generation"),
            Self::Validation => write!(f, "Validation"),
            Self::HumanInput => write!(f, "Human Input"),
            Self::Sandbox => write!(f, "Sandbox"),
            Self::Persistence => write!(f, "Persistence"),
            Self::Cancellation => write!(f, "Cancellation"),
            Self::Concurrency => write!(f, "Concurrency"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => {
                format!("Configuration file has invalid format: {reason}")
            }
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
            Self::DiscoveryFailed { reason } => {
                format!("Failed to discover configuration: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile(_) => {
                Some("Configuration files must be valid TOML with known sections such as [generation], [sandbox] and [interrupts].".to_string())
            }
            Self::InvalidValue { key, .. } => {
                Some(format!("The '{key}' option has range or format requirements."))
            }
            Self::NotFound { .. } | Self::DiscoveryFailed { .. } => Some(
                "forgeflow searches for .forgeflow/config.toml from the current directory upward, then $FORGEFLOW_HOME/config.toml.".to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax with a TOML validator".to_string(),
                "Run `forgeflow config` to see the effective configuration".to_string(),
            ],
            Self::InvalidValue { key, .. } => match key.as_str() {
                "generation.max_retries" => {
                    vec!["Use a value between 0 and 10".to_string()]
                }
                "interrupts.timeout_hours" => {
                    vec!["Use a value between 1 and 720 hours".to_string()]
                }
                "sandbox.max_concurrent" => {
                    vec!["Use a value between 1 and 256".to_string()]
                }
                _ => vec![format!("Review the '{key}' entry in .forgeflow/config.toml")],
            },
            Self::NotFound { path } => vec![
                format!("Create the file at {path} or pass --config with a valid path"),
            ],
            Self::DiscoveryFailed { .. } => vec![
                "Pass --config explicitly".to_string(),
                "Check directory permissions".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}
