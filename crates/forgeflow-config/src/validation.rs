use forgeflow_utils::error::ConfigError;
use forgeflow_utils::types::ValidationPhase;

use crate::{Config, RetryConfig};

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.max_retries > 10 {
            return Err(invalid(
                "generation.max_retries",
                "exceeds maximum limit of 10",
            ));
        }

        let hours = self.interrupts.timeout_hours;
        if hours == 0 {
            return Err(invalid(
                "interrupts.timeout_hours",
                "must be greater than 0",
            ));
        }
        if hours > 720 {
            return Err(invalid(
                "interrupts.timeout_hours",
                "exceeds maximum limit of 720 hours (30 days)",
            ));
        }

        let sandbox = &self.sandbox;
        if sandbox.max_concurrent == 0 {
            return Err(invalid("sandbox.max_concurrent", "must be greater than 0"));
        }
        if sandbox.max_concurrent > 256 {
            return Err(invalid(
                "sandbox.max_concurrent",
                "exceeds maximum limit of 256",
            ));
        }
        if sandbox.timeout_secs == 0 || sandbox.timeout_secs > 86_400 {
            return Err(invalid(
                "sandbox.timeout_secs",
                "must be between 1 and 86400 seconds",
            ));
        }
        if sandbox.output_cap_bytes < 1024 {
            return Err(invalid(
                "sandbox.output_cap_bytes",
                "must be at least 1024 bytes (1 KiB)",
            ));
        }
        for phase in ValidationPhase::COMMAND_PHASES {
            if let Some(argv) = sandbox.command_for(phase)
                && argv.first().is_none_or(|program| program.trim().is_empty())
            {
                return Err(invalid(
                    &format!("sandbox.{phase}"),
                    "command must name a program",
                ));
            }
        }

        validate_retry("activity_retry", &self.activity_retry)?;
        validate_retry("sub_run_retry", &self.sub_run_retry)?;

        if self.preflight.endpoint_timeout_ms == 0 {
            return Err(invalid(
                "preflight.endpoint_timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.vcs.branch_prefix.contains(char::is_whitespace) {
            return Err(invalid("vcs.branch_prefix", "must not contain whitespace"));
        }

        if let Err(e) = forgeflow_redaction::SecretRedactor::from_config(&self.security) {
            return Err(invalid(
                "security.extra_secret_patterns",
                format!("invalid regex: {e}"),
            ));
        }

        Ok(())
    }
}

fn validate_retry(section: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(invalid(
            &format!("{section}.max_attempts"),
            "must be at least 1",
        ));
    }
    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        return Err(invalid(
            &format!("{section}.backoff_multiplier"),
            "must be a finite number >= 1.0",
        ));
    }
    if retry.initial_backoff_ms > retry.max_backoff_ms {
        return Err(invalid(
            &format!("{section}.initial_backoff_ms"),
            "must not exceed max_backoff_ms",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(err: ConfigError) -> String {
        match err {
            ConfigError::InvalidValue { key, .. } => key,
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_max_retries_upper_bound() {
        let mut config = Config::default();
        config.generation.max_retries = 10;
        config.validate().unwrap();
        config.generation.max_retries = 11;
        assert_eq!(key_of(config.validate().unwrap_err()), "generation.max_retries");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.sandbox.max_concurrent = 0;
        assert_eq!(key_of(config.validate().unwrap_err()), "sandbox.max_concurrent");
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut config = Config::default();
        config.sandbox.test = Some(Vec::new());
        assert_eq!(key_of(config.validate().unwrap_err()), "sandbox.test");
    }

    #[test]
    fn test_retry_bounds() {
        let mut config = Config::default();
        config.sub_run_retry.backoff_multiplier = 0.5;
        assert_eq!(
            key_of(config.validate().unwrap_err()),
            "sub_run_retry.backoff_multiplier"
        );

        let mut config = Config::default();
        config.activity_retry.initial_backoff_ms = 100_000;
        assert_eq!(
            key_of(config.validate().unwrap_err()),
            "activity_retry.initial_backoff_ms"
        );
    }

    #[test]
    fn test_bad_secret_pattern_rejected() {
        let mut config = Config::default();
        config.security.extra_secret_patterns = vec!["([unclosed".to_string()];
        assert_eq!(
            key_of(config.validate().unwrap_err()),
            "security.extra_secret_patterns"
        );
    }
}
