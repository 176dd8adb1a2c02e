use camino::Utf8PathBuf;
use std::collections::BTreeMap;

use forgeflow_utils::error::ConfigError;
use forgeflow_utils::types::ConfigSource;

use crate::{Config, OverflowPolicy, RetryConfig};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when embedding forgeflow, where config files and environment
    /// variables should not influence behaviour.
    ///
    /// ```rust,no_run
    /// use forgeflow_config::Config;
    ///
    /// let config = Config::builder()
    ///     .state_dir("/var/lib/forgeflow")
    ///     .max_retries(3)
    ///     .test_command(["cargo", "test"])
    ///     .build()
    ///     .expect("valid config");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Fluent builder for [`Config`].
///
/// Every value set through the builder is attributed to
/// [`ConfigSource::Programmatic`]. [`ConfigBuilder::build`] validates.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
    touched: BTreeMap<String, ConfigSource>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident, $key:literal, $ty:ty, |$cfg:ident, $v:ident| $apply:expr) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name(mut self, $v: $ty) -> Self {
            {
                let $cfg = &mut self.config;
                $apply;
            }
            self.touched
                .insert($key.to_string(), ConfigSource::Programmatic);
            self
        }
    };
}

impl ConfigBuilder {
    /// Start from built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            touched: BTreeMap::new(),
        }
    }

    /// Set the state directory for journals and progress records.
    #[must_use]
    pub fn state_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.defaults.state_dir = Some(path.into());
        self.touched
            .insert("defaults.state_dir".to_string(), ConfigSource::Programmatic);
        self
    }

    setter!(
        /// Extra generation attempts after the first (0..=10).
        max_retries, "generation.max_retries", u32, |c, n| c.generation.max_retries = n
    );
    setter!(validation_enabled, "generation.validation_enabled", bool, |c, flag| c
        .generation
        .validation_enabled = flag);
    setter!(
        /// Hours a question waits for a human (1..=720).
        interrupt_timeout_hours, "interrupts.timeout_hours", u64, |c, h| c.interrupts.timeout_hours = h
    );
    setter!(auto_proceed_on_timeout, "interrupts.auto_proceed_on_timeout", bool, |c, flag| c
        .interrupts
        .auto_proceed_on_timeout = flag);
    setter!(clarification, "interrupts.clarification", bool, |c, flag| c
        .interrupts
        .clarification = flag);
    setter!(solution_choice, "interrupts.solution_choice", bool, |c, flag| c
        .interrupts
        .solution_choice = flag);
    setter!(approval, "interrupts.approval", bool, |c, flag| c.interrupts.approval = flag);
    setter!(preflight_enabled, "steps.preflight", bool, |c, flag| c.steps.preflight = flag);
    setter!(post_comment, "steps.post_comment", bool, |c, flag| c.steps.post_comment = flag);
    setter!(sync_task, "steps.sync_task", bool, |c, flag| c.steps.sync_task = flag);
    setter!(
        /// Maximum simultaneous sandboxes (1..=256).
        max_concurrent_sandboxes, "sandbox.max_concurrent", usize, |c, n| c.sandbox.max_concurrent = n
    );
    setter!(overflow_policy, "sandbox.overflow", OverflowPolicy, |c, p| c.sandbox.overflow = p);
    setter!(sandbox_timeout_secs, "sandbox.timeout_secs", u64, |c, s| c.sandbox.timeout_secs = s);
    setter!(activity_retry, "activity_retry", RetryConfig, |c, r| c.activity_retry = r);
    setter!(sub_run_retry, "sub_run_retry", RetryConfig, |c, r| c.sub_run_retry = r);
    setter!(required_binaries, "preflight.required_binaries", Vec<String>, |c, v| c
        .preflight
        .required_binaries = v);
    setter!(required_env, "preflight.required_env", Vec<String>, |c, v| c
        .preflight
        .required_env = v);
    setter!(check_write_access, "preflight.check_write_access", bool, |c, flag| c
        .preflight
        .check_write_access = flag);

    #[must_use]
    pub fn install_command<I, S>(self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command("sandbox.install", argv, |c, v| c.sandbox.install = Some(v))
    }

    #[must_use]
    pub fn lint_command<I, S>(self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command("sandbox.lint", argv, |c, v| c.sandbox.lint = Some(v))
    }

    #[must_use]
    pub fn typecheck_command<I, S>(self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command("sandbox.typecheck", argv, |c, v| c.sandbox.typecheck = Some(v))
    }

    #[must_use]
    pub fn test_command<I, S>(self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command("sandbox.test", argv, |c, v| c.sandbox.test = Some(v))
    }

    /// Add a custom secret pattern; compiled during [`ConfigBuilder::build`].
    #[must_use]
    pub fn extra_secret_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config
            .security
            .extra_secret_patterns
            .push(pattern.into());
        self.touched.insert(
            "security.extra_secret_patterns".to_string(),
            ConfigSource::Programmatic,
        );
        self
    }

    fn command<I, S>(mut self, key: &str, argv: I, apply: impl FnOnce(&mut Config, Vec<String>)) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        apply(&mut self.config, argv.into_iter().map(Into::into).collect());
        self.touched.insert(key.to_string(), ConfigSource::Programmatic);
        self
    }

    /// Validate and produce the config.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut config = self.config;
        config.source_attribution = self.touched;
        config.validate()?;
        Ok(config)
    }
}
