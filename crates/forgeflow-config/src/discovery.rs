use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;

use forgeflow_utils::error::ConfigError;
use forgeflow_utils::types::ConfigSource;

use crate::model::TomlConfig;
use crate::{CliArgs, Config};

const CONFIG_DIR: &str = ".forgeflow";
const CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults.
    ///
    /// Uses the current working directory as the search start.
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| ConfigError::DiscoveryFailed {
            reason: format!("cannot read current directory: {e}"),
        })?;
        let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|p| ConfigError::DiscoveryFailed {
            reason: format!("current directory is not UTF-8: {}", p.display()),
        })?;
        Self::discover_from(&cwd, cli_args)
    }

    /// Path-driven variant of [`Config::discover`]; avoids process-global state.
    pub fn discover_from(start_dir: &Utf8Path, cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.is_file() {
                    return Err(ConfigError::NotFound {
                        path: explicit.to_string(),
                    });
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir),
        };

        let mut config = match &config_path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        config.apply_cli(cli_args);
        config.validate()?;
        Ok(config)
    }

    /// Load a single file; keys present in it are attributed to `config`.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidFile(format!("{path}: {e}")))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::InvalidFile(reason) => ConfigError::InvalidFile(format!("{path}: {reason}")),
            other => other,
        })
    }

    /// Parse TOML text into a config without validating it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::InvalidFile(e.to_string()))?;
        let file: TomlConfig =
            toml::from_str(content).map_err(|e| ConfigError::InvalidFile(e.to_string()))?;

        let mut config = Config {
            defaults: file.defaults.unwrap_or_default(),
            steps: file.steps.unwrap_or_default(),
            generation: file.generation.unwrap_or_default(),
            interrupts: file.interrupts.unwrap_or_default(),
            sandbox: file.sandbox.unwrap_or_default(),
            activity_retry: file.activity_retry.unwrap_or_default(),
            sub_run_retry: file
                .sub_run_retry
                .unwrap_or_else(crate::RetryConfig::sub_run_default),
            preflight: file.preflight.unwrap_or_default(),
            tracker: file.tracker.unwrap_or_default(),
            vcs: file.vcs.unwrap_or_default(),
            security: file.security.unwrap_or_default(),
            source_attribution: BTreeMap::new(),
        };
        config.source_attribution = attribute_keys(&table, ConfigSource::Config);
        Ok(config)
    }

    /// Search upward from `start_dir` for `.forgeflow/config.toml`.
    ///
    /// Stops at a repository root. Falls back to `$FORGEFLOW_HOME/config.toml`.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir.join(".git").exists() || dir.join(".hg").exists() {
                break;
            }
            current = dir.parent();
        }

        let home_config = forgeflow_utils::paths::forgeflow_home().join(CONFIG_FILE);
        home_config.is_file().then_some(home_config)
    }

    fn apply_cli(&mut self, cli: &CliArgs) {
        let mut mark = |key: &str| {
            self.source_attribution
                .insert(key.to_string(), ConfigSource::Cli);
        };
        if cli.state_dir.is_some() {
            mark("defaults.state_dir");
        }
        if cli.max_retries.is_some() {
            mark("generation.max_retries");
        }
        if cli.timeout_hours.is_some() {
            mark("interrupts.timeout_hours");
        }
        if cli.auto_proceed_on_timeout.is_some() {
            mark("interrupts.auto_proceed_on_timeout");
        }
        if cli.max_concurrent.is_some() {
            mark("sandbox.max_concurrent");
        }

        if let Some(dir) = &cli.state_dir {
            self.defaults.state_dir = Some(dir.clone());
        }
        if let Some(n) = cli.max_retries {
            self.generation.max_retries = n;
        }
        if let Some(h) = cli.timeout_hours {
            self.interrupts.timeout_hours = h;
        }
        if let Some(flag) = cli.auto_proceed_on_timeout {
            self.interrupts.auto_proceed_on_timeout = flag;
        }
        if let Some(n) = cli.max_concurrent {
            self.sandbox.max_concurrent = n;
        }
    }
}

fn attribute_keys(table: &toml::Table, source: ConfigSource) -> BTreeMap<String, ConfigSource> {
    let mut out = BTreeMap::new();
    for (section, value) in table {
        if let Some(inner) = value.as_table() {
            for key in inner.keys() {
                out.insert(format!("{section}.{key}"), source);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn write_config(root: &Utf8Path, body: &str) -> Utf8PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_when_no_file() {
        let _home = forgeflow_utils::paths::with_isolated_home();
        let temp = TempDir::new().unwrap();
        let root = utf8(&temp);
        std::fs::create_dir(root.join(".git")).unwrap();

        let config = Config::discover_from(&root, &CliArgs::default()).unwrap();
        assert_eq!(config.generation.max_retries, 2);
        assert_eq!(config.interrupts.timeout_hours, 24);
        assert_eq!(config.source_of("generation.max_retries"), ConfigSource::Default);
    }

    #[test]
    fn test_discovers_upward_and_attributes_keys() {
        let _home = forgeflow_utils::paths::with_isolated_home();
        let temp = TempDir::new().unwrap();
        let root = utf8(&temp);
        write_config(
            &root,
            "[generation]\nmax_retries = 4\n\n[interrupts]\napproval = true\n",
        );
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::discover_from(&nested, &CliArgs::default()).unwrap();
        assert_eq!(config.generation.max_retries, 4);
        assert!(config.generation.validation_enabled);
        assert!(config.interrupts.approval);
        assert_eq!(config.interrupts.timeout_hours, 24);
        assert_eq!(config.source_of("generation.max_retries"), ConfigSource::Config);
        assert_eq!(config.source_of("interrupts.approval"), ConfigSource::Config);
        assert_eq!(config.source_of("interrupts.timeout_hours"), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_file() {
        let _home = forgeflow_utils::paths::with_isolated_home();
        let temp = TempDir::new().unwrap();
        let root = utf8(&temp);
        write_config(&root, "[generation]\nmax_retries = 4\n");

        let cli = CliArgs {
            max_retries: Some(1),
            ..CliArgs::default()
        };
        let config = Config::discover_from(&root, &cli).unwrap();
        assert_eq!(config.generation.max_retries, 1);
        assert_eq!(config.source_of("generation.max_retries"), ConfigSource::Cli);
    }

    #[test]
    fn test_explicit_missing_path_is_not_found() {
        let temp = TempDir::new().unwrap();
        let root = utf8(&temp);
        let cli = CliArgs {
            config_path: Some(root.join("nope.toml")),
            ..CliArgs::default()
        };
        let err = Config::discover_from(&root, &cli).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_unknown_key_is_invalid_file() {
        let err = Config::from_toml_str("[generation]\nmax_retires = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFile(_)));
    }

    #[test]
    fn test_out_of_range_value_fails_validation() {
        let _home = forgeflow_utils::paths::with_isolated_home();
        let temp = TempDir::new().unwrap();
        let root = utf8(&temp);
        write_config(&root, "[interrupts]\ntimeout_hours = 0\n");

        let err = Config::discover_from(&root, &CliArgs::default()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "interrupts.timeout_hours"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sub_run_retry_keeps_its_own_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.sub_run_retry.initial_backoff_ms, 1_000);
        assert_eq!(config.activity_retry.initial_backoff_ms, 500);
    }

    #[test]
    #[serial]
    fn test_falls_back_to_home_config() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join(CONFIG_FILE),
            "[interrupts]\ntimeout_hours = 12\n",
        )
        .unwrap();
        let project = TempDir::new().unwrap();
        let root = utf8(&project);
        std::fs::create_dir(root.join(".git")).unwrap();

        // SAFETY: serialized with every other test touching the environment.
        unsafe { std::env::set_var("FORGEFLOW_HOME", home.path()) };
        let found = Config::discover_config_file_from(&root);
        let config = Config::discover_from(&root, &CliArgs::default());
        unsafe { std::env::remove_var("FORGEFLOW_HOME") };

        assert_eq!(found, Some(utf8(&home).join(CONFIG_FILE)));
        assert_eq!(config.unwrap().interrupts.timeout_hours, 12);
    }
}
