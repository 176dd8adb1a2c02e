use camino::Utf8PathBuf;

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<Utf8PathBuf>,
    pub state_dir: Option<Utf8PathBuf>,
    pub max_retries: Option<u32>,
    pub timeout_hours: Option<u64>,
    pub auto_proceed_on_timeout: Option<bool>,
    pub max_concurrent: Option<usize>,
}
