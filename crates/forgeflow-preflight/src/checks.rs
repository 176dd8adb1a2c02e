//! Built-in probes.

use async_trait::async_trait;
use camino::Utf8PathBuf;

use crate::{CheckOutcome, PreflightCheck, PreflightError};

/// A binary must resolve on `PATH`.
#[derive(Debug, Clone)]
pub struct BinaryCheck {
    name: String,
    binary: String,
}

impl BinaryCheck {
    #[must_use]
    pub fn new(binary: &str) -> Self {
        Self {
            name: format!("binary:{binary}"),
            binary: binary.to_string(),
        }
    }
}

#[async_trait]
impl PreflightCheck for BinaryCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> CheckOutcome {
        match which::which(&self.binary) {
            Ok(path) => CheckOutcome::pass(format!("found at {}", path.display())),
            Err(_) => CheckOutcome::fail(format!("'{}' not found in PATH", self.binary)),
        }
    }
}

/// A credential environment variable must be set and non-empty.
///
/// The value itself never appears in the outcome.
#[derive(Debug, Clone)]
pub struct EnvCredentialCheck {
    name: String,
    var: String,
}

impl EnvCredentialCheck {
    #[must_use]
    pub fn new(var: &str) -> Self {
        Self {
            name: format!("env:{var}"),
            var: var.to_string(),
        }
    }
}

#[async_trait]
impl PreflightCheck for EnvCredentialCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> CheckOutcome {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => {
                CheckOutcome::pass(format!("{} is set ({} chars)", self.var, value.len()))
            }
            Ok(_) => CheckOutcome::fail(format!("{} is set but empty", self.var)),
            Err(_) => CheckOutcome::fail(format!("{} is not set", self.var)),
        }
    }
}

/// The state directory must accept new files.
#[derive(Debug, Clone)]
pub struct WriteAccessCheck {
    dir: Utf8PathBuf,
}

impl WriteAccessCheck {
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PreflightCheck for WriteAccessCheck {
    fn name(&self) -> &str {
        "write_access"
    }

    async fn run(&self) -> CheckOutcome {
        if let Err(e) = forgeflow_utils::paths::ensure_dir_all(&self.dir) {
            return CheckOutcome::fail(format!("cannot create {}: {e}", self.dir));
        }
        match tempfile::NamedTempFile::new_in(&self.dir) {
            Ok(_probe) => CheckOutcome::pass(format!("{} is writable", self.dir)),
            Err(e) => CheckOutcome::fail(format!("cannot write to {}: {e}", self.dir)),
        }
    }
}

/// A service endpoint must answer. Any status below 500 counts: an auth
/// error still proves the service is up.
#[derive(Debug, Clone)]
pub struct EndpointCheck {
    name: String,
    url: reqwest::Url,
    client: reqwest::Client,
}

impl EndpointCheck {
    pub fn new(client: reqwest::Client, url: &str) -> Result<Self, PreflightError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| PreflightError::InvalidEndpoint {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().unwrap_or("unknown").to_string();
        Ok(Self {
            name: format!("endpoint:{host}"),
            url: parsed,
            client,
        })
    }
}

#[async_trait]
impl PreflightCheck for EndpointCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> CheckOutcome {
        match self.client.get(self.url.clone()).send().await {
            Ok(resp) if resp.status().is_server_error() => {
                CheckOutcome::fail(format!("{} returned {}", self.url, resp.status()))
            }
            Ok(resp) => CheckOutcome::pass(format!("{} returned {}", self.url, resp.status())),
            Err(e) if e.is_timeout() => CheckOutcome::fail(format!("{} timed out", self.url)),
            Err(e) => CheckOutcome::fail(format!("{} unreachable: {e}", self.url)),
        }
    }
}

/// Enough free memory must be available for a sandboxed build.
#[derive(Debug, Clone)]
pub struct MemoryHeadroomCheck {
    min_mb: u64,
}

impl MemoryHeadroomCheck {
    #[must_use]
    pub const fn new(min_mb: u64) -> Self {
        Self { min_mb }
    }
}

#[async_trait]
impl PreflightCheck for MemoryHeadroomCheck {
    fn name(&self) -> &str {
        "memory_headroom"
    }

    async fn run(&self) -> CheckOutcome {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let available_mb = system.available_memory() / (1024 * 1024);
        if available_mb >= self.min_mb {
            CheckOutcome::pass(format!("{available_mb} MiB available"))
        } else {
            CheckOutcome::fail(format!(
                "{available_mb} MiB available, {} MiB required",
                self.min_mb
            ))
        }
    }
}

/// Ad-hoc check from a closure; used by embedders and tests.
pub struct FnCheck<F> {
    name: String,
    probe: F,
}

impl<F> FnCheck<F>
where
    F: Fn() -> CheckOutcome + Send + Sync,
{
    pub fn new(name: impl Into<String>, probe: F) -> Self {
        Self {
            name: name.into(),
            probe,
        }
    }
}

#[async_trait]
impl<F> PreflightCheck for FnCheck<F>
where
    F: Fn() -> CheckOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> CheckOutcome {
        (self.probe)()
    }
}
