//! Bounded child-process execution.

use std::sync::Mutex;
use std::time::Instant as StdInstant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use forgeflow_utils::ring_buffer::RingBuffer;

use crate::SandboxError;
use crate::command_spec::CommandSpec;

/// Resource bounds for one child process.
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    /// Shared wall-clock deadline; the child's whole process group is killed
    /// when it passes.
    pub deadline: Option<Instant>,
    /// Address-space limit; 0 disables.
    pub memory_mb: u64,
    /// CPU-time limit; 0 disables.
    pub cpu_secs: u64,
    pub output_cap_bytes: usize,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            deadline: None,
            memory_mb: 0,
            cpu_secs: 0,
            output_cap_bytes: 256 * 1024,
        }
    }
}

/// What a bounded run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedRun {
    /// `None` when killed by a signal or by the deadline.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Interleaved stdout and stderr, most recent bytes kept. Not masked.
    pub output: String,
}

impl BoundedRun {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Kills the child's process group unless disarmed.
struct GroupKiller {
    pgid: Option<u32>,
}

impl GroupKiller {
    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL);
        }
        #[cfg(not(unix))]
        {
            self.pgid = None;
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKiller {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn apply_rlimits(memory_mb: u64, cpu_secs: u64) -> std::io::Result<()> {
    use nix::sys::resource::{Resource, setrlimit};
    if memory_mb > 0 {
        let bytes = memory_mb.saturating_mul(1024 * 1024);
        setrlimit(Resource::RLIMIT_AS, bytes as _, bytes as _).map_err(std::io::Error::from)?;
    }
    if cpu_secs > 0 {
        setrlimit(Resource::RLIMIT_CPU, cpu_secs as _, cpu_secs as _)
            .map_err(std::io::Error::from)?;
    }
    Ok(())
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, sink: &Mutex<RingBuffer>) {
    let Some(mut reader) = reader else { return };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(&chunk[..n]),
        }
    }
}

/// Run `spec` to completion or until `limits.deadline`.
///
/// The child gets its own process group and rlimits on Unix. If this future
/// is dropped mid-run the group is killed.
pub async fn run_bounded(spec: &CommandSpec, limits: &ProcessLimits) -> Result<BoundedRun, SandboxError> {
    let mut cmd = spec.to_tokio_command();

    #[cfg(unix)]
    {
        cmd.process_group(0);
        let (memory_mb, cpu_secs) = (limits.memory_mb, limits.cpu_secs);
        if memory_mb > 0 || cpu_secs > 0 {
            // SAFETY: the hook only issues setrlimit(2), which is async-signal-safe.
            unsafe {
                cmd.pre_exec(move || apply_rlimits(memory_mb, cpu_secs));
            }
        }
    }

    if limits.deadline.is_some_and(|d| d <= Instant::now()) {
        return Ok(BoundedRun {
            exit_code: None,
            timed_out: true,
            duration_ms: 0,
            output: String::new(),
        });
    }

    let started = StdInstant::now();
    let mut child = cmd.spawn().map_err(|e| SandboxError::Spawn {
        program: spec.program.to_string_lossy().into_owned(),
        reason: e.to_string(),
    })?;
    let mut killer = GroupKiller { pgid: child.id() };
    debug!(command = %spec.display(), pid = ?child.id(), "Sandbox command started");

    let buffer = Mutex::new(RingBuffer::new(limits.output_cap_bytes));
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let completion = async {
        let ((), (), status) = tokio::join!(pump(stdout, &buffer), pump(stderr, &buffer), child.wait());
        status
    };

    let waited = match limits.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, completion).await.ok(),
        None => Some(completion.await),
    };
    let (exit_code, timed_out) = match waited {
        Some(status) => (status.ok().and_then(|s| s.code()), false),
        None => {
            warn!(command = %spec.display(), "Sandbox command hit the deadline; killing process group");
            killer.kill();
            let _ = child.kill().await;
            (None, true)
        }
    };
    killer.disarm();

    let output = buffer
        .into_inner()
        .unwrap_or_else(|e| e.into_inner())
        .contents_lossy();
    Ok(BoundedRun {
        exit_code,
        timed_out,
        duration_ms: started.elapsed().as_millis() as u64,
        output,
    })
}
