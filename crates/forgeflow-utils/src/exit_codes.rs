//! Exit code constants for the forgeflow CLI.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `PREFLIGHT_FAILED` | One or more preflight checks failed |
//! | 4 | `HUMAN_TIMEOUT` | A question timed out without auto-proceed |
//! | 5 | `APPROVAL_REJECTED` | A reviewer rejected the change |
//! | 6 | `CANCELLED` | The run was cancelled |
//! | 7 | `RUN_FAILED` | A step failed and aborted the run |
//! | 9 | `LOCK_HELD` | Another process holds the run journal lock |

/// Process exit code.
///
/// The numeric values are part of the CLI contract; scripts may rely on them.
///
/// ```rust
/// use forgeflow_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::PREFLIGHT_FAILED.as_i32(), 3);
/// assert_eq!(ExitCode::from_i32(0), ExitCode::SUCCESS);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);

    pub const INTERNAL: ExitCode = ExitCode(1);

    /// Invalid CLI arguments or configuration
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    pub const PREFLIGHT_FAILED: ExitCode = ExitCode(3);

    /// A question expired and auto-proceed was off
    pub const HUMAN_TIMEOUT: ExitCode = ExitCode(4);

    pub const APPROVAL_REJECTED: ExitCode = ExitCode(5);

    pub const CANCELLED: ExitCode = ExitCode(6);

    /// Any other step failure
    pub const RUN_FAILED: ExitCode = ExitCode(7);

    pub const LOCK_HELD: ExitCode = ExitCode(9);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}
