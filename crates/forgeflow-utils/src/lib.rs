pub mod atomic_write;
pub mod cancel;
pub mod canonicalization;
pub mod clock;
pub mod error;
pub mod exit_codes;
pub mod ids;
pub mod logging;
pub mod paths;
pub mod ring_buffer;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
