//! Configuration management for forgeflow
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > config file > programmatic builder > built-in defaults.
//!
//! The resulting [`Config`] is an immutable value. Callers wrap it in an
//! `Arc` and pass it down explicitly; nothing in forgeflow reads global
//! configuration.

mod builder;
mod cli_args;
mod discovery;
mod model;
mod validation;

pub use builder::ConfigBuilder;
pub use cli_args::CliArgs;
pub use model::*;
pub use forgeflow_utils::types::ConfigSource;
