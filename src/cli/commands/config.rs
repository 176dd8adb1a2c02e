//! Config command implementation

use anyhow::{Context, Result};
use serde_json::Value;

use forgeflow_config::Config;
use forgeflow_utils::canonicalization::emit_jcs;
use forgeflow_utils::exit_codes::ExitCode;

/// Print the effective configuration, one `section.key` per line with its source.
pub fn execute_config_command(json: bool, config: &Config) -> Result<ExitCode> {
    if json {
        let rendered = emit_jcs(config).context("Failed to emit config JSON")?;
        println!("{rendered}");
        return Ok(ExitCode::SUCCESS);
    }

    let value = serde_json::to_value(config).context("Failed to serialize config")?;
    let Value::Object(sections) = value else {
        return Ok(ExitCode::SUCCESS);
    };
    for (section, body) in &sections {
        let Value::Object(entries) = body else {
            continue;
        };
        println!("[{section}]");
        for (key, value) in entries {
            let full_key = format!("{section}.{key}");
            println!("  {key} = {value}  ({})", config.source_of(&full_key));
        }
    }
    Ok(ExitCode::SUCCESS)
}
