use std::fs;

use anyhow::Context;
use shared::config::{Config, ConfigFormat};

/// Generates a default configuration file in the current directory.
///
/// # Arguments
/// * `format` - The format of the configuration file ("yaml", "json" or "toml").
///
/// # Errors
/// Returns an error if the format is unsupported or if writing the file fails.
pub fn generate_config(format: &str) -> anyhow::Result<()> {
    let format: ConfigFormat = format.parse()?;
    let serialized = Config::with_defaults().render(format)?;

    let file_name = format.file_name();
    fs::write(file_name, serialized)
        .with_context(|| format!("failed to write configuration file '{file_name}'"))?;

    println!("Configuration file '{file_name}' generated successfully.");
    Ok(())
}
