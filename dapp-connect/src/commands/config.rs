//! Configuration command

use anyhow::{Context, Result};
use std::path::Path;

use dapp_connect::config::Config;

use super::{print_success, print_warning};

/// Run the config command
pub fn run(config_path: &Path, init: bool) -> Result<()> {
    if init {
        if config_path.exists() {
            print_warning(&format!(
                "Config already exists at {}",
                config_path.display()
            ));
            return Ok(());
        }

        Config::default().save(config_path)?;
        print_success(&format!("Wrote default config to {}", config_path.display()));
        return Ok(());
    }

    let config = Config::load_or_default(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;

    println!("# {}", config_path.display());
    println!("{}", rendered);
    Ok(())
}
