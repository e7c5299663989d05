//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use xr_core::config::{self, ControlConfig};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Show the configuration file with the secret masked
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'xeray config init' to create one");
        return Ok(());
    }

    let mut control: ControlConfig = config::load_config(&path)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;
    if !control.daemon.secret.is_empty() {
        control.daemon.secret = "********".to_string();
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();
    println!("{}", toml::to_string_pretty(&control)?);

    Ok(())
}

/// Write a default configuration
pub fn config_init(
    config_path: Option<&Path>,
    secret: Option<String>,
    endpoint: Option<String>,
    store_path: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    let mut control = ControlConfig::default();
    if let Some(secret) = secret {
        control.daemon.secret = secret;
    }
    control.daemon.endpoint = endpoint;
    if let Some(store_path) = store_path {
        control.store_path = store_path;
    }

    config::save_config(&path, &control)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));

    if control.daemon.secret.is_empty() {
        print_info(&format!(
            "Set daemon.secret in the file or export {} before running node commands",
            config::SECRET_ENV
        ));
    }

    Ok(())
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&Path>) -> Result<()> {
    println!("{}", resolve(config_path).display());
    Ok(())
}
