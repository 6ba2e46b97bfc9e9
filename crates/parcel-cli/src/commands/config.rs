//! Config command handlers

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use parcel_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, api_url, sync.enabled, sync.request_timeout_secs, \
     sync.settle_delay_secs, sync.poll_interval_secs, sync.max_retries, \
     sync.retention_days, sync.placeholder_max_age_secs";

/// Load from the CLI-specified path or the default location
pub fn load(config_path: Option<&PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config = load(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "sync": config.sync,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.api_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let sync = &config.sync;
            println!("Configuration:");
            println!("  data_dir:                      {}", config.data_dir.display());
            println!("  api_url:                       {}", config.api_url);
            println!("  sync.enabled:                  {}", sync.enabled);
            println!("  sync.request_timeout_secs:     {}", sync.request_timeout_secs);
            println!("  sync.settle_delay_secs:        {}", sync.settle_delay_secs);
            println!("  sync.poll_interval_secs:       {}", sync.poll_interval_secs);
            println!("  sync.max_retries:              {}", sync.max_retries);
            println!("  sync.retention_days:           {}", sync.retention_days);
            println!(
                "  sync.placeholder_max_age_secs: {}",
                sync.placeholder_max_age_secs
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "(drop immediately)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let mut config = load(config_path).context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_url" => {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                bail!("api_url must start with http:// or https://");
            }
            config.api_url = value.to_string();
        }
        "sync.enabled" | "sync_enabled" => config.sync.enabled = parse(key, value)?,
        "sync.request_timeout_secs" => config.sync.request_timeout_secs = parse(key, value)?,
        "sync.settle_delay_secs" => config.sync.settle_delay_secs = parse(key, value)?,
        "sync.poll_interval_secs" => config.sync.poll_interval_secs = parse(key, value)?,
        "sync.max_retries" => config.sync.max_retries = parse(key, value)?,
        "sync.retention_days" => config.sync.retention_days = parse(key, value)?,
        "sync.placeholder_max_age_secs" => {
            config.sync.placeholder_max_age_secs = if value.is_empty() || value == "none" {
                None
            } else {
                Some(parse(key, value)?)
            };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", key, value))
}
