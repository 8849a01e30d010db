use anyhow::{Context, Result};
use catalyst_sdk::config::{self, CatalystConfig};
use catalyst_sdk::logging::mask_secret;
use colored::Colorize;
use tracing::info;

/// Execute the config show command
///
/// Displays the current configuration with secrets masked
pub fn show(path: &str) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!(path = path, "Loading configuration for display");

    let cfg = config::load_config_from(path).context("failed to load configuration")?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);
    println!("spool directory = {}", cfg.spool.directory().display());

    Ok(())
}

/// Execute the config validate command
pub fn validate(path: &str) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let cfg = config::load_config_from(path).context("failed to load configuration")?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Base URL:        {}", cfg.base_url);
    println!("  Credentials:     {}", credentials_summary(&cfg));
    println!("  Spool:           {}", cfg.spool.directory().display());
    println!("  Upload timeout:  {}s", cfg.upload.timeout_seconds);
    println!("  Rescan on start: {}", cfg.upload.rescan_on_startup);

    if !cfg.has_credentials() {
        println!();
        println!(
            "{}",
            "Warning: no credentials, tracers will fail to start".yellow()
        );
    }

    info!("Configuration validation successful");
    Ok(())
}

/// Replace secrets with their masked form
fn sanitize_secrets(cfg: &CatalystConfig) -> CatalystConfig {
    let mut sanitized = cfg.clone();
    sanitized.access_key = cfg.access_key.as_deref().map(|k| mask_secret(Some(k)));
    sanitized.secret_key = cfg.secret_key.as_deref().map(|k| mask_secret(Some(k)));
    sanitized.token = cfg.token.as_deref().map(|t| mask_secret(Some(t)));
    sanitized
}

fn credentials_summary(cfg: &CatalystConfig) -> &'static str {
    let has_token = cfg.token.as_deref().is_some_and(|t| !t.is_empty());
    let has_keys = cfg.access_key.is_some() && cfg.secret_key.is_some();
    match (has_token, has_keys) {
        (true, true) => "token + access/secret key",
        (true, false) => "token",
        (false, true) => "access/secret key",
        (false, false) => "none",
    }
}
