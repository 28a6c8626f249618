pub mod settings;

pub use settings::*;

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Environment overrides look like `XGB_SIGNAL__MODEL__BIAS=0.1`
pub const ENV_PREFIX: &str = "XGB_SIGNAL";

/// Loads the optional TOML file, applies environment overrides and validates.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    load_config_with_env(path, config::Environment::with_prefix(ENV_PREFIX).separator("__"))
}

/// Same as [`load_config`] with the override source supplied by the caller
pub fn load_config_with_env(path: Option<&Path>, env: config::Environment) -> Result<AppConfig> {
    let mut builder = config::Config::builder();
    match path {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }
        Some(path) => warn!("Config file {} not found, using defaults", path.display()),
        None => {}
    }

    let settings = builder
        .add_source(env)
        .build()
        .context("Failed to read configuration")?;
    let config: AppConfig = settings
        .try_deserialize()
        .context("Invalid configuration")?;

    if let Err(errors) = config.validate() {
        bail!("Invalid configuration: {}", errors.join(", "));
    }
    Ok(config)
}

/// Writes the default configuration as TOML
pub fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let text = toml::to_string_pretty(&AppConfig::default())
        .context("Failed to serialize default configuration")?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
