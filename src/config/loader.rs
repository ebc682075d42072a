use std::path::Path;

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Prefix for structured environment overrides, e.g. `GATEWAY__PROXY__TIMEOUT=10s`.
pub const ENV_PREFIX: &str = "GATEWAY";

/// Load configuration from a file plus environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously, reading overrides from the process environment.
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    load_config_with_env(config_path, |key| std::env::var(key).ok())
}

/// Load configuration with an injectable environment lookup.
///
/// Besides the `GATEWAY__*` overrides, the deployment variables `PORT`, `EUREKA_URL`,
/// `APP_NAME` and `INSTANCE_IP` are honoured. An unparsable `PORT` is ignored.
pub fn load_config_with_env<F>(config_path: &str, lookup: F) -> Result<ServerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let builder = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

    let settings = apply_deployment_overrides(builder, &lookup)?
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}

fn apply_deployment_overrides<F>(
    builder: ConfigBuilder<DefaultState>,
    lookup: &F,
) -> Result<ConfigBuilder<DefaultState>>
where
    F: Fn(&str) -> Option<String>,
{
    let port = lookup("PORT").and_then(|raw| match raw.trim().parse::<u16>() {
        Ok(port) => Some(i64::from(port)),
        Err(_) => {
            tracing::warn!("Ignoring invalid PORT override '{}'", raw);
            None
        }
    });

    let builder = builder
        .set_override_option("port", port)
        .and_then(|b| b.set_override_option("registry.url", lookup("EUREKA_URL")))
        .wrap_err("Failed to apply environment overrides")?;

    let app_name = lookup("APP_NAME");
    let instance_ip = lookup("INSTANCE_IP");
    if app_name.is_none() && instance_ip.is_none() {
        return Ok(builder);
    }

    // Identity overrides need a registry, and a complete identity unless the file has one.
    let current = builder.build_cloned().ok();
    let has_key = |key: &str| current.as_ref().is_some_and(|c| c.get::<config::Value>(key).is_ok());
    let complete = has_key("registry.instance") || (app_name.is_some() && instance_ip.is_some());
    if !has_key("registry.url") || !complete {
        tracing::warn!(
            "Ignoring APP_NAME/INSTANCE_IP overrides: self-registration needs a registry URL and both values"
        );
        return Ok(builder);
    }

    builder
        .set_override_option("registry.instance.app_name", app_name)
        .and_then(|b| b.set_override_option("registry.instance.instance_ip", instance_ip))
        .wrap_err("Failed to apply environment overrides")
}
