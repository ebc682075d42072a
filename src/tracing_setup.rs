use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::LogFormat;

/// Filter from `RUST_LOG` when set, else from the configured level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), level)
}

/// An unparsable `rust_log` falls back to `level`.
fn filter_from(rust_log: Option<&str>, level: &str) -> Result<EnvFilter> {
    match rust_log.map(EnvFilter::try_new) {
        Some(Ok(filter)) => Ok(filter),
        _ => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Install the global subscriber. Call once, from the binary.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(level)?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    };
    installed.wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(level, ?format, "Gateway logging initialized");
    Ok(())
}

/// Span wrapping the lifetime of one background task.
pub fn component_span(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn test_filter_rejects_garbage_level() {
        assert!(filter_from(None, "info,lms_gateway=debug").is_ok());
        assert!(filter_from(None, "not a [level").is_err());
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        let filter = filter_from(Some("lms_gateway=trace"), "not a [level").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        // Garbage in RUST_LOG falls back to the configured level.
        let filter = filter_from(Some("not a [level"), "warn").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_component_span() {
        let span = component_span("registry_refresh");
        assert_eq!(span.metadata().map(|m| m.name()), Some("component"));
    }
}
