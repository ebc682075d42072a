use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use lms_gateway::{
    EurekaClient, GatewayService, HttpClientAdapter, HttpHandler, SelfRegistration,
    config::{self, ServerConfig, ServerConfigValidator},
    metrics,
    ports::{http_client::HttpClient, registry::RegistrySource},
    router, tracing_setup,
    utils::GracefulShutdown,
};
use tokio::task::JoinHandle;
use tracing::Instrument;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Write the annotated example configuration
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config: ServerConfig = config::load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    ServerConfigValidator::validate(&config).wrap_err("Invalid configuration")?;

    tracing_setup::init_tracing(&config.log_level, config.log_format)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics();

    let config = Arc::new(config);
    let proxy_timeout = config.proxy.timeout().map_err(|e| eyre!(e))?;

    let eureka = match &config.registry {
        Some(registry) => {
            let timeout = registry.timeout().map_err(|e| eyre!(e))?;
            tracing::info!(url = %registry.url, "Using service registry");
            Some(Arc::new(
                EurekaClient::new(&registry.url, timeout)
                    .context("Failed to create registry client")?,
            ))
        }
        None => None,
    };
    let source = eureka
        .clone()
        .map(|client| client as Arc<dyn RegistrySource>);

    let gateway = Arc::new(
        GatewayService::new(config.clone(), source).context("Failed to build gateway service")?,
    );
    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(proxy_timeout).context("Failed to create HTTP client adapter")?,
    );

    let shutdown = Arc::new(GracefulShutdown::new());
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    {
        let registry = gateway.registry().clone();
        let token = shutdown.shutdown_token();
        tasks.push((
            "registry_refresh",
            tokio::spawn(
                async move { registry.run(token).await }
                    .instrument(tracing_setup::component_span("registry_refresh")),
            ),
        ));
    }

    {
        let window = gateway.metrics().clone();
        let token = shutdown.shutdown_token();
        tasks.push((
            "metrics_reset",
            tokio::spawn(
                async move { window.run_reset_loop(token).await }
                    .instrument(tracing_setup::component_span("metrics_reset")),
            ),
        ));
    }

    let instance_config = config
        .registry
        .as_ref()
        .and_then(|registry| registry.instance.as_ref());
    if let (Some(client), Some(instance)) = (eureka, instance_config) {
        let registration = SelfRegistration::from_config(client, instance, config.port)
            .map_err(|e| eyre!("Invalid self-registration settings: {}", e))?;
        let token = shutdown.shutdown_token();
        tasks.push((
            "self_registration",
            tokio::spawn(
                async move { registration.run(token).await }
                    .instrument(tracing_setup::component_span("self_registration")),
            ),
        ));
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!("Signal handler error: {:?}", e);
            }
        });
    }

    let addr: SocketAddr = config
        .listen_addr()
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    for route in &config.routes {
        tracing::debug!(
            path = %route.path,
            service = %route.service,
            rate_limited = route.rate_limited,
            "Configured route"
        );
    }
    tracing::info!(
        %addr,
        routes = config.routes.len(),
        services = config.services.len(),
        "LMS gateway listening"
    );

    let app = router(Arc::new(HttpHandler::new(gateway, http_client)));
    let mut server_token = shutdown.shutdown_token();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = server_token.wait_for_shutdown().await;
        tracing::info!(?reason, "Shutdown signal received, draining connections");
    })
    .await
    .context("Server error")?;

    // Stops the background loops even when the server ended on its own.
    shutdown.trigger_shutdown(lms_gateway::ShutdownReason::Graceful);

    let deadline = tokio::time::Instant::now() + shutdown.drain_timeout();
    for (name, task) in tasks {
        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(())) => tracing::debug!(task = name, "Background task stopped"),
            Ok(Err(e)) => tracing::error!(task = name, "Background task failed: {}", e),
            Err(_) => tracing::warn!(task = name, "Background task did not stop in time"),
        }
    }

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match config::load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:?}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr());
            println!(
                "   • Registry: {}",
                config
                    .registry
                    .as_ref()
                    .map_or("none (static fallbacks only)", |r| r.url.as_str())
            );
            println!("   • Services: {}", config.services.len());
            println!("   • Routes: {}", config.routes.len());
            println!(
                "   • Rate-limited Routes: {}",
                config.routes.iter().filter(|r| r.rate_limited).count()
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure fallback and registry URLs start with http:// or https://");
            println!("   • Use humantime durations such as '30s' or '1m'");
            println!("   • Check that route paths start with '/' and do not repeat");
            std::process::exit(1);
        }
    }
}

/// Write the example configuration, refusing to overwrite an existing file.
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, config::EXAMPLE_CONFIG)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'lms-gateway serve --config {config_path}' to start the server");
    Ok(())
}
