//! Port registry CLI.
//!
//! - `port-registry serve`: run the registry HTTP service
//! - `port-registry get <service>`: print a port for a service (stdout carries only the number)
//! - `port-registry release|lookup|check|list`: inspect and manage registrations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use port_registry::{
    default_registry_url, router, AppState, PortRegistry, PortRequest, RegistryClient,
    RegistryConfig, RegistryError,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "port-registry.toml";

/// Port registry — sticky, collision-free TCP ports for local services.
#[derive(Parser)]
#[command(
    name = "port-registry",
    version,
    about = "Port registry — sticky, collision-free TCP ports for local services"
)]
struct Cli {
    /// Registry base URL for client commands [default: $PORT_REGISTRY_URL or http://localhost:4444]
    #[arg(long, global = true)]
    registry_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry HTTP service
    Serve {
        /// Path to port-registry.toml [default: ./port-registry.toml or ~/.config/port-registry/port-registry.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// HTTP port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Request a port for a service and print it
    Get {
        service: String,
        #[arg(default_value = "")]
        project: String,
        #[arg(default_value = "")]
        description: String,
        /// Ask for this specific port
        #[arg(long)]
        preferred_port: Option<u16>,
        /// Port to print if the registry cannot be reached
        #[arg(long)]
        fallback: Option<u16>,
    },
    /// Release a service's port
    Release { service: String },
    /// Print the port registered to a service
    Lookup { service: String },
    /// Show whether a port is registered, live, or free
    Check { port: u16 },
    /// List every registration
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise the server is chatty and client commands stay quiet.
    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let cancel = CancellationToken::new();
            let cancel_for_signal = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                tracing::info!("Shutting down port registry...");
                cancel_for_signal.cancel();
            });

            let mut config = load_config(resolve_config(config).as_deref()).await?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            run_serve(config, cancel).await?;
        }
        command => {
            let url = cli.registry_url.unwrap_or_else(default_registry_url);
            let client = RegistryClient::new(url)?;
            run_client(&client, command).await?;
        }
    }

    Ok(())
}

/// Open the registry document and serve the HTTP API until cancelled.
async fn run_serve(config: RegistryConfig, cancel: CancellationToken) -> Result<()> {
    let path = config
        .registry
        .path
        .clone()
        .unwrap_or_else(default_registry_path);
    let registry = PortRegistry::open(&path, &config.registry);

    // Fail at startup rather than on the first request if the document is unreadable.
    let summary = registry
        .summary()
        .await
        .with_context(|| format!("Failed to load registry {}", path.display()))?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let app = router(AppState::new(registry, config.server.port));

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        services = summary.registered_services,
        "Port registry listening"
    );
    tracing::info!("Status page at http://localhost:{}/status", config.server.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Port registry HTTP server error")?;

    tracing::info!("Port registry stopped");
    Ok(())
}

async fn run_client(client: &RegistryClient, command: Commands) -> Result<()> {
    match command {
        Commands::Get {
            service,
            project,
            description,
            preferred_port,
            fallback,
        } => {
            let mut request = PortRequest::new(&service, project).with_description(description);
            if let Some(port) = preferred_port {
                request = request.with_preferred_port(port);
            }
            let grant = match client.port_or_fallback(&request, fallback).await {
                Ok(grant) => grant,
                Err(e @ RegistryError::Unreachable(..)) => {
                    eprintln!("[port-registry] start the registry with: port-registry serve");
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };
            eprintln!("[port-registry] {} ({})", service, grant.message);
            // Only the number goes to stdout so scripts can capture it.
            println!("{}", grant.port);
        }
        Commands::Release { service } => {
            if client.release_port(&service).await? {
                eprintln!("[port-registry] released {}", service);
            } else {
                anyhow::bail!("service '{}' is not registered", service);
            }
        }
        Commands::Lookup { service } => match client.registered_port(&service).await? {
            Some(port) => println!("{}", port),
            None => anyhow::bail!("service '{}' is not registered", service),
        },
        Commands::Check { port } => {
            let check = client.check_port(port).await?;
            let owner = check.registered_to.as_deref().unwrap_or("-");
            println!(
                "port {}: registered_to={} in_use={} free={}",
                check.port, owner, check.in_use, check.free
            );
        }
        Commands::List => {
            let mut services: Vec<_> = client.list_ports().await?.into_iter().collect();
            services.sort_by_key(|(_, status)| status.port);
            for (name, status) in services {
                println!(
                    "{:>5}  {:<24} {:<16} {}{}",
                    status.port,
                    name,
                    status.project,
                    if status.in_use { "live" } else { "idle" },
                    if status.description.is_empty() {
                        String::new()
                    } else {
                        format!("  {}", status.description)
                    }
                );
            }
        }
        Commands::Serve { .. } => unreachable!("serve is handled in main"),
    }
    Ok(())
}

/// Resolve config file path: explicit flag → ./port-registry.toml → ~/.config/port-registry/port-registry.toml.
///
/// `None` means no file was found and built-in defaults apply.
fn resolve_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }

    let local = Path::new(CONFIG_FILE);
    if local.exists() {
        return Some(local.to_path_buf());
    }

    dirs::config_dir()
        .map(|dir| dir.join("port-registry").join(CONFIG_FILE))
        .filter(|path| path.exists())
}

/// Load and parse a port-registry.toml file, or defaults when there is none.
async fn load_config(config_path: Option<&Path>) -> Result<RegistryConfig> {
    let Some(config_path) = config_path else {
        tracing::debug!("no config file found, using defaults");
        return Ok(RegistryConfig::default());
    };

    let content = tokio::fs::read_to_string(config_path)
        .await
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
    let config = RegistryConfig::from_toml(&content)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
    tracing::info!(path = %config_path.display(), "loaded config");
    Ok(config)
}

/// Registry document location when the config does not name one.
fn default_registry_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("port-registry").join("registry.json"))
        .unwrap_or_else(|| PathBuf::from("registry.json"))
}
