use std::{net::SocketAddr, path::Path, sync::Arc, time::Instant};

use apigate::{
    adapters::{AppState, HttpClientAdapter, load_route_table, router},
    config::{ServerConfig, ServerConfigValidator, loader::load_config},
    core::GatewayService,
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

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
    /// Initialize a new configuration file
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
    // A missing .env file is the normal case.
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)
        .context("Failed to initialize tracing")?;
    tracing::info!("Loaded configuration from {config_path}");

    if let Err(e) = ServerConfigValidator::validate(&config) {
        tracing::error!("Configuration validation failed: {e}");
        return Err(eyre!("Invalid configuration: {e}"));
    }

    metrics::init_metrics();

    let addr = config
        .socket_addr()
        .with_context(|| format!("Invalid listen address '{}'", config.listen_addr))?;
    let config = Arc::new(config);

    let gateway = GatewayService::open(config.clone())
        .await
        .context("Failed to open gateway stores")?;

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client")?);
    let routes = load_route_table(gateway.endpoints(), http_client).await;
    let gateway = Arc::new(gateway.with_routes(routes));

    spawn_rate_limit_pruner(gateway.clone());

    let app = router(AppState::new(gateway.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(
        %addr,
        dynamic_routes = gateway.routes().len(),
        "apigate server starting"
    );

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler.run_signal_handler().await;
    });

    let stop_accepting = graceful_shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = stop_accepting.wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received: {:?}", reason);
    });

    let drain_timeout = graceful_shutdown.drain_timeout();
    tokio::select! {
        result = server => {
            result.context("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        _ = async {
            graceful_shutdown.wait_for_shutdown_signal().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(?drain_timeout, "Drain timeout elapsed, closing remaining connections");
        }
    }

    Ok(())
}

/// Periodically drop expired rate-limit windows so idle identities do not
/// accumulate.
fn spawn_rate_limit_pruner(gateway: Arc<GatewayService>) {
    let period = gateway.rate_limiter().period();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = gateway.rate_limiter().prune_expired(Instant::now()).await;
            if removed > 0 {
                tracing::debug!(removed, "Pruned expired rate-limit windows");
            }
        }
    });
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        println!("ℹ️  '{config_path}' not found, checking defaults and environment only");
    }

    let config: ServerConfig = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            if let Some(port) = config.port {
                println!("   • Port Override: {port}");
            }
            println!(
                "   • Status Page Key: {}",
                if config.status_page_api_key.is_some() { "set" } else { "not set" }
            );
            println!(
                "   • Rate Limit: {} requests per {}",
                config.rate_limit.requests, config.rate_limit.period
            );
            println!("   • API Keys File: {}", config.storage.api_keys_file.display());
            println!("   • Routes Directory: {}", config.storage.routes_dir.display());
            println!(
                "   • Monitors File: {}",
                config.storage.monitored_endpoints_file.display()
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
            println!("   • Set master_api_key or the MASTER_API_KEY variable");
            println!("   • Verify listen address format (e.g., '0.0.0.0:3000')");
            println!("   • Ensure rate limit periods use valid units (s, m, h)");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# apigate configuration
#
# Every key may also be set through APIGATE_* variables, e.g.
# APIGATE_RATE_LIMIT__REQUESTS=50. PORT, MASTER_API_KEY and
# STATUS_PAGE_API_KEY are honoured as well and take precedence.

# The address to listen on
listen_addr = "0.0.0.0:3000"

# Required. Opens the admin API and bypasses rate limiting.
master_api_key = "change-me"

# Optional. Bypasses rate limiting but cannot use the admin API.
# status_page_api_key = "status-page-key"

[storage]
api_keys_file = "userApiKeys.json"
monitored_endpoints_file = "public/data/monitoredEndpoints.json"
routes_dir = "public/routes"
public_dir = "public"

[api_keys]
prefix = "matic-"
random_length = 18

[rate_limit]
requests = 100
period = "10m"
status_code = 429
message = "Too many requests, please try again after 10 minutes."

[metrics]
# "windowed" or "since_last_read"
throughput = "windowed"
window_secs = 60

[logging]
# "json" or "pretty"
format = "json"
level = "info"

[http]
cors_enabled = true
body_limit_bytes = 5242880
trusted_proxy_hops = 1
compression = true
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'apigate serve --config {config_path}' to start the server");
    Ok(())
}
