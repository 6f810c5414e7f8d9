use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaygate::api::{self, AppState, RouterConfig};
use relaygate::config::{self, AppConfig};
use relaygate::device::DeviceGateway;
use relaygate::inventory::Inventory;
use relaygate::peer::{self, TableStore};
use relaygate::ws::RelayHub;

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

#[tokio::main]
async fn async_peer(ctx: RuntimeContext, cmd: PeerCommand) -> Result<()> {
    handle_peer(&ctx, cmd).await
}

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();
    debug!("config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Peer(cmd) => async_peer(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Relaygate - realtime relay and decoder device gateway.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API and relay server
    Serve(ServeCommand),
    /// Run the in-memory authoritative peer against a relay
    Peer(PeerCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Address to bind (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (overrides server.port)
    #[arg(long, short)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct PeerCommand {
    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:9980/td")]
    url: String,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration (password redacted)
    Show,
    /// Print the resolved config file path
    Path,
}

struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = config::config_file_path(common.config.as_deref())?;
        let config = AppConfig::load(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn effective_log_level(&self) -> &str {
        if self.common.quiet {
            return "error";
        }
        match self.common.verbose {
            0 => self.config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.effective_log_level();
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("relaygate={level},tower_http={level}"))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            let disable_color =
                std::env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color),
                )
                .try_init()
                .ok();
        }
    }
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let config = &ctx.config;

    if config.devices.password.is_empty() {
        warn!("devices.password is empty; device authorization will likely fail");
    }

    let gateway = DeviceGateway::new(config.credentials(), config.request_timeout())
        .context("building device HTTP client")?;
    let inventory = Inventory::load(
        Path::new(&config.inventory.generate_path),
        &config.inventory.state_path,
    )
    .context("loading kit inventory")?;
    info!(
        kits = inventory.list_kits().len(),
        active = ?inventory.active_kit_id().await,
        "inventory loaded"
    );

    let hub = Arc::new(RelayHub::new(config.hub_settings()));
    hub.start_heartbeat();

    let state = AppState::new(gateway, hub.clone(), Arc::new(inventory));
    let router_config = RouterConfig {
        relay_path: config.relay.path.clone(),
        dist_dir: config.dist_dir().filter(|dir| {
            let exists = dir.is_dir();
            if !exists {
                warn!("UI bundle directory {} not found, not serving it", dir.display());
            }
            exists
        }),
    };
    if let Some(dist) = &router_config.dist_dir {
        info!("serving UI bundle from {}", dist.display());
    }
    let app = api::create_router(state, &router_config);

    let host = cmd.host.unwrap_or_else(|| config.server.host.clone());
    let port = cmd.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("invalid address")?;

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;
    info!("Listening on http://{}", addr);
    info!("Relay endpoint ws://{}{}", addr, router_config.relay_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    hub.stop_heartbeat();
    info!("Shutdown complete");
    Ok(())
}

async fn handle_peer(_ctx: &RuntimeContext, cmd: PeerCommand) -> Result<()> {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let store = peer::run(&cmd.url, TableStore::with_defaults(), shutdown).await?;
    debug!("final tables: {:?}", store);
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let redacted = ctx.config.redacted();
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&redacted).context("serializing config to JSON")?
                );
            } else {
                print!("{}", redacted.to_toml()?);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
