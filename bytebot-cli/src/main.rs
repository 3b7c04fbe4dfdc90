//! CLI entry point for bytebot

mod pingpong;

use anyhow::{Context, Result};
use bytebot_channels::{DiscordClient, Supervisor};
use bytebot_core::bus::{MemoryBus, MessageBus, RedisBus};
use bytebot_core::config::{validate_config, validate_gateway, Config, ConfigLoader};
use bytebot_core::logging::init_logging;
use bytebot_core::topic::{TopicNamer, TopicScheme};
use bytebot_health::HealthProbe;
use clap::{Args, Parser, Subcommand};
use pingpong::PingPong;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bytebot")]
#[command(about = "Bridge a chat platform to a pub/sub message bus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

/// Flags layered over the loaded configuration, only when passed
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Redis address (host:port or redis:// URL)
    #[arg(long, global = true)]
    redis: Option<String>,
    /// Redis username
    #[arg(long, global = true)]
    ruser: Option<String>,
    /// Redis password
    #[arg(long, global = true)]
    rpass: Option<String>,
    /// Gateway identity used as envelope source
    #[arg(long, global = true)]
    id: Option<String>,
    /// Discord bot token
    #[arg(short, long, global = true)]
    token: Option<String>,
    /// Flat inbound topic
    #[arg(long, global = true)]
    inbound: Option<String>,
    /// Flat outbound topic
    #[arg(long, global = true)]
    outbound: Option<String>,
    /// Topic naming scheme (flat, hierarchical)
    #[arg(long, global = true, value_parser = parse_topic_scheme)]
    topic_scheme: Option<TopicScheme>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(redis) = &self.redis {
            config.redis.addr = redis.clone();
        }
        if let Some(user) = &self.ruser {
            config.redis.username = user.clone();
        }
        if let Some(pass) = &self.rpass {
            config.redis.password = pass.clone();
        }
        if let Some(id) = &self.id {
            config.gateway.id = id.clone();
        }
        if let Some(token) = &self.token {
            config.discord.token = token.clone();
        }
        if let Some(inbound) = &self.inbound {
            config.gateway.inbound_topic = inbound.clone();
        }
        if let Some(outbound) = &self.outbound {
            config.gateway.outbound_topic = outbound.clone();
        }
        if let Some(scheme) = self.topic_scheme {
            config.gateway.topic_scheme = scheme;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

fn parse_topic_scheme(s: &str) -> std::result::Result<TopicScheme, String> {
    s.parse().map_err(|e: bytebot_core::Error| e.to_string())
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the gateway (default)
    Gateway,
    /// Run the demo application that answers "ping" with "pong"
    Pingpong {
        /// Identity the demo writes as envelope source
        #[arg(long, default_value = "pingpong")]
        app_id: String,
    },
    /// Run the gateway and the pingpong demo in one process over an in-memory bus
    Demo {
        /// Identity the demo writes as envelope source
        #[arg(long, default_value = "pingpong")]
        app_id: String,
    },
    /// Probe the bus and the platform once and print the report
    Check,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    };

    match cli.command.unwrap_or(Commands::Gateway) {
        Commands::Init { force } => run_init(&loader, &cli.overrides, force),
        Commands::Gateway => {
            let config = load_config(&loader, &cli.overrides)?;
            validate_gateway(&config)?;
            let _guard = init_logging(&config.logging);
            let bus = build_bus(&config)?;
            run_gateway(config, bus).await
        }
        Commands::Demo { app_id } => {
            let config = load_config(&loader, &cli.overrides)?;
            validate_gateway(&config)?;
            let _guard = init_logging(&config.logging);
            run_demo(config, app_id).await
        }
        Commands::Pingpong { app_id } => {
            let config = load_config(&loader, &cli.overrides)?;
            let _guard = init_logging(&config.logging);
            run_pingpong(config, app_id).await
        }
        Commands::Check => {
            let config = load_config(&loader, &cli.overrides)?;
            validate_gateway(&config)?;
            let _guard = init_logging(&config.logging);
            run_check(config).await
        }
    }
}

fn load_config(loader: &ConfigLoader, overrides: &Overrides) -> Result<Config> {
    let mut config = loader
        .load()
        .with_context(|| format!("load {}", loader.config_path().display()))?;
    overrides.apply(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn run_init(loader: &ConfigLoader, overrides: &Overrides, force: bool) -> Result<()> {
    let path = loader.config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        );
    }

    let mut config = Config::default();
    overrides.apply(&mut config);
    loader.save(&config)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn build_bus(config: &Config) -> Result<Arc<dyn MessageBus>> {
    let bus = RedisBus::new(&config.redis)?;
    info!(url = %bus.display_url(), "Using redis bus");
    Ok(Arc::new(bus))
}

/// Publishes kept by the in-memory bus of `demo`
const DEMO_HISTORY: usize = 256;

async fn run_gateway(config: Config, bus: Arc<dyn MessageBus>) -> Result<()> {
    info!(
        id = %config.gateway.id,
        scheme = %config.gateway.topic_scheme,
        "Starting bytebot gateway"
    );

    let platform = Arc::new(DiscordClient::new(&config.discord)?);
    let supervisor = Supervisor::new(&config, bus.clone(), platform.clone());

    let cancel = CancellationToken::new();
    let health = if config.health.enabled {
        let probe = HealthProbe::new(&config, bus.clone(), platform.clone());
        let health_config = config.health.clone();
        let cancel = cancel.clone();
        info!(bind = %health_config.bind, "Starting health endpoint");
        Some(tokio::spawn(async move {
            if let Err(e) = bytebot_health::serve(&health_config, probe, cancel).await {
                error!("Health endpoint stopped: {:#}", e);
            }
        }))
    } else {
        None
    };

    let result = supervisor.run(shutdown_signal()).await;
    cancel.cancel();
    if let Some(health) = health {
        if let Err(e) = health.await {
            warn!("Health task ended abnormally: {}", e);
        }
    }

    match result {
        Ok(()) => {
            info!("Gateway stopped");
            Ok(())
        }
        Err(e) => {
            error!("Gateway failed: {}", e);
            Err(e.into())
        }
    }
}

async fn run_pingpong(config: Config, app_id: String) -> Result<()> {
    let bus = build_bus(&config)?;
    bus.ping().await.context("redis ping")?;

    let app = PingPong::new(app_id, bus, TopicNamer::from_config(&config.gateway));
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let result = app.run(cancel).await;
    watcher.abort();
    result
}

async fn run_demo(config: Config, app_id: String) -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::with_history_limit(DEMO_HISTORY));
    info!(app_id = %app_id, "Using in-memory bus");

    let app = PingPong::new(app_id, bus.clone(), TopicNamer::from_config(&config.gateway));
    let cancel = CancellationToken::new();
    let app_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { app.run(cancel).await }
    });

    let result = run_gateway(config, bus).await;
    cancel.cancel();
    match app_task.await {
        Ok(Err(e)) => warn!("Pingpong stopped: {:#}", e),
        Err(e) => warn!("Pingpong task ended abnormally: {}", e),
        Ok(Ok(())) => {}
    }
    result
}

async fn run_check(config: Config) -> Result<()> {
    let bus = build_bus(&config)?;
    let platform = Arc::new(DiscordClient::new(&config.discord)?);
    let probe = HealthProbe::new(&config, bus, platform);

    let report = probe.check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.healthy {
        anyhow::bail!("health check failed");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_is_default_command() {
        let cli = Cli::try_parse_from(["bytebot"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.overrides.verbose);
    }

    #[test]
    fn test_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "bytebot",
            "gateway",
            "--id",
            "gw1",
            "-t",
            "secret",
            "--topic-scheme",
            "hierarchical",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Commands::Gateway));
        assert_eq!(cli.overrides.id.as_deref(), Some("gw1"));
        assert_eq!(cli.overrides.token.as_deref(), Some("secret"));
        assert_eq!(cli.overrides.topic_scheme, Some(TopicScheme::Hierarchical));
        assert!(cli.overrides.verbose);
    }

    #[test]
    fn test_pingpong_app_id() {
        let cli = Cli::try_parse_from(["bytebot", "pingpong"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Pingpong {
                app_id: "pingpong".to_string()
            })
        );

        let cli = Cli::try_parse_from(["bytebot", "pingpong", "--app-id", "echo"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Pingpong {
                app_id: "echo".to_string()
            })
        );
    }

    #[test]
    fn test_demo_subcommand() {
        let cli = Cli::try_parse_from(["bytebot", "demo", "-t", "secret"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Demo {
                app_id: "pingpong".to_string()
            })
        );
        assert_eq!(cli.overrides.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_topic_scheme_rejected() {
        assert!(Cli::try_parse_from(["bytebot", "--topic-scheme", "tree"]).is_err());
    }

    #[test]
    fn test_only_passed_flags_override() {
        let mut config = Config::default();
        config.gateway.id = "from-env".to_string();
        config.redis.addr = "redis.internal:6379".to_string();

        let cli = Cli::try_parse_from(["bytebot", "--redis", "localhost:7000"]).unwrap();
        cli.overrides.apply(&mut config);

        assert_eq!(config.redis.addr, "localhost:7000");
        assert_eq!(config.gateway.id, "from-env");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_init_writes_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_dir(dir.path());
        let overrides = Overrides {
            id: Some("gw1".to_string()),
            ..Overrides::default()
        };

        run_init(&loader, &overrides, false).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(loader.config_path()).unwrap())
                .unwrap();
        assert_eq!(written["gateway"]["id"], "gw1");

        assert!(run_init(&loader, &overrides, false).is_err());
        assert!(run_init(&loader, &overrides, true).is_ok());
    }
}
