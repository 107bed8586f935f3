//! pushgate: real-time fan-out gateway.
//!
//! Authenticates WebSocket clients by ticket and pushes directives consumed
//! from RabbitMQ to their sessions.

use anyhow::Context;
use clap::Parser;
use pushgate_server::config::{Overrides, ServerConfig};
use pushgate_server::GatewayServer;
use std::path::PathBuf;
use tracing::info;

/// pushgate — real-time fan-out gateway
#[derive(Parser, Debug)]
#[command(name = "pushgate", version, about = "Real-time fan-out gateway")]
struct Cli {
    /// Listen port
    #[arg(short, long, env = "WEBSOCKET_PORT")]
    port: Option<u16>,

    /// Config file path
    #[arg(long, env = "PUSHGATE_CONFIG", default_value = "~/.pushgate/config.toml")]
    config: String,

    /// Ticket validation endpoint of the identity service
    #[arg(long, env = "USER_SERVICE_HOST")]
    identity_url: Option<String>,

    /// Bearer token presented to the identity service
    #[arg(long, env = "USER_SERVICE_TOKEN", hide_env_values = true)]
    identity_token: Option<String>,

    /// Broker host (host or host:port)
    #[arg(long, env = "RABBITMQ_HOST")]
    broker_host: Option<String>,

    #[arg(long, env = "RABBITMQ_USER")]
    broker_user: Option<String>,

    #[arg(long, env = "RABBITMQ_PASSWORD", hide_env_values = true)]
    broker_password: Option<String>,

    #[arg(long, env = "RABBITMQ_VHOST")]
    broker_vhost: Option<String>,

    /// Queue directives are consumed from
    #[arg(long, env = "OUTPUT_QUEUE")]
    queue: Option<String>,

    /// Runtime mode; "prod" enables origin enforcement
    #[arg(long, env = "APP_ENV")]
    app_env: Option<String>,

    /// Force origin enforcement on or off regardless of APP_ENV
    #[arg(long, env = "ORIGIN_ENFORCEMENT")]
    enforce_origin: Option<bool>,

    /// Keepalive ping interval in seconds
    #[arg(long)]
    keepalive_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            port: self.port,
            keepalive_secs: self.keepalive_secs,
            identity_url: self.identity_url.clone(),
            identity_token: self.identity_token.clone(),
            broker_host: self.broker_host.clone(),
            broker_user: self.broker_user.clone(),
            broker_password: self.broker_password.clone(),
            broker_vhost: self.broker_vhost.clone(),
            broker_queue: self.queue.clone(),
            app_env: self.app_env.clone(),
            enforce_origin: self.enforce_origin,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal outside development.
    let dotenv = dotenvy::dotenv().ok();
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting pushgate");
    if let Some(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let config_path = PathBuf::from(&cli.config);
    let config = ServerConfig::load(Some(&config_path), cli.overrides())
        .context("failed to load config")?;
    let server = GatewayServer::new(config).context("failed to create server")?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        shutdown.cancel();
    });

    server.run().await.context("server error")?;
    info!("pushgate stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
