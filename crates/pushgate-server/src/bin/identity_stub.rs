//! Local identity service: answers every ticket with one fixed identity.

use anyhow::Context;
use clap::Parser;
use pushgate_core::TicketClaims;
use pushgate_server::stub::{self, StubDirectory, CHECK_TICKET_PATH};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pushgate-identity-stub", version, about = "Stand-in ticket validation service")]
struct Cli {
    #[arg(short, long, default_value_t = 6070)]
    port: u16,

    /// Origin address returned for every ticket
    #[arg(long, default_value = "127.0.0.1")]
    ipaddr: String,

    /// User id returned for every ticket
    #[arg(long, default_value = "1")]
    userid: String,

    /// Require this bearer token
    #[arg(long)]
    token: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let mut directory =
        StubDirectory::default().with_fallback(TicketClaims::new(&cli.ipaddr, &cli.userid));
    if let Some(token) = &cli.token {
        directory = directory.with_token(token);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(
        addr = %addr,
        path = CHECK_TICKET_PATH,
        ipaddr = %cli.ipaddr,
        userid = %cli.userid,
        "identity stub listening"
    );

    axum::serve(listener, stub::router(directory))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("identity stub failed")?;
    Ok(())
}
