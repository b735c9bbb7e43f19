//! criproxy binary.
//!
//! Serves a single CRI endpoint over a Unix domain socket and dispatches
//! each request to one of the configured backend runtimes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use criproxy::config::ProxyConfig;
use criproxy::dispatch::CriProxy;
use criproxy::registry::RuntimeRegistry;
use criproxy::server::ProxyServer;

/// CRI multiplexing proxy
#[derive(Parser, Debug)]
#[command(name = "criproxy", about = "CRI multiplexing proxy")]
struct Args {
    /// Path to the Unix domain socket to listen on.
    #[arg(long, default_value = "/run/criproxy.sock")]
    listen: PathBuf,

    /// Backend runtime spec: a bare socket path for the primary, or
    /// `<selector>:<socket_path>`. Repeat for each backend; the primary
    /// must come first.
    #[arg(long = "connect", default_value = "/run/dockershim.sock")]
    connect: Vec<String>,

    /// Base URL substituted into primary-backend streaming responses.
    #[arg(long, default_value = "http://127.0.0.1:11250/")]
    stream_url: String,

    /// Backend dial and per-call timeout in seconds.
    #[arg(long, default_value = "30")]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ProxyConfig::new(
        &args.connect,
        &args.stream_url,
        Duration::from_secs(args.connect_timeout),
    )?;

    tracing::info!(
        socket = %args.listen.display(),
        backends = ?args.connect,
        stream_url = %config.stream_url,
        "Starting CRI proxy"
    );

    let registry = Arc::new(RuntimeRegistry::new(&config));
    let proxy = Arc::new(CriProxy::new(registry, config.stream_url.clone()));
    let server = ProxyServer::new(proxy, None);
    server.serve(&args.listen).await?;

    Ok(())
}
