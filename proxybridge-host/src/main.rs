//! proxybridge-host: serves the proxy protocol over stdin/stdout.

mod config;
mod realm;

use std::process;

use anyhow::Context;

use proxybridge::{ProxyDispatcher, serve_with_limit};

use crate::config::{HostConfig, init_tracing, parse_args};

fn usage() {
    eprintln!("Usage: proxybridge-host [--max-frame-bytes <n>]");
    eprintln!();
    eprintln!("Reads length-prefixed JSON frames from stdin and writes replies to stdout.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --max-frame-bytes <n>  Largest accepted frame [default: 8388608]");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROXYBRIDGE_LOG              debug|info|warn|error [default: info]");
    eprintln!("  RUST_LOG                     Full filter, overrides PROXYBRIDGE_LOG");
    eprintln!("  LOG_FORMAT=json              JSON log lines on stderr");
    eprintln!("  PROXYBRIDGE_MAX_FRAME_BYTES  Same as --max-frame-bytes");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let overrides = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            usage();
            process::exit(2);
        }
    };

    let mut config = HostConfig::from_env()?;
    config.apply(&overrides);
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        max_frame_bytes = config.max_frame_bytes,
        "Starting proxybridge host"
    );

    let (dispatcher, callbacks) = ProxyDispatcher::new(realm::build_realm());
    serve_with_limit(
        &dispatcher,
        callbacks,
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.max_frame_bytes,
    )
    .await
    .context("host transport failed")?;

    tracing::info!("Input closed, shutting down");
    Ok(())
}
