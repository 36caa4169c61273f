use anyhow::{Context, Result};
use clap::Parser;
use intercept_core::{init_observability, DnsResponder, InterceptionDirectory, TunnelConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "interceptd")]
#[command(about = "Overlay interception daemon: virtual addresses and local DNS", long_about = None)]
struct Args {
    /// Configuration file (defaults to the per-install config path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Disable the local DNS responder
    #[arg(long)]
    no_dns: bool,
}

fn load_config(args: &Args) -> Result<TunnelConfig> {
    let mut config = match &args.config {
        Some(path) => TunnelConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TunnelConfig::load().context("loading default config")?,
    };
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // A bad address block is a startup error; nothing can be allocated safely.
    let config = load_config(&args)?;

    init_observability(&config)
        .map_err(|e| anyhow::anyhow!("initializing observability: {}", e))?;

    info!("Interception daemon starting");

    let directory = Arc::new(
        InterceptionDirectory::from_config(&config).context("creating interception directory")?,
    );
    let tun = config.tun_ip_info();
    info!(
        ip = %tun.ip,
        subnet = %tun.subnet,
        mtu = tun.mtu,
        dns = %tun.dns,
        pool = %format!("{}/{}", directory.pool().base_network(), directory.pool().prefix_len()),
        "Interception directory ready"
    );

    let dns_handle = if args.no_dns {
        info!("DNS responder disabled");
        None
    } else {
        let responder = DnsResponder::from_config(&config, Arc::clone(&directory));
        let bind_addr = responder.bind_addr();
        Some(tokio::spawn(async move {
            if let Err(e) = responder.serve().await {
                error!("DNS responder on {} failed: {}", bind_addr, e);
            }
        }))
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    if let Some(handle) = dns_handle {
        handle.abort();
        let _ = handle.await;
    }

    let stats = directory.stats();
    info!(
        hostnames = stats.hostnames,
        services = stats.services,
        allocated = stats.pool_allocated,
        capacity = stats.pool_capacity,
        "Interception daemon shutting down"
    );
    Ok(())
}
