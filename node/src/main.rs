use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use bandwidth_core::persist::StorageBuilder;
use chrono::Local;
use clap::Parser;
use node::capture::{lookup_interface, LiveCapture};
use node::config::{ConfigOverrides, RecorderConfig};
use node::logging::init_logging;
use node::metrics::RecorderMetrics;
use node::{server, worker};
use pnet::util::MacAddr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Record per-layer WAN and LAN traffic into persistent Prometheus counters
#[derive(Parser, Debug)]
#[command(name = "bandwidth-recorder", version, about)]
struct Args {
    /// Configuration file (defaults to ./bandwidth.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of the WAN (Internet) device to monitor
    #[arg(long)]
    wan_device: Option<String>,

    /// Name of the LAN device to monitor; LAN accounting is only enabled if set
    #[arg(long)]
    lan_device: Option<String>,

    /// Host and port serving the Prometheus endpoint
    #[arg(long)]
    listen_addr: Option<String>,

    /// Directory of the database holding persistent metrics
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            wan_device: self.wan_device.clone(),
            lan_device: self.lan_device.clone(),
            listen_addr: self.listen_addr.clone(),
            database_path: self.database_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = RecorderConfig::load(args.config.as_deref(), &args.overrides())
        .context("Failed to load configuration")?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.logging);
    info!("Starting bandwidth recorder v{}", env!("CARGO_PKG_VERSION"));

    let wan = lookup_interface(&config.capture.wan_device)
        .with_context(|| format!("Failed to look up WAN device {}", config.capture.wan_device))?;
    let wan_mac = wan.mac.unwrap_or_else(|| {
        warn!(interface = %wan.name, "WAN device has no hardware address; the direction of all layer 4 traffic will be unknown");
        MacAddr::zero()
    });

    let lan = match config.capture.lan_device() {
        Some(name) => {
            let info = lookup_interface(name)
                .with_context(|| format!("Failed to look up LAN device {name}"))?;
            let mac = info.require_mac()?;
            Some((info, mac))
        }
        None => None,
    };

    let mut builder = StorageBuilder::new(config.storage.options())?;
    let metrics = RecorderMetrics::register(&mut builder, lan.is_some(), Local::now())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let storage = builder
        .initialize(&config.storage.database_path, shutdown_rx)
        .await
        .with_context(|| {
            format!(
                "Failed to initialize metrics database at {}",
                config.storage.database_path.display()
            )
        })?;

    let wan_capture = LiveCapture::open(&wan.name, &config.capture)
        .with_context(|| format!("Failed to open capture on {}", wan.name))?;
    let lan_capture = match &lan {
        Some((info, _)) => Some(
            LiveCapture::open(&info.name, &config.capture)
                .with_context(|| format!("Failed to open capture on {}", info.name))?,
        ),
        None => None,
    };

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    worker::spawn_wan_worker(
        wan.name.clone(),
        wan_capture,
        wan_mac,
        metrics.wan.clone(),
        fatal_tx.clone(),
    );
    if let (Some((info, mac)), Some(capture), Some(lan_metrics)) =
        (lan, lan_capture, metrics.lan.clone())
    {
        let local_addrs = Arc::new(ArcSwap::from_pointee(info.ips.clone()));
        worker::spawn_lan_worker(info.name, capture, mac, local_addrs, lan_metrics, fatal_tx);
    }

    let listen_addr: SocketAddr = config.metrics.listen_addr.parse()?;
    let server = server::start(listen_addr, metrics.registry.clone())
        .with_context(|| format!("Failed to bind metrics endpoint on {listen_addr}"))?;

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "Metrics endpoint failed");
            }
            std::process::exit(1);
        }
        Some(e) = fatal_rx.recv() => {
            error!(error = %e, "Monitoring stopped");
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, saving metrics");
            let _ = shutdown_tx.send(true);
            let failures = storage.flush_all();
            if failures > 0 {
                warn!(failures, "Some counters could not be saved");
            }
            // Capture threads block in reads and cannot be joined.
            std::process::exit(0);
        }
    }
}
