//! Dump per-packet metadata from one interface into a length-prefixed file.

use anyhow::{Context, Result};
use bandwidth_core::framing::{FrameWriter, PacketMetadata};
use chrono::Utc;
use clap::Parser;
use node::capture::{LiveCapture, PacketSource};
use node::config::{CaptureConfig, LoggingConfig};
use node::logging::init_logging;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "packet-recorder", version, about)]
struct Args {
    /// Name of the device to record packets from
    #[arg(long)]
    device: String,

    /// File the records are appended to
    #[arg(long)]
    output: PathBuf,

    /// Put the device in promiscuous mode
    #[arg(long)]
    promiscuous: bool,
}

#[derive(Default)]
struct Throughput {
    packets: AtomicU64,
    bytes: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&LoggingConfig::default());

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.output)
        .with_context(|| format!("Failed to open {}", args.output.display()))?;

    let capture_config = CaptureConfig {
        promiscuous: args.promiscuous,
        ..CaptureConfig::default()
    };
    let mut capture = LiveCapture::open(&args.device, &capture_config)
        .with_context(|| format!("Failed to open capture on {}", args.device))?;
    info!(device = %args.device, output = %args.output.display(), "Recording packets");

    let throughput = Arc::new(Throughput::default());

    {
        let throughput = Arc::clone(&throughput);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let packets = throughput.packets.swap(0, Ordering::Relaxed);
                let bytes = throughput.bytes.swap(0, Ordering::Relaxed);
                info!("{packets} packets/s; {bytes} bytes/s");
            }
        });
    }

    let recorder = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut writer = FrameWriter::new(file);
        loop {
            let packet = capture.next_packet()?;
            let metadata = PacketMetadata::from_packet(&packet, Utc::now());
            writer.write(&metadata)?;
            throughput.packets.fetch_add(1, Ordering::Relaxed);
            throughput
                .bytes
                .fetch_add(u64::from(metadata.total_size), Ordering::Relaxed);
        }
    });

    tokio::select! {
        result = recorder => {
            let error = match result {
                Ok(Err(e)) => e,
                Ok(Ok(())) => anyhow::anyhow!("recorder stopped"),
                Err(e) => e.into(),
            };
            error!(error = %error, "Packet recording failed");
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            // The capture thread blocks in reads and cannot be joined.
            std::process::exit(0);
        }
    }
}
