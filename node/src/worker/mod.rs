//! Per-interface aggregation workers.
//!
//! Each worker runs a blocking packet loop on the blocking pool and a
//! once-per-second reporter on the runtime. Neither is ever joined: the first
//! failure of either is sent to the supervisor, which ends the process.

pub mod addresses;
pub mod lan;
pub mod wan;

use crate::capture::{CaptureError, PacketSource};
use crate::metrics::{LanMetrics, WanMetrics};
use arc_swap::ArcSwap;
use bandwidth_core::accumulator::{LanAccumulator, WanAccumulator};
use bandwidth_core::error::MetricError;
use pnet::util::MacAddr;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};

pub use addresses::run_address_refresher;
pub use lan::{capture_lan, report_lan, run_lan_reporter};
pub use wan::{capture_wan, report_wan, run_wan_reporter};

/// Interval between two reports, and between two local address refreshes
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Addresses of the LAN interface, swapped in whole by the refresher
pub type LocalAddrs = Arc<ArcSwap<Vec<IpAddr>>>;

pub type FatalSender = mpsc::UnboundedSender<WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Capture on {interface} stopped: {source}")]
    Capture {
        interface: String,
        source: CaptureError,
    },

    #[error("Reporting for {interface} failed: {source}")]
    Report {
        interface: String,
        source: MetricError,
    },

    #[error("Failed to update addresses of {interface}: {source}")]
    Addresses {
        interface: String,
        source: CaptureError,
    },
}

impl WorkerError {
    pub fn interface(&self) -> &str {
        match self {
            WorkerError::Capture { interface, .. }
            | WorkerError::Report { interface, .. }
            | WorkerError::Addresses { interface, .. } => interface,
        }
    }
}

/// Hand a fatal error to the supervisor. Returns false, after logging the
/// error, when the supervisor is gone.
pub fn report_fatal(fatal: &FatalSender, error: WorkerError) -> bool {
    match fatal.send(error) {
        Ok(()) => true,
        Err(mpsc::error::SendError(error)) => {
            error!(
                interface = %error.interface(),
                error = %error,
                "Supervisor is gone, fatal worker error not delivered"
            );
            false
        }
    }
}

/// Start monitoring the WAN interface
pub fn spawn_wan_worker<S>(
    interface: String,
    mut source: S,
    own_mac: MacAddr,
    metrics: WanMetrics,
    fatal: FatalSender,
) where
    S: PacketSource + 'static,
{
    info!(interface = %interface, mac = %own_mac, "Starting WAN bandwidth monitoring");
    let acc = Arc::new(WanAccumulator::new());

    {
        let acc = Arc::clone(&acc);
        let fatal = fatal.clone();
        let interface = interface.clone();
        tokio::spawn(async move {
            let source = run_wan_reporter(acc, metrics).await;
            report_fatal(&fatal, WorkerError::Report { interface, source });
        });
    }

    tokio::task::spawn_blocking(move || {
        let source = capture_wan(&mut source, own_mac, &acc);
        report_fatal(&fatal, WorkerError::Capture { interface, source });
    });
}

/// Start monitoring the LAN interface. `local_addrs` must already hold the
/// interface's current addresses.
pub fn spawn_lan_worker<S>(
    interface: String,
    mut source: S,
    own_mac: MacAddr,
    local_addrs: LocalAddrs,
    metrics: LanMetrics,
    fatal: FatalSender,
) where
    S: PacketSource + 'static,
{
    info!(interface = %interface, mac = %own_mac, "Starting LAN bandwidth monitoring");
    let acc = Arc::new(LanAccumulator::new());

    {
        let acc = Arc::clone(&acc);
        let fatal = fatal.clone();
        let interface = interface.clone();
        tokio::spawn(async move {
            let source = run_lan_reporter(acc, metrics).await;
            report_fatal(&fatal, WorkerError::Report { interface, source });
        });
    }

    {
        let fatal = fatal.clone();
        let interface = interface.clone();
        let target = Arc::clone(&local_addrs);
        let name = interface.clone();
        tokio::spawn(async move {
            let source = run_address_refresher(
                move || crate::capture::interface_ips(&name),
                target,
                REPORT_INTERVAL,
            )
            .await;
            report_fatal(&fatal, WorkerError::Addresses { interface, source });
        });
    }

    tokio::task::spawn_blocking(move || {
        let source = capture_lan(&mut source, own_mac, &local_addrs, &acc);
        report_fatal(&fatal, WorkerError::Capture { interface, source });
    });
}
