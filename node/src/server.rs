//! Prometheus scrape endpoint.

use actix_web::{dev::Server, web, App, HttpResponse, HttpServer};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::{info, warn};

/// Path serving the text exposition format
pub const METRICS_PATH: &str = "/metrics";

/// Render every metric in `registry`. Each scrape also queues a background
/// flush of the persisted counters.
pub async fn metrics_handler(registry: web::Data<Registry>) -> HttpResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&families, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(METRICS_PATH, web::get().to(metrics_handler));
}

/// Bind the scrape endpoint. The returned server must be awaited to run.
///
/// Signal handling is left to the caller.
pub fn start(listen_addr: SocketAddr, registry: Registry) -> std::io::Result<Server> {
    let registry = web::Data::new(registry);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(registry.clone())
            .configure(configure)
    })
    .disable_signals()
    .bind(listen_addr)?
    .run();

    info!("Metrics endpoint listening on http://{}{}", listen_addr, METRICS_PATH);
    Ok(server)
}
