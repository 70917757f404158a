//! Carnet pipeline metrics, exposed at `/api/carnets/metrics`.
//!
//! HTTP request metrics are handled separately by the actix-web-prometheus
//! middleware at `/metrics`.

use actix_web::{HttpResponse, Responder};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref CARNET_GENERATIONS: IntCounterVec = register_int_counter_vec!(
        "carnet_generations_total",
        "Carnet generations by delivery mode and outcome",
        &["mode", "outcome"]
    )
    .expect("carnet_generations_total registers once");
    pub static ref CARNET_EXPORT_SECONDS: Histogram = register_histogram!(
        "carnet_export_seconds",
        "Wall time of headless-browser PDF exports",
        vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("carnet_export_seconds registers once");
    pub static ref CARNET_EXPORTS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "carnet_exports_in_flight",
        "PDF exports currently holding an export permit"
    )
    .expect("carnet_exports_in_flight registers once");
}

pub fn record_generation(mode: &str, outcome: &str) {
    CARNET_GENERATIONS.with_label_values(&[mode, outcome]).inc();
}

/// Keeps `carnet_exports_in_flight` accurate even if the export future is dropped.
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn enter() -> Self {
        CARNET_EXPORTS_IN_FLIGHT.inc();
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        CARNET_EXPORTS_IN_FLIGHT.dec();
    }
}

pub async fn carnet_metrics() -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::error!("Failed to encode carnet metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
