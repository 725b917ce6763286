//! HTTP endpoint for the pipeline snapshot and Prometheus metrics.
//!
//! - `GET /monitor`: pretty-printed [`PipelineSnapshot`](super::PipelineSnapshot) JSON
//! - `GET /metrics`: default Prometheus registry in text format

use super::Monitor;
use anyhow::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::Encoder;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MONITOR_PATH: &str = "/monitor";
pub const METRICS_PATH: &str = "/metrics";

/// Serve on an already bound listener until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    monitor: Monitor,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(
        "monitor server listening on http://{}{} and http://{}{}",
        local_addr, MONITOR_PATH, local_addr, METRICS_PATH
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("monitor server shutting down");
                return Ok(());
            }
            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "failed to accept monitor connection");
                        continue;
                    }
                };

                let monitor = monitor.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let response = route(&monitor, req.method(), req.uri().path());
                        async move { Ok::<_, Infallible>(response) }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(peer = %peer, error = %err, "error serving monitor connection");
                    }
                });
            }
        }
    }
}

fn route(monitor: &Monitor, method: &Method, path: &str) -> Response<Full<Bytes>> {
    if *method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }
    match path {
        MONITOR_PATH => monitor_response(monitor),
        METRICS_PATH => metrics_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn monitor_response(monitor: &Monitor) -> Response<Full<Bytes>> {
    match serde_json::to_vec_pretty(&monitor.snapshot()) {
        Ok(body) => build_response(StatusCode::OK, "application/json", body),
        Err(err) => {
            warn!(error = %err, "failed to encode monitor snapshot");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => build_response(StatusCode::OK, encoder.format_type(), buffer),
        Err(err) => {
            warn!(error = %err, "failed to encode prometheus metrics");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    build_response(status, "text/plain; charset=utf-8", body)
}

fn build_response(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}
