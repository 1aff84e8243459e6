//! HTTP interface
//!
//! Routes:
//! - `POST /ttn-webhook` - ingest one TTN uplink
//! - `GET /api/data` - position history, oldest first
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus text
//!
//! Uses hyper directly; each connection is served on its own task.

use crate::domain::types::Payload;
use crate::io::prometheus;
use crate::io::webhook::TtnUplink;
use crate::services::pipeline::{IngestResponse, IngestionPipeline};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const WEBHOOK_PATH: &str = "/ttn-webhook";
pub const HISTORY_PATH: &str = "/api/data";

/// Largest accepted webhook body; matches the MQTT packet limit
pub const MAX_WEBHOOK_BODY_BYTES: usize = 256 * 1024;

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "response_serialize_failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization error")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Collect a request body, refusing anything over `limit` bytes with 413
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, (StatusCode, String)>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            Err((StatusCode::PAYLOAD_TOO_LARGE, format!("body exceeds {limit} bytes")))
        }
        Err(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}

async fn handle_webhook(
    req: Request<hyper::body::Incoming>,
    pipeline: &IngestionPipeline,
) -> Response<Full<Bytes>> {
    let history_size = || pipeline.history().len();

    let body = match read_body(req.into_body(), MAX_WEBHOOK_BODY_BYTES).await {
        Ok(body) => body,
        Err((status, message)) => {
            pipeline.metrics().record_rejected();
            warn!(status = %status.as_u16(), error = %message, "webhook_body_read_failed");
            return json_response(status, &IngestResponse::error(message, history_size()));
        }
    };

    let uplink = match TtnUplink::from_slice(&body) {
        Ok(uplink) => uplink,
        Err(e) => {
            pipeline.metrics().record_rejected();
            warn!(error = %e, bytes = body.len(), "webhook_invalid_uplink");
            return json_response(
                StatusCode::BAD_REQUEST,
                &IngestResponse::error(format!("invalid uplink message: {e}"), history_size()),
            );
        }
    };

    let observation = uplink.into_observation();
    debug!(
        device_id = %observation.device_id,
        payload = payload_kind(observation.payload.as_ref()),
        source = "webhook",
        "uplink_received"
    );

    match pipeline.process(observation).await {
        Ok(outcome) => json_response(StatusCode::OK, &IngestResponse::from_outcome(&outcome)),
        Err(e) => {
            error!(error = %e, "uplink_processing_failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &IngestResponse::error(e.to_string(), history_size()),
            )
        }
    }
}

pub(crate) fn payload_kind(payload: Option<&Payload>) -> &'static str {
    match payload {
        Some(Payload::Structured(_)) => "structured",
        Some(Payload::Raw(_)) => "raw",
        None => "none",
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    pipeline: IngestionPipeline,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, WEBHOOK_PATH) => handle_webhook(req, &pipeline).await,
        (&Method::GET, HISTORY_PATH) => {
            json_response(StatusCode::OK, &pipeline.history().snapshot())
        }
        (&Method::GET, "/metrics") => {
            let body = prometheus::format_prometheus_metrics(pipeline.metrics());
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", prometheus::CONTENT_TYPE)
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Bind and serve until shutdown is signalled
pub async fn start_http_server(
    addr: SocketAddr,
    pipeline: IngestionPipeline,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, pipeline, shutdown).await
}

/// Serve on an already bound listener until shutdown is signalled
pub async fn serve(
    listener: TcpListener,
    pipeline: IngestionPipeline,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(addr = %listener.local_addr()?, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let pipeline = pipeline.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let pipeline = pipeline.clone();
                                async move { handle_request(req, pipeline).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
