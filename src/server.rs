//! HTTP surface: routes, extractors and error responses.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /health` | liveness plus gateway readiness |
//! | `GET /api/gateway-status` | readiness and gateway port |
//! | `POST /api/parse` | multipart `pdf` upload → CSV download URL |
//! | `GET /api/download/{filename}` | stream a generated CSV |
//!
//! `POST /api/parse` checks, in order: API key (401), rate limit (429),
//! upload validity (400 / 413), then runs the extraction (500 on failure).
//! Every error body is `{"success": false, "error": "<message>"}`.

use crate::error::Pdf2CsvError;
use crate::pipeline::upload;
use crate::service::Pdf2CsvService;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Room left in the request body limit for multipart framing.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

type AppState = Arc<Pdf2CsvService>;

// ── Response bodies ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub gateway_ready: bool,
}

#[derive(Debug, Serialize)]
pub struct GatewayStatusResponse {
    pub ready: bool,
    pub port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResponse {
    pub success: bool,
    pub message: String,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for Pdf2CsvError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected ({}): {}", status, self);
        }
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ── Client identity ──────────────────────────────────────────────────────

/// Key used for rate limiting: first `X-Forwarded-For` entry, else the peer
/// address, else `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        match (forwarded, peer) {
            (Some(ip), _) => Self(ip.to_string()),
            (None, Some(addr)) => Self(addr.ip().to_string()),
            (None, None) => Self("unknown".to_string()),
        }
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_parts(&parts.headers, peer))
    }
}

// ── Router ───────────────────────────────────────────────────────────────

/// Build the application router around a shared service.
pub fn router(service: Arc<Pdf2CsvService>) -> Router {
    let body_limit = service
        .config()
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/health", get(health))
        .route("/api/gateway-status", get(gateway_status))
        .route("/api/parse", post(parse_pdf))
        .route("/api/download/{filename}", get(download_csv))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<Pdf2CsvService>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("pdf2csv listening on http://{}", addr);
    }
    axum::serve(
        listener,
        router(service).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Like [`serve`], but runs `on_stop` as soon as `shutdown` resolves and
/// gives in-flight requests at most `drain` to finish.
///
/// Requests still running after `drain` are abandoned; their tasks (and any
/// agent subprocess they started) die when the runtime shuts down.
pub async fn serve_with_drain<F, S, SF>(
    listener: TcpListener,
    service: Arc<Pdf2CsvService>,
    shutdown: F,
    drain: Duration,
    on_stop: S,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
    S: FnOnce() -> SF,
    SF: Future<Output = ()>,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let signal = async move {
        shutdown.await;
        let _ = stop_tx.send(());
    };
    let server = serve(listener, service, signal);
    tokio::pin!(server);

    tokio::select! {
        served = &mut server => {
            on_stop().await;
            served
        }
        Ok(()) = stop_rx => {
            on_stop().await;
            match tokio::time::timeout(drain, &mut server).await {
                Ok(served) => served,
                Err(_) => {
                    warn!("Requests still in flight after {:?}; dropping them", drain);
                    Ok(())
                }
            }
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health(State(service): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        gateway_ready: service.readiness().is_ready(),
    })
}

async fn gateway_status(State(service): State<AppState>) -> Json<GatewayStatusResponse> {
    Json(GatewayStatusResponse {
        ready: service.readiness().is_ready(),
        port: service.config().gateway_port,
    })
}

async fn parse_pdf(
    State(service): State<AppState>,
    identity: ClientIdentity,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ParseResponse>, Pdf2CsvError> {
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    service.authorize(api_key)?;
    service.admit(&identity.0)?;

    let mut multipart = multipart.map_err(|e| Pdf2CsvError::Multipart(e.body_text()))?;
    let pending = upload::receive(&mut multipart, service.config().max_upload_bytes).await?;
    let outcome = service.parse(pending).await?;

    Ok(Json(ParseResponse {
        success: true,
        download_url: outcome.download_url(),
        message: outcome.message,
    }))
}

async fn download_csv(
    State(service): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, Pdf2CsvError> {
    let download = service.download(&filename).await?;
    let file = tokio::fs::File::open(&download.path)
        .await
        .map_err(|e| Pdf2CsvError::io(&download.path, e))?;
    let cleanup = download.cleanup;
    // The guard rides along with the body and drops once the transfer ends.
    let body = Body::from_stream(ReaderStream::new(file).map(move |chunk| {
        let _ = &cleanup;
        chunk
    }));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.168.1.7:51000".parse().unwrap())
    }

    #[test]
    fn identity_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(
            ClientIdentity::from_parts(&headers, peer()),
            ClientIdentity("203.0.113.5".into())
        );
    }

    #[test]
    fn identity_falls_back_to_peer_then_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(ClientIdentity::from_parts(&headers, peer()).0, "192.168.1.7");
        assert_eq!(ClientIdentity::from_parts(&headers, None).0, "unknown");
    }

    #[test]
    fn error_response_has_failure_envelope() {
        let resp = Pdf2CsvError::RateLimited.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn parse_response_uses_camel_case() {
        let v = serde_json::to_value(ParseResponse {
            success: true,
            message: "ok".into(),
            download_url: "/api/download/a.csv".into(),
        })
        .unwrap();
        assert_eq!(v["downloadUrl"], "/api/download/a.csv");
    }
}
