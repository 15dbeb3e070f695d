//! Purpose: Provide the HTTP/JSON sync relay server.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based server implementing the relay contract over the record
//! store; stateless per request.
//! Invariants: Every response carries the permissive CORS header set; the
//! plaintext sync key is never logged or persisted.
//! Invariants: Internal failures surface as a generic 500 body.

use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use synclite::api::{Error, ErrorKind, MAX_DOCUMENT_BYTES, SyncRecord, SyncService};

// Headroom over the document ceiling so bodies just past it still reach the
// serialized-size check and its JSON 413 body; anything larger is cut off at
// the transport layer.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub records_dir: PathBuf,
    pub allow_non_loopback: bool,
}

struct AppState {
    service: SyncService,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let state = Arc::new(AppState {
        service: SyncService::open(&config.records_dir)?,
    });

    let app = Router::new()
        .route(
            "/sync",
            get(fetch_current).put(store_document).fallback(not_found),
        )
        .route("/sync/previous", get(fetch_previous).fallback(not_found))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES + BODY_LIMIT_SLACK))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(cors))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, PUT, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

// Preflights short-circuit with an empty 204; every other response, success
// or error, gets the same permissive header set appended.
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

fn require_key(query: &KeyQuery) -> Result<String, Error> {
    let key = query.key.clone().unwrap_or_default();
    synclite::api::validate_sync_key(&key)?;
    Ok(key)
}

async fn fetch_current(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> Response {
    let key = match require_key(&query) {
        Ok(key) => key,
        Err(err) => return error_response(err),
    };
    match state.service.fetch_current(&key) {
        Ok(record) => json_response(exists_envelope(record)),
        Err(err) => error_response(err),
    }
}

async fn fetch_previous(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> Response {
    let key = match require_key(&query) {
        Ok(key) => key,
        Err(err) => return error_response(err),
    };
    match state.service.fetch_previous(&key) {
        Ok(record) => json_response(exists_envelope(record)),
        Err(err) => error_response(err),
    }
}

async fn store_document(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
    body: Bytes,
) -> Response {
    let key = match require_key(&query) {
        Ok(key) => key,
        Err(err) => return error_response(err),
    };
    let document: Value = match serde_json::from_slice(&body) {
        Ok(document) => document,
        Err(err) => {
            return error_response(
                Error::new(ErrorKind::Usage)
                    .with_message("request body must be valid JSON")
                    .with_source(err),
            );
        }
    };
    match state.service.store_document(&key, document) {
        Ok(record) => json_response(json!({
            "ok": true,
            "serverUpdatedAt": record.server_updated_at,
        })),
        Err(err) => error_response(err),
    }
}

async fn not_found(Query(query): Query<KeyQuery>) -> Response {
    if let Err(err) = require_key(&query) {
        return error_response(err);
    }
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found" })),
    )
        .into_response()
}

fn exists_envelope(record: Option<SyncRecord>) -> Value {
    match record {
        None => json!({ "exists": false }),
        Some(record) => json!({
            "exists": true,
            "data": record.data,
            "serverUpdatedAt": record.server_updated_at,
        }),
    }
}

fn json_response(payload: Value) -> Response {
    Json(payload).into_response()
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Network | ErrorKind::Corrupt | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(err.kind());
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
        "Internal server error".to_string()
    } else {
        err.message().unwrap_or("request rejected").to_string()
    };
    (status, Json(json!({ "error": message }))).into_response()
}
