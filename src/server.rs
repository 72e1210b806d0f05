//! HTTP surface: an informational endpoint and the archive download.
//!
//! `GET /downloadzip` decides the status code before any body byte exists:
//! the directory scan runs first and a failure there becomes a `500` with a
//! JSON `{"error": ...}` payload. Once the `200` headers are out, the archive
//! is produced by a spawned task writing into a [`ResponseSink`]; a failure
//! from then on terminates the body with an error so the connection is cut
//! instead of ending in a truncated archive.

use crate::config::Config;
use crate::error::ZipStreamError;
use crate::sink::{ResponseSink, SinkHandle};
use crate::streamer::{ArchivePlan, ArchiveRequest, ArchiveState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared, read-only server state
#[derive(Debug, Clone)]
pub struct AppState {
    config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Build the application router
pub fn router(config: Config) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/downloadzip", get(download_zip))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(config))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Any archive error, rendered as `500 {"error": "..."}`
#[derive(Debug)]
pub struct ApiError(pub ZipStreamError);

impl From<ZipStreamError> for ApiError {
    fn from(err: ZipStreamError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

async fn index(headers: HeaderMap) -> Json<Value> {
    let mut echoed = Map::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match echoed.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                echoed.insert(name.as_str().to_string(), Value::String(value));
            }
        }
    }

    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": "GET /downloadzip streams a ZIP archive of the served directory",
        "headers": echoed,
    }))
}

async fn download_zip(State(state): State<AppState>) -> Result<Response, ApiError> {
    let config = state.config();
    let mut request =
        ArchiveRequest::new(&config.source_dir).with_compression(config.compression_level);

    let plan = request.plan().await.map_err(|e| {
        warn!(error = %e, source = %config.source_dir.display(), "archive scan failed");
        ApiError(e)
    })?;
    info!(
        entries = plan.len(),
        bytes = plan.total_size(),
        source = %config.source_dir.display(),
        "streaming archive"
    );

    let (sink, handle, body) = ResponseSink::channel(config.channel_capacity);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", config.download_file_name()),
        )
        .body(Body::from_stream(body))
        .map_err(|e| ApiError(ZipStreamError::Io(std::io::Error::other(e))))?;

    tokio::spawn(stream_archive(request, plan, sink, handle));
    Ok(response)
}

/// Run one archive build into `sink` and settle the response body.
///
/// This is the single completion path for a request: success ends the body
/// by shutting the sink down, a client disconnect cancels the build, and any
/// other failure pushes an error item into the body. Returns the final state.
pub async fn stream_archive(
    mut request: ArchiveRequest,
    plan: ArchivePlan,
    sink: ResponseSink,
    handle: SinkHandle,
) -> ArchiveState {
    let token = request.cancellation_token();
    let outcome = {
        let build = request.stream_into(&plan, sink);
        tokio::pin!(build);
        tokio::select! {
            outcome = &mut build => outcome,
            _ = handle.closed() => {
                token.cancel();
                build.await
            }
        }
    };

    match outcome {
        Ok(report) => info!(
            entries = report.entries,
            uncompressed = report.uncompressed_bytes,
            archive_bytes = report.archive_bytes,
            "archive streamed"
        ),
        Err(e) if e.is_disconnect() => {
            debug!(error = %e, "client went away, archive build stopped")
        }
        Err(e) => {
            warn!(error = %e, "archive build failed mid-stream");
            handle.fail(&e).await;
        }
    }

    request.state()
}
