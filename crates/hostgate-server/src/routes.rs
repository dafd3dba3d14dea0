//! axum routing for the filesystem gateway.
//!
//! The handler is mounted on `{prefix}`, `{prefix}/` and `{prefix}/{*path}`
//! for every method; verb dispatch happens inside [`VfsHandler::handle`] so
//! unsupported verbs get a 405 with `Allow` rather than axum's bare 405.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use futures::TryStreamExt;
use hostgate_vfs::{VfsBody, VfsHandler, VfsRequest, VfsResponse, status_for};
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Deserializer};
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared state for the VFS routes.
#[derive(Clone)]
pub struct AppState {
    handler: Arc<VfsHandler>,
    shutdown: CancellationToken,
}

impl AppState {
    /// `shutdown` aborts in-flight uploads when cancelled.
    pub fn new(handler: VfsHandler, shutdown: CancellationToken) -> Self {
        Self {
            handler: Arc::new(handler),
            shutdown,
        }
    }
}

/// Query parameters understood by the gateway.
#[derive(Debug, Deserialize)]
struct VfsParams {
    #[serde(default, deserialize_with = "flag")]
    recursive: bool,
}

/// Accepts `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`, and a bare key.
fn flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(de)?;
    match raw.to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(serde::de::Error::custom(format!(
            "invalid boolean value {raw:?}"
        ))),
    }
}

type Params = Result<Query<VfsParams>, QueryRejection>;

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    let prefix = state.handler.resolver().prefix().to_string();

    let routes = if prefix.is_empty() {
        Router::new()
            .route("/", any(serve_root))
            .route("/{*path}", any(serve_path))
    } else {
        Router::new()
            .route(&prefix, any(serve_root))
            .route(&format!("{prefix}/"), any(serve_root))
            .route(&format!("{prefix}/{{*path}}"), any(serve_path))
    };

    routes
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

fn request_span(req: &Request) -> tracing::Span {
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
    hostgate_telemetry::extract_trace_context(
        req.method().as_str(),
        &req.uri().to_string(),
        header("traceparent"),
        header("tracestate"),
    )
}

async fn serve_root(
    State(state): State<AppState>,
    params: Params,
    req: Request,
) -> Response {
    dispatch(state, String::new(), params, req).await
}

async fn serve_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    params: Params,
    req: Request,
) -> Response {
    dispatch(state, path, params, req).await
}

async fn dispatch(
    state: AppState,
    captured: String,
    params: Params,
    req: Request,
) -> Response {
    let params = match params {
        Ok(Query(params)) => params,
        Err(e) => {
            tracing::debug!(uri = %req.uri(), error = %e, "bad query string");
            return plain_text(StatusCode::BAD_REQUEST, e.body_text());
        }
    };
    let (parts, body) = req.into_parts();

    let vfs_req = VfsRequest::new(parts.method, captured, parts.uri.path())
        .with_query(parts.uri.query().map(str::to_string))
        .with_headers(parts.headers)
        .with_recursive(params.recursive)
        .with_cancel(state.shutdown.child_token());

    let body = StreamReader::new(body.into_data_stream().map_err(io::Error::other));

    match state.handler.handle(&vfs_req, body).await {
        Ok(resp) => into_response(resp),
        Err(e) => {
            tracing::error!(path = %vfs_req.uri_path, error = %e, "request failed");
            plain_text(status_for(e.kind()), e.to_string())
        }
    }
}

fn plain_text(status: StatusCode, msg: String) -> Response {
    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        msg,
    )
        .into_response()
}

/// Convert a handler result into an axum response.
pub fn into_response(resp: VfsResponse) -> Response {
    let VfsResponse {
        status,
        mut headers,
        body,
    } = resp;

    let body = match body {
        VfsBody::Empty => Body::empty(),
        VfsBody::Message(msg) => {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("text/plain; charset=utf-8"));
            Body::from(msg)
        }
        VfsBody::Listing(entries) => match serde_json::to_vec(&entries) {
            Ok(json) => Body::from(json),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize listing");
                return plain_text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        },
        VfsBody::File(file) => {
            Body::from_stream(ReaderStream::with_capacity(file.reader, file.chunk_size))
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    response
}
