//! Protocol handler results.
//!
//! A [`VfsResponse`] is framework-agnostic: status, headers, and a body that
//! is either nothing, a short message, a directory listing, or a bounded
//! file stream the host server pumps out in fixed-size chunks.

use std::time::SystemTime;

use http::header::{ALLOW, ETAG, LAST_MODIFIED, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::io::Take;

use crate::error::{FailureKind, VfsError};
use crate::etag::EntityTag;
use crate::listing::DirectoryEntry;

/// An open file slice ready to be streamed.
#[derive(Debug)]
pub struct FileStream {
    /// Reader positioned at the first byte to send, limited to `len` bytes.
    pub reader: Take<tokio::fs::File>,
    /// Bytes remaining.
    pub len: u64,
    /// Read chunk size for the outbound stream.
    pub chunk_size: usize,
}

/// Response body.
#[derive(Debug, Default)]
pub enum VfsBody {
    /// No body.
    #[default]
    Empty,
    /// Plain-text reason.
    Message(String),
    /// Directory listing, serialized as a JSON array.
    Listing(Vec<DirectoryEntry>),
    /// File content.
    File(FileStream),
}

/// Result of handling one VFS request.
#[derive(Debug)]
pub struct VfsResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: VfsBody,
}

impl VfsResponse {
    /// A bodiless response.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: VfsBody::Empty,
        }
    }

    /// A response carrying a plain-text reason.
    pub fn message(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: VfsBody::Message(msg.into()),
        }
    }

    /// 307 to `location`; the client repeats the same method.
    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::TEMPORARY_REDIRECT).with_header(LOCATION, location)
    }

    /// 405 listing the verbs the gateway answers.
    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED).with_header(ALLOW, "GET, HEAD, PUT, DELETE")
    }

    /// Translate a classified error into a response.
    pub fn failure(err: &VfsError) -> Self {
        Self::message(status_for(err.kind()), err.to_string())
    }

    /// Add a header. Values that are not valid header text are dropped.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add `ETag`.
    pub fn with_etag(self, tag: &EntityTag) -> Self {
        self.with_header(ETAG, tag.as_str())
    }

    /// Add `Last-Modified`.
    pub fn with_last_modified(self, modified: SystemTime) -> Self {
        self.with_header(LAST_MODIFIED, &httpdate::fmt_http_date(modified))
    }

    /// Set the body.
    pub fn with_body(mut self, body: VfsBody) -> Self {
        self.body = body;
        self
    }

    /// The `ETag` header, if set.
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).and_then(|v| v.to_str().ok())
    }
}

/// HTTP status for a failure class.
pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::NotFound => StatusCode::NOT_FOUND,
        FailureKind::Conflict => StatusCode::CONFLICT,
        FailureKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
        FailureKind::Forbidden => StatusCode::FORBIDDEN,
        FailureKind::BadRequest => StatusCode::BAD_REQUEST,
        FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
