//! The VFS protocol state machine.
//!
//! Every request is resolved against the root, its target classified as
//! missing, a file, or a directory, and then dispatched by verb:
//!
//! | Verb | Missing | Directory | File |
//! |------|---------|-----------|------|
//! | GET/HEAD | 404 | redirect to `/` form, else JSON listing | redirect to slashless form, else content |
//! | PUT | create (dir if path ends in `/`) | 409 | replace under `If-Match` |
//! | DELETE | 404 | delete, `recursive` optional | delete under `If-Match` |
//!
//! Anticipated filesystem failures become responses here; only
//! unclassified errors escape as `Err`.

use std::fs::Metadata;
use std::io::SeekFrom;
use std::time::SystemTime;

use http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HOST, RANGE};
use http::{HeaderMap, Method, StatusCode};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{FailureKind, VfsError, VfsResult};
use crate::etag::{self, ByteRange, EntityTag};
use crate::listing::list_directory;
use crate::media::MediaTypeMap;
use crate::path::{PathResolver, RootedPath};
use crate::response::{FileStream, VfsBody, VfsResponse};
use crate::safe_fs::SafeFs;

/// Default chunk size for body transfer in both directions.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// The parts of an HTTP request the gateway consumes.
#[derive(Debug, Clone)]
pub struct VfsRequest {
    /// HTTP method.
    pub method: Method,
    /// Path captured by the catch-all route segment (may be empty).
    pub captured: String,
    /// Path of the original request URI, still percent-encoded.
    pub uri_path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// `recursive` flag for directory deletes.
    pub recursive: bool,
    /// Fires when the client goes away.
    pub cancel: CancellationToken,
}

impl VfsRequest {
    /// Create a request with no headers, query, or cancellation wiring.
    pub fn new(method: Method, captured: impl Into<String>, uri_path: impl Into<String>) -> Self {
        Self {
            method,
            captured: captured.into(),
            uri_path: uri_path.into(),
            query: None,
            headers: HeaderMap::new(),
            recursive: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the request headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the raw query string.
    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query.filter(|q| !q.is_empty());
        self
    }

    /// Set the `recursive` flag.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Tie the request to a cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn host(&self) -> Option<&str> {
        self.headers.get(HOST).and_then(|v| v.to_str().ok())
    }
}

/// What the request path currently points at.
#[derive(Debug)]
enum Target {
    Missing,
    File(Metadata),
    Directory,
}

impl Target {
    async fn classify(rooted: &RootedPath) -> VfsResult<Self> {
        match fs::metadata(&rooted.local).await {
            Ok(meta) if meta.is_dir() => Ok(Target::Directory),
            Ok(meta) => Ok(Target::File(meta)),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                Ok(Target::Missing)
            }
            Err(e) => Err(VfsError::at(&rooted.local, e)),
        }
    }
}

fn modified(meta: &Metadata) -> SystemTime {
    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Answers GET, HEAD, PUT and DELETE against a rooted directory.
#[derive(Debug, Clone)]
pub struct VfsHandler {
    resolver: PathResolver,
    fs: SafeFs,
    media: &'static MediaTypeMap,
    buffer_size: usize,
}

impl VfsHandler {
    /// Create a handler using the process-wide media type cache.
    pub fn new(resolver: PathResolver, fs: SafeFs) -> Self {
        Self {
            resolver,
            fs,
            media: MediaTypeMap::global(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the transfer chunk size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// The path resolver.
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Handle one request. `body` is only read for PUT.
    pub async fn handle<B>(&self, req: &VfsRequest, body: B) -> VfsResult<VfsResponse>
    where
        B: AsyncRead + Unpin + Send,
    {
        let rooted = match self.resolver.resolve(&req.captured, &req.uri_path) {
            Ok(rooted) => rooted,
            Err(e) => {
                tracing::warn!(path = %req.captured, error = %e, "rejected request path");
                return Ok(VfsResponse::failure(&e));
            }
        };

        let target = Target::classify(&rooted).await?;

        match req.method {
            Method::GET => self.get(req, &rooted, target, true).await,
            Method::HEAD => self.get(req, &rooted, target, false).await,
            Method::PUT => {
                let span = tracing::info_span!("vfs.put", path = %rooted.relative);
                self.put(req, &rooted, target, body).instrument(span).await
            }
            Method::DELETE => {
                let span = tracing::info_span!("vfs.delete", path = %rooted.relative, recursive = req.recursive);
                self.delete(req, &rooted, target).instrument(span).await
            }
            _ => Ok(VfsResponse::method_not_allowed()),
        }
    }

    fn redirect(&self, req: &VfsRequest, with_slash: bool) -> VfsResponse {
        let mut location = self.resolver.base_url(req.host());
        if with_slash {
            location.push_str(&req.uri_path);
            location.push('/');
        } else {
            location.push_str(req.uri_path.trim_end_matches('/'));
        }
        if let Some(query) = &req.query {
            location.push('?');
            location.push_str(query);
        }
        VfsResponse::redirect(&location)
    }

    // ========================================================================
    // GET / HEAD
    // ========================================================================

    async fn get(
        &self,
        req: &VfsRequest,
        rooted: &RootedPath,
        target: Target,
        with_body: bool,
    ) -> VfsResult<VfsResponse> {
        match target {
            Target::Missing => Ok(VfsResponse::failure(&VfsError::not_found(&rooted.relative))),
            Target::Directory if !rooted.directory_request => Ok(self.redirect(req, true)),
            Target::Directory => {
                let base = self.resolver.base_url(req.host());
                let entries = list_directory(&self.resolver, self.media, rooted, &base).await?;
                tracing::debug!(path = %rooted.relative, entries = entries.len(), "listed directory");
                let resp = VfsResponse::new(StatusCode::OK)
                    .with_header(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref());
                Ok(if with_body {
                    resp.with_body(VfsBody::Listing(entries))
                } else {
                    resp
                })
            }
            Target::File(_) if rooted.directory_request => Ok(self.redirect(req, false)),
            Target::File(meta) => self.get_file(req, rooted, &meta, with_body).await,
        }
    }

    async fn get_file(
        &self,
        req: &VfsRequest,
        rooted: &RootedPath,
        meta: &Metadata,
        with_body: bool,
    ) -> VfsResult<VfsResponse> {
        let modified = modified(meta);
        let tag = EntityTag::from_modified(modified);

        if etag::is_if_none_match_request(&req.headers, &tag) {
            return Ok(VfsResponse::new(StatusCode::NOT_MODIFIED)
                .with_etag(&tag)
                .with_last_modified(modified));
        }

        let len = meta.len();
        let mut resp = VfsResponse::new(StatusCode::OK)
            .with_etag(&tag)
            .with_last_modified(modified)
            .with_header(
                CONTENT_TYPE,
                self.media.media_type_for_path(&rooted.local).as_ref(),
            )
            .with_header(ACCEPT_RANGES, "bytes");

        let mut start = 0;
        let mut count = len;

        if etag::is_range_request(&req.headers, &tag) {
            let range = req
                .headers
                .get(RANGE)
                .and_then(|v| v.to_str().ok())
                .map(|v| ByteRange::parse(v, len))
                .unwrap_or(ByteRange::Ignored);

            match range {
                ByteRange::Satisfiable { start: s, end } => {
                    start = s;
                    count = end - s + 1;
                    resp.status = StatusCode::PARTIAL_CONTENT;
                    resp = resp.with_header(CONTENT_RANGE, &format!("bytes {s}-{end}/{len}"));
                }
                ByteRange::Unsatisfiable => {
                    return Ok(VfsResponse::new(StatusCode::RANGE_NOT_SATISFIABLE)
                        .with_etag(&tag)
                        .with_header(CONTENT_RANGE, &format!("bytes */{len}")));
                }
                ByteRange::Ignored => {}
            }
        }

        resp = resp.with_header(CONTENT_LENGTH, &count.to_string());
        if !with_body {
            return Ok(resp);
        }

        let mut file = match fs::File::open(&rooted.local).await {
            Ok(file) => file,
            Err(e) => {
                let err = VfsError::at(&rooted.local, e);
                return match err.kind() {
                    FailureKind::Internal => Err(err),
                    _ => Ok(VfsResponse::failure(&err)),
                };
            }
        };
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        tracing::debug!(path = %rooted.relative, start, len = count, "streaming file");
        Ok(resp.with_body(VfsBody::File(FileStream {
            reader: file.take(count),
            len: count,
            chunk_size: self.buffer_size,
        })))
    }

    // ========================================================================
    // PUT
    // ========================================================================

    async fn put<B>(
        &self,
        req: &VfsRequest,
        rooted: &RootedPath,
        target: Target,
        body: B,
    ) -> VfsResult<VfsResponse>
    where
        B: AsyncRead + Unpin + Send,
    {
        let existing = match target {
            Target::Directory => {
                return Ok(VfsResponse::message(
                    StatusCode::CONFLICT,
                    format!("directory '{}' already exists", rooted.relative),
                ));
            }
            Target::Missing if rooted.directory_request => {
                return Ok(self.create_directory(rooted).await);
            }
            Target::Missing => None,
            Target::File(meta) => Some(meta),
        };

        if let Some(meta) = &existing {
            let current = EntityTag::from_modified(modified(meta));
            match etag::if_match(&req.headers) {
                None => {
                    return Ok(VfsResponse::message(
                        StatusCode::PRECONDITION_FAILED,
                        "updating an existing file requires an If-Match header",
                    )
                    .with_etag(&current));
                }
                Some(tags) if !tags.matches(&current) => {
                    return Ok(VfsResponse::message(
                        StatusCode::PRECONDITION_FAILED,
                        "If-Match does not match the current ETag",
                    )
                    .with_etag(&current));
                }
                Some(_) => {}
            }
        }

        let mut file = match self.fs.open_exclusive_write(&rooted.local).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %rooted.relative, error = %e, "cannot open for write");
                return Ok(VfsResponse::message(StatusCode::CONFLICT, e.to_string()));
            }
        };

        let written = copy_body(body, &mut file, &req.cancel, self.buffer_size).await;
        drop(file);

        let written = match written {
            Ok(n) => n,
            Err(e) => {
                // The partially written file stays in place.
                tracing::warn!(path = %rooted.relative, error = %e, "upload aborted");
                return Ok(VfsResponse::message(StatusCode::CONFLICT, e.to_string()));
            }
        };

        let meta = fs::metadata(&rooted.local)
            .await
            .map_err(|e| VfsError::at(&rooted.local, e))?;
        let modified = modified(&meta);
        let status = if existing.is_some() {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };

        tracing::info!(path = %rooted.relative, bytes = written, status = status.as_u16(), "file written");
        Ok(VfsResponse::new(status)
            .with_etag(&EntityTag::from_modified(modified))
            .with_last_modified(modified))
    }

    async fn create_directory(&self, rooted: &RootedPath) -> VfsResponse {
        match self.fs.ensure_directory(&rooted.local).await {
            Ok(()) => {
                tracing::info!(path = %rooted.relative, "directory created");
                VfsResponse::new(StatusCode::CREATED)
            }
            Err(e) => {
                tracing::warn!(path = %rooted.relative, error = %e, "directory create failed");
                VfsResponse::message(StatusCode::CONFLICT, e.to_string())
            }
        }
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    async fn delete(
        &self,
        req: &VfsRequest,
        rooted: &RootedPath,
        target: Target,
    ) -> VfsResult<VfsResponse> {
        match target {
            Target::Missing => Ok(VfsResponse::failure(&VfsError::not_found(&rooted.relative))),
            Target::Directory if rooted.is_root() => Ok(VfsResponse::message(
                StatusCode::CONFLICT,
                "the root directory cannot be deleted",
            )),
            Target::Directory => {
                let result = if req.recursive {
                    self.fs.safe_delete(&rooted.local, false).await
                } else {
                    fs::remove_dir(&rooted.local)
                        .await
                        .map_err(|e| VfsError::at(&rooted.local, e))
                };
                Ok(match result {
                    Ok(()) => {
                        tracing::info!(path = %rooted.relative, "directory deleted");
                        VfsResponse::new(StatusCode::OK)
                    }
                    Err(e) if e.kind() == FailureKind::NotFound => VfsResponse::failure(&e),
                    Err(e) => {
                        tracing::warn!(path = %rooted.relative, error = %e, "directory delete failed");
                        VfsResponse::message(StatusCode::CONFLICT, e.to_string())
                    }
                })
            }
            Target::File(_) if rooted.directory_request => Ok(self.redirect(req, false)),
            Target::File(meta) => {
                let current = EntityTag::from_modified(modified(&meta));
                match etag::if_match(&req.headers) {
                    None => {
                        return Ok(VfsResponse::message(
                            StatusCode::PRECONDITION_FAILED,
                            "deleting a file requires an If-Match header",
                        ));
                    }
                    Some(tags) if !tags.matches(&current) => {
                        return Ok(VfsResponse::message(
                            StatusCode::CONFLICT,
                            "If-Match does not match the current ETag",
                        )
                        .with_etag(&current));
                    }
                    Some(_) => {}
                }

                Ok(match fs::remove_file(&rooted.local).await {
                    Ok(()) => {
                        tracing::info!(path = %rooted.relative, "file deleted");
                        VfsResponse::new(StatusCode::OK)
                    }
                    Err(e) => VfsResponse::message(
                        StatusCode::NOT_FOUND,
                        VfsError::at(&rooted.local, e).to_string(),
                    ),
                })
            }
        }
    }
}

/// Pump `body` into `file` through a fixed buffer until EOF or cancellation.
async fn copy_body<B>(
    mut body: B,
    file: &mut fs::File,
    cancel: &CancellationToken,
    buffer_size: usize,
) -> VfsResult<u64>
where
    B: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VfsError::Cancelled),
            read = body.read(&mut buf) => read?,
        };
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    file.flush().await?;
    Ok(total)
}
