//! Rooted virtual filesystem served over HTTP verbs.
//!
//! This crate holds everything protocol-shaped but framework-free: the path
//! resolver that pins requests under a root, the hardened filesystem
//! primitives, media type resolution, strong validators, and the handler
//! that turns a [`VfsRequest`] into a [`VfsResponse`]. The HTTP server
//! crate adapts these to its router.
//!
//! # Example
//!
//! ```no_run
//! use hostgate_vfs::{PathResolver, SafeFs, VfsHandler, VfsRequest};
//! use http::Method;
//!
//! # async fn example() -> hostgate_vfs::VfsResult<()> {
//! let handler = VfsHandler::new(PathResolver::new("/srv/share", "/vfs"), SafeFs::default());
//! let req = VfsRequest::new(Method::GET, "docs/readme.md", "/vfs/docs/readme.md");
//! let resp = handler.handle(&req, tokio::io::empty()).await?;
//! println!("{}", resp.status);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod etag;
pub mod handler;
pub mod listing;
pub mod media;
pub mod path;
pub mod response;
pub mod safe_fs;

pub use error::{FailureKind, VfsError, VfsResult};
pub use etag::{ByteRange, EntityTag, TagList};
pub use handler::{DEFAULT_BUFFER_SIZE, VfsHandler, VfsRequest};
pub use listing::{DirectoryEntry, list_directory};
pub use media::{DIRECTORY_MEDIA_TYPE, MediaTypeMap};
pub use path::{PathResolver, RootedPath};
pub use response::{FileStream, VfsBody, VfsResponse, status_for};
pub use safe_fs::{DEFAULT_DELETE_ATTEMPTS, DEFAULT_DELETE_RETRY_DELAY, RetryPolicy, SafeFs};
