//! Request path → local path resolution.
//!
//! The resolver owns the configured root, the route prefix the gateway is
//! mounted under, and the optional public base URL used when rebuilding
//! absolute links. Resolution is purely lexical: `..` segments are applied
//! against the segments already seen and rejected once they would climb
//! above the root.

use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::error::{VfsError, VfsResult};

/// Characters escaped inside a single URL path segment.
///
/// `#` is always escaped so a file name can never start a fragment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// A request target resolved against the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootedPath {
    /// Normalized relative path, `/`-separated, no leading or trailing slash.
    /// Empty for the root itself.
    pub relative: String,
    /// Absolute local path.
    pub local: PathBuf,
    /// Whether the original request URI ended in `/`.
    pub directory_request: bool,
}

impl RootedPath {
    /// Returns true if this is the root directory itself.
    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }
}

/// Maps route-captured paths onto a configured root directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    prefix: String,
    public_url: Option<String>,
}

impl PathResolver {
    /// Create a resolver for `root`, mounted under `prefix`.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`). A root that does not exist yet
    /// is kept as given.
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            prefix: normalize_prefix(prefix),
            public_url: None,
        }
    }

    /// Rebuild absolute URLs from this base instead of the request's `Host`.
    ///
    /// Used when the gateway sits behind a proxy that rewrites the host.
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.public_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Route prefix, always starting with `/` and never ending with one
    /// (empty when mounted at the site root).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve a route-captured path.
    ///
    /// `uri_path` is the path of the original request URI; only its
    /// trailing separator matters here.
    pub fn resolve(&self, captured: &str, uri_path: &str) -> VfsResult<RootedPath> {
        let mut segments: Vec<&str> = Vec::new();

        for segment in captured.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(VfsError::path_escapes_root(captured));
                    }
                }
                s if s.contains('\0') || s.contains('\\') => {
                    return Err(VfsError::invalid_path(captured));
                }
                s => segments.push(s),
            }
        }

        let local = segments
            .iter()
            .fold(self.root.clone(), |acc, s| acc.join(s));

        debug_assert!(local.starts_with(&self.root));

        Ok(RootedPath {
            relative: segments.join("/"),
            local,
            directory_request: uri_path.ends_with('/'),
        })
    }

    /// Scheme and authority used for absolute links.
    ///
    /// The configured public URL wins; otherwise the request's `Host` header
    /// is used. Without either, links are emitted host-relative.
    pub fn base_url(&self, host: Option<&str>) -> String {
        match (&self.public_url, host) {
            (Some(url), _) => url.clone(),
            (None, Some(host)) => format!("http://{host}"),
            (None, None) => String::new(),
        }
    }

    /// Absolute href for a relative path under the root.
    pub fn href(&self, base_url: &str, relative: &str, is_dir: bool) -> String {
        let mut href = format!("{base_url}{}/", self.prefix);
        let mut first = true;
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if !first {
                href.push('/');
            }
            href.extend(utf8_percent_encode(segment, SEGMENT));
            first = false;
        }
        if is_dir && !first {
            href.push('/');
        }
        href
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver() -> (PathResolver, TempDir) {
        let dir = TempDir::new().unwrap();
        (PathResolver::new(dir.path(), "/vfs/"), dir)
    }

    #[test]
    fn test_empty_path_is_root() {
        let (resolver, _dir) = resolver();
        let rooted = resolver.resolve("", "/vfs/").unwrap();
        assert!(rooted.is_root());
        assert_eq!(rooted.local, resolver.root());
        assert!(rooted.directory_request);

        let rooted = resolver.resolve("", "/vfs").unwrap();
        assert!(!rooted.directory_request);
    }

    #[test]
    fn test_nested_path() {
        let (resolver, _dir) = resolver();
        let rooted = resolver.resolve("a/./b//c.txt", "/vfs/a/./b//c.txt").unwrap();
        assert_eq!(rooted.relative, "a/b/c.txt");
        assert_eq!(rooted.local, resolver.root().join("a").join("b").join("c.txt"));
        assert!(!rooted.directory_request);
    }

    #[test]
    fn test_parent_segments_inside_root() {
        let (resolver, _dir) = resolver();
        let rooted = resolver.resolve("a/b/../c/", "/vfs/a/b/../c/").unwrap();
        assert_eq!(rooted.relative, "a/c");
        assert!(rooted.directory_request);
    }

    #[test]
    fn test_path_escape_blocked() {
        let (resolver, _dir) = resolver();
        for attempt in ["..", "../etc/passwd", "a/../../b", "a/b/../../../c"] {
            let err = resolver.resolve(attempt, "/vfs/x").unwrap_err();
            assert!(matches!(err, VfsError::PathEscapesRoot(_)), "{attempt}");
        }
    }

    #[test]
    fn test_resolved_paths_stay_under_root() {
        let (resolver, _dir) = resolver();
        for p in ["", "a", "a/b/c", "./x", "a/../b", "deep/./er/../est/"] {
            let rooted = resolver.resolve(p, p).unwrap();
            assert!(rooted.local.starts_with(resolver.root()), "{p}");
        }
    }

    #[test]
    fn test_backslash_and_nul_rejected() {
        let (resolver, _dir) = resolver();
        assert!(matches!(
            resolver.resolve("a\\..\\..\\b", "/vfs/"),
            Err(VfsError::InvalidPath(_))
        ));
        assert!(matches!(
            resolver.resolve("a\0b", "/vfs/"),
            Err(VfsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_prefix_normalization() {
        let dir = TempDir::new().unwrap();
        assert_eq!(PathResolver::new(dir.path(), "vfs").prefix(), "/vfs");
        assert_eq!(PathResolver::new(dir.path(), "/api/vfs/").prefix(), "/api/vfs");
        assert_eq!(PathResolver::new(dir.path(), "/").prefix(), "");
    }

    #[test]
    fn test_base_url() {
        let (resolver, _dir) = resolver();
        assert_eq!(resolver.base_url(Some("host:8080")), "http://host:8080");
        assert_eq!(resolver.base_url(None), "");

        let resolver = resolver.with_public_url("https://gateway.example.com/");
        assert_eq!(
            resolver.base_url(Some("internal:8080")),
            "https://gateway.example.com"
        );
    }

    #[test]
    fn test_href_escaping() {
        let (resolver, _dir) = resolver();
        let base = "http://h";
        assert_eq!(resolver.href(base, "", true), "http://h/vfs/");
        assert_eq!(resolver.href(base, "docs", true), "http://h/vfs/docs/");
        assert_eq!(
            resolver.href(base, "docs/my file#1.txt", false),
            "http://h/vfs/docs/my%20file%231.txt"
        );
        assert_eq!(
            resolver.href(base, "100%/ü.txt", false),
            "http://h/vfs/100%25/%C3%BC.txt"
        );
    }
}
