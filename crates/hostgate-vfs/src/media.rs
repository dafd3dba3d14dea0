//! Extension → media type resolution.
//!
//! Lookups go through a process-wide cache that is filled on first use of
//! each extension. The cache only ever grows, and two requests racing to
//! fill the same extension compute the same value, so a lost insert is
//! harmless.

use std::path::Path;
use std::sync::LazyLock;

use dashmap::DashMap;
use mime::Mime;

/// Pseudo media type reported for directory entries.
pub const DIRECTORY_MEDIA_TYPE: &str = "inode/directory";

/// Resolves file extensions to media types, caching every answer.
#[derive(Debug, Default)]
pub struct MediaTypeMap {
    cache: DashMap<String, Mime>,
}

impl MediaTypeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-lifetime instance.
    pub fn global() -> &'static MediaTypeMap {
        static GLOBAL: LazyLock<MediaTypeMap> = LazyLock::new(MediaTypeMap::new);
        &GLOBAL
    }

    /// Media type for an extension, with or without the leading dot.
    ///
    /// Matching is case-insensitive. Unknown extensions resolve to
    /// `application/octet-stream`, and that fallback is cached too.
    pub fn media_type(&self, extension: &str) -> Mime {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();

        if let Some(hit) = self.cache.get(&key) {
            return hit.value().clone();
        }

        let resolved = if key.is_empty() {
            mime::APPLICATION_OCTET_STREAM
        } else {
            mime_guess::from_ext(&key).first_or_octet_stream()
        };

        self.cache
            .entry(key)
            .or_insert_with(|| resolved.clone())
            .value()
            .clone()
    }

    /// Media type for a path, using its final extension.
    pub fn media_type_for_path(&self, path: &Path) -> Mime {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.media_type(&ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_known_extensions() {
        let map = MediaTypeMap::new();
        assert_eq!(map.media_type("txt").essence_str(), "text/plain");
        assert_eq!(map.media_type(".json").essence_str(), "application/json");
        assert_eq!(map.media_type("PNG").essence_str(), "image/png");
    }

    #[test]
    fn test_unknown_falls_back_and_is_cached() {
        let map = MediaTypeMap::new();
        assert_eq!(
            map.media_type("definitely-not-an-extension"),
            mime::APPLICATION_OCTET_STREAM
        );
        assert_eq!(map.media_type(""), mime::APPLICATION_OCTET_STREAM);
        assert_eq!(map.cache.len(), 2);
    }

    #[test]
    fn test_case_insensitive_key() {
        let map = MediaTypeMap::new();
        map.media_type("HTML");
        map.media_type("html");
        map.media_type(".Html");
        assert_eq!(map.cache.len(), 1);
    }

    #[test]
    fn test_path_lookup() {
        let map = MediaTypeMap::new();
        assert_eq!(
            map.media_type_for_path(Path::new("/srv/site/index.html")).essence_str(),
            "text/html"
        );
        assert_eq!(
            map.media_type_for_path(Path::new("/srv/Makefile")),
            mime::APPLICATION_OCTET_STREAM
        );
    }

    #[test]
    fn test_concurrent_fill() {
        let map = Arc::new(MediaTypeMap::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for ext in ["txt", "css", "js", "bin", "zzz"] {
                        map.media_type(ext);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.cache.len(), 5);
        assert_eq!(map.media_type("css").essence_str(), "text/css");
    }
}
