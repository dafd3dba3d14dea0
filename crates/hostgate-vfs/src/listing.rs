//! Directory listing records.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{VfsError, VfsResult};
use crate::media::{DIRECTORY_MEDIA_TYPE, MediaTypeMap};
use crate::path::{PathResolver, RootedPath};

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Size in bytes; 0 for directories.
    pub size: u64,
    /// Last modification time.
    pub mtime: DateTime<Utc>,
    /// Creation time, or the modification time where the platform has none.
    pub crtime: DateTime<Utc>,
    /// Resolved media type, or `inode/directory`.
    pub mime: String,
    /// Absolute, percent-encoded URL of the entry.
    pub href: String,
    /// Absolute local path.
    pub path: String,
}

/// List the immediate children of `dir`, sorted by name.
///
/// Entries whose metadata cannot be read (e.g. dangling symlinks) are
/// skipped.
pub async fn list_directory(
    resolver: &PathResolver,
    media: &MediaTypeMap,
    dir: &RootedPath,
    base_url: &str,
) -> VfsResult<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    let mut reader = fs::read_dir(&dir.local)
        .await
        .map_err(|e| VfsError::at(&dir.local, e))?;

    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| VfsError::at(&dir.local, e))?
    {
        let local = entry.path();
        let meta = match fs::metadata(&local).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!(path = %local.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if dir.relative.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", dir.relative, name)
        };
        let is_dir = meta.is_dir();
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        entries.push(DirectoryEntry {
            size: if is_dir { 0 } else { meta.len() },
            mtime: mtime.into(),
            crtime: meta.created().unwrap_or(mtime).into(),
            mime: if is_dir {
                DIRECTORY_MEDIA_TYPE.to_string()
            } else {
                media.media_type_for_path(Path::new(&name)).to_string()
            },
            href: resolver.href(base_url, &relative, is_dir),
            path: local.display().to_string(),
            name,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_one_level() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "hello").unwrap();
        std::fs::create_dir_all(dir.path().join("a dir/nested")).unwrap();
        std::fs::write(dir.path().join("a dir/nested/deep.txt"), "x").unwrap();

        let resolver = PathResolver::new(dir.path(), "/vfs");
        let rooted = resolver.resolve("", "/vfs/").unwrap();
        let entries = list_directory(&resolver, &MediaTypeMap::new(), &rooted, "http://h")
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a dir");
        assert_eq!(entries[0].mime, DIRECTORY_MEDIA_TYPE);
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[0].href, "http://h/vfs/a%20dir/");

        assert_eq!(entries[1].name, "b.txt");
        assert_eq!(entries[1].size, 5);
        assert_eq!(entries[1].mime, "text/plain");
        assert_eq!(entries[1].href, "http://h/vfs/b.txt");
        assert_eq!(
            entries[1].path,
            resolver.root().join("b.txt").display().to_string()
        );
    }

    #[tokio::test]
    async fn test_nested_hrefs_escape_hash() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/issue#4.md"), "").unwrap();

        let resolver = PathResolver::new(dir.path(), "/vfs");
        let rooted = resolver.resolve("sub", "/vfs/sub/").unwrap();
        let entries = list_directory(&resolver, &MediaTypeMap::new(), &rooted, "")
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].href, "/vfs/sub/issue%234.md");
    }

    #[tokio::test]
    async fn test_serialized_shape() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.json"), "{}").unwrap();

        let resolver = PathResolver::new(dir.path(), "/vfs");
        let rooted = resolver.resolve("", "/vfs/").unwrap();
        let entries = list_directory(&resolver, &MediaTypeMap::new(), &rooted, "http://h")
            .await
            .unwrap();

        let value = serde_json::to_value(&entries).unwrap();
        let obj = value[0].as_object().unwrap();
        for key in ["name", "size", "mtime", "crtime", "mime", "href", "path"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj["mime"], "application/json");
        let mtime = obj["mtime"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(mtime).is_ok());
    }
}
