//! Filesystem layout and public-URL mapping for the media library.
//!
//! Originals live under the storage root permanently; derived variants are
//! written to temporary directories and moved to served storage by an
//! external sync job. URLs are the only addressing stored in the database,
//! so both directions of the mapping live here.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::config::StorageSettings;

/// Public prefix for files sitting in the temporary thumbnail directory.
pub const THUMBNAIL_URL_PREFIX: &str = "/images/screenshots/thumbnails";

/// Public prefix for files sitting in the temporary large-variant directory.
pub const LARGE_URL_PREFIX: &str = "/images/screenshots/large";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("url `{0}` does not map into the storage root")]
    InvalidUrl(String),
    #[error("path `{0}` is outside the storage root")]
    OutsideRoot(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Filesystem-backed media storage rooted at a single directory.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    thumbnail_dir: PathBuf,
    large_dir: PathBuf,
}

impl MediaStorage {
    /// Initialise storage, creating the temporary derived-output directories.
    pub fn new(settings: &StorageSettings) -> Result<Self, std::io::Error> {
        let root = settings.root.clone();
        let thumbnail_dir = root.join(&settings.thumbnail_dir);
        let large_dir = root.join(&settings.large_dir);

        std::fs::create_dir_all(&thumbnail_dir)?;
        std::fs::create_dir_all(&large_dir)?;

        Ok(Self {
            root,
            thumbnail_dir,
            large_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directory receiving thumbnail variants.
    pub fn thumbnail_dir(&self) -> &Path {
        &self.thumbnail_dir
    }

    /// Absolute directory receiving large variants.
    pub fn large_dir(&self) -> &Path {
        &self.large_dir
    }

    /// Map a public URL back to its location on disk.
    ///
    /// The two screenshot prefixes resolve into the temporary directories;
    /// everything else resolves relative to the storage root. Escapes via
    /// absolute paths or parent-dir components are rejected.
    pub fn resolve_url(&self, url: &str) -> Result<PathBuf, StorageError> {
        let trimmed = url.trim_start_matches('/');

        if let Some(file) = strip_url_prefix(url, THUMBNAIL_URL_PREFIX) {
            return Ok(self.thumbnail_dir.join(clean_file_name(url, file)?));
        }
        if let Some(file) = strip_url_prefix(url, LARGE_URL_PREFIX) {
            return Ok(self.large_dir.join(clean_file_name(url, file)?));
        }

        let relative = Path::new(trimmed);
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::InvalidUrl(url.to_string()));
        }

        Ok(self.root.join(relative))
    }

    /// Map an on-disk path to its public URL.
    ///
    /// Files inside the temporary directories are addressed through the
    /// screenshot prefixes; any other file under the root maps by stripping
    /// the root and normalising separators to `/`.
    pub fn public_url(&self, path: &Path) -> Result<String, StorageError> {
        if let Ok(file) = path.strip_prefix(&self.thumbnail_dir) {
            return Ok(format!("{THUMBNAIL_URL_PREFIX}/{}", url_path(file)));
        }
        if let Ok(file) = path.strip_prefix(&self.large_dir) {
            return Ok(format!("{LARGE_URL_PREFIX}/{}", url_path(file)));
        }

        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::OutsideRoot(path.to_path_buf()))?;
        Ok(format!("/{}", url_path(relative)))
    }

    /// Every file currently sitting in the two temporary directories.
    /// Recomputed from a directory listing on each call; nothing is cached.
    pub async fn list_derived(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        for dir in [&self.thumbnail_dir, &self.large_dir] {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }
        }
        Ok(files)
    }

    /// Remove a derived file. Missing files are treated as success.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn strip_url_prefix<'a>(url: &'a str, prefix: &str) -> Option<&'a str> {
    url.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
}

fn clean_file_name<'a>(url: &str, file: &'a str) -> Result<&'a str, StorageError> {
    // Only a parent-dir component escapes; names merely containing dots
    // (like `a..b_thumb.webp`) are legitimate derived-file names.
    if file.is_empty() || file.contains('/') || file == ".." {
        return Err(StorageError::InvalidUrl(url.to_string()));
    }
    Ok(file)
}

fn url_path(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;

    fn storage(root: &Path) -> MediaStorage {
        let settings = StorageSettings {
            root: root.to_path_buf(),
            thumbnail_dir: PathBuf::from("temp/thumbnails"),
            large_dir: PathBuf::from("temp/large"),
        };
        MediaStorage::new(&settings).expect("storage init")
    }

    #[test]
    fn derived_files_map_to_screenshot_urls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());

        let thumb = storage.thumbnail_dir().join("keep_thumb.webp");
        assert_eq!(
            storage.public_url(&thumb).expect("thumb url"),
            "/images/screenshots/thumbnails/keep_thumb.webp"
        );

        let large = storage.large_dir().join("keep_large.jpg");
        assert_eq!(
            storage.public_url(&large).expect("large url"),
            "/images/screenshots/large/keep_large.jpg"
        );
    }

    #[test]
    fn other_files_map_by_stripping_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());

        let original = dir.path().join("uploads/media/originals/keep.png");
        assert_eq!(
            storage.public_url(&original).expect("original url"),
            "/uploads/media/originals/keep.png"
        );
    }

    #[test]
    fn urls_round_trip_back_to_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());

        assert_eq!(
            storage
                .resolve_url("/images/screenshots/thumbnails/keep_thumb.jpg")
                .expect("thumb path"),
            storage.thumbnail_dir().join("keep_thumb.jpg")
        );
        assert_eq!(
            storage
                .resolve_url("/uploads/media/originals/keep.png")
                .expect("original path"),
            dir.path().join("uploads/media/originals/keep.png")
        );
    }

    #[test]
    fn escaping_urls_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());

        assert!(storage.resolve_url("/../etc/passwd").is_err());
        assert!(
            storage
                .resolve_url("/images/screenshots/thumbnails/../../../etc/passwd")
                .is_err()
        );
        assert!(storage.resolve_url("/images/screenshots/thumbnails/..").is_err());
        assert!(storage.resolve_url("/").is_err());
    }

    #[test]
    fn dotted_file_names_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());

        // An upload named `a..b.png` yields derived names with inner dots.
        let path = storage.thumbnail_dir().join("a..b_thumb.webp");
        let url = storage.public_url(&path).expect("url");
        assert_eq!(url, "/images/screenshots/thumbnails/a..b_thumb.webp");
        assert_eq!(storage.resolve_url(&url).expect("path"), path);
    }

    #[tokio::test]
    async fn list_derived_sees_files_in_both_temp_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());

        std::fs::write(storage.thumbnail_dir().join("a_thumb.jpg"), b"x").expect("write");
        std::fs::write(storage.large_dir().join("a_large.jpg"), b"x").expect("write");

        let mut names: Vec<String> = storage
            .list_derived()
            .await
            .expect("listing")
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a_large.jpg", "a_thumb.jpg"]);
    }

    #[tokio::test]
    async fn delete_treats_missing_files_as_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(dir.path());
        let path = storage.thumbnail_dir().join("gone.webp");
        storage.delete(&path).await.expect("delete missing");
    }
}
