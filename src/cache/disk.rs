//! Disk tier: one PNG file per cache key.
//!
//! File names are the lowercase hex SHA-256 of the key, so any key string maps
//! to a safe, fixed-length name, and a process restarted against the same root
//! finds the entries of earlier runs.
//!
//! ```text
//! <root>/
//!   3f9a...e1.png      <- sha256("tile:0:1:2:<image id>")
//!   b27c...40.png      <- sha256("thumbnail:photo.jpg")
//! ```
//!
//! Every method here performs blocking filesystem I/O. Async callers run them
//! on the blocking thread pool.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use super::codec::{decode_png, encode_png};
use super::CacheKey;
use crate::error::{CacheError, ConfigError};

const ENTRY_EXTENSION: &str = "png";

/// Hex length of a SHA-256 digest
const ENTRY_STEM_LEN: usize = 64;

/// Persistent image store rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    /// Open (creating if needed) the directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CacheRoot`] if the directory cannot be created
    /// or a file cannot be written inside it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let unusable = |message: String| ConfigError::CacheRoot {
            path: root.clone(),
            message,
        };

        fs::create_dir_all(&root).map_err(|e| unusable(e.to_string()))?;

        // Probe writability; the temp file is removed on drop
        let mut probe = NamedTempFile::new_in(&root).map_err(|e| unusable(e.to_string()))?;
        probe
            .write_all(b"probe")
            .map_err(|e| unusable(e.to_string()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.root
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    /// Read and decode the image stored for `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored.
    ///
    /// # Errors
    ///
    /// [`CacheError::Io`] if the file exists but cannot be read, and
    /// [`CacheError::Decode`] if its contents are not a valid image.
    pub fn read(&self, key: &CacheKey) -> Result<Option<image::DynamicImage>, CacheError> {
        let data = match fs::read(self.path_for(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_png(&data).map(Some)
    }

    /// Encode and store `image` under `key`, replacing any previous entry.
    ///
    /// The data is written to a temporary file in the same directory and
    /// renamed into place, so readers never observe a partially written entry.
    pub fn write(&self, key: &CacheKey, image: &image::DynamicImage) -> Result<(), CacheError> {
        let data = encode_png(image)?;
        let path = self.path_for(key);

        let mut file = NamedTempFile::new_in(&self.root)?;
        file.write_all(&data)?;
        file.persist(&path).map_err(|e| CacheError::Io(e.error.to_string()))?;

        debug!(key = %key, path = %path.display(), bytes = data.len(), "Wrote disk cache entry");
        Ok(())
    }

    /// Delete the entry for `key`. Returns `true` if a file was removed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of entries on disk.
    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entry_paths()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Delete every entry. Files in the root that are not cache entries are
    /// left alone. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_paths()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                // Removed concurrently
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if is_entry_path(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// `true` for `<64 hex chars>.png`.
fn is_entry_path(path: &Path) -> bool {
    let extension_matches = path
        .extension()
        .is_some_and(|ext| ext == ENTRY_EXTENSION);
    let stem_matches = path.file_stem().and_then(|s| s.to_str()).is_some_and(|stem| {
        stem.len() == ENTRY_STEM_LEN && stem.bytes().all(|b| b.is_ascii_hexdigit())
    });
    extension_matches && stem_matches && path.is_file()
}
