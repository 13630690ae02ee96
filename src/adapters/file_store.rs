//! File-backed [`StoragePort`]: one file per key under a root directory.
//!
//! Layout: `<root>/<namespace>/<key>`. Writes go to `<key>.tmp` first and
//! are renamed over the target, so a power cut leaves either the old
//! record or the new one. On ESP-IDF the root is a mounted SPIFFS or
//! LittleFS path reached through the VFS layer; on hosts any directory.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::app::ports::{StorageError, StoragePort};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace: &str, key: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_segment(namespace) || !is_safe_segment(key) {
            warn!("FileStore: rejected path segment {}::{}", namespace, key);
            return Err(StorageError::IoError);
        }
        Ok(self.root.join(namespace).join(key))
    }
}

/// Keys must stay inside their namespace directory.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

fn map_io(e: &io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound,
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => StorageError::Full,
        _ => StorageError::IoError,
    }
}

impl StoragePort for FileStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let path = self.path_for(namespace, key)?;
        let mut file = fs::File::open(&path).map_err(|e| map_io(&e))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(map_io(&e)),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(namespace, key)?;
        let tmp = path.with_extension("tmp");

        let result = (|| -> io::Result<()> {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, &path)
        })();

        match result {
            Ok(()) => {
                debug!("FileStore: wrote {} ({} bytes)", path.display(), data.len());
                Ok(())
            }
            Err(e) => {
                warn!("FileStore: write {} failed: {}", path.display(), e);
                let _ = fs::remove_file(&tmp);
                Err(map_io(&e))
            }
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(namespace, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(&e)),
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.path_for(namespace, key)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }
}
