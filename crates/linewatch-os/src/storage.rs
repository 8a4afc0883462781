use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use linewatch::error::{Error as NodeError, ErrorKind as NodeErrorKind, Result as NodeResult};
use linewatch::store::{CONFIG_REGION_SIZE, Region, Storage};

use tracing::{info, warn};

use crate::error::{Error, ErrorKind, Result};

// Value of a never-written byte.
const ERASED_BYTE: u8 = 0xFF;

/// A [`Storage`] kept in a file.
///
/// A missing file reads as an erased region. A commit writes the whole region
/// to a temporary file next to the target and renames it over the target, so
/// that an interrupted commit leaves the previous content in place.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    region: Region,
}

impl FileStorage {
    /// Opens the storage file at `path`.
    ///
    /// # Errors
    ///
    /// The file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut region = [ERASED_BYTE; CONFIG_REGION_SIZE];

        match fs::read(&path) {
            Ok(bytes) => {
                if bytes.len() != CONFIG_REGION_SIZE {
                    warn!(
                        "Storage file `{}` holds {} bytes instead of {CONFIG_REGION_SIZE}",
                        path.display(),
                        bytes.len()
                    );
                }
                let len = bytes.len().min(CONFIG_REGION_SIZE);
                region[..len].copy_from_slice(&bytes[..len]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Storage file `{}` not found, starting erased", path.display());
            }
            Err(e) => {
                return Err(Error::new(
                    ErrorKind::Storage,
                    format!("Unable to read `{}`: {e}", path.display()),
                ));
            }
        }

        Ok(Self { path, region })
    }

    /// Returns the storage file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_region(&self) -> std::io::Result<()> {
        let temporary = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temporary)?;
        file.write_all(&self.region)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temporary, &self.path)
    }
}

impl Storage for FileStorage {
    fn region(&self) -> &Region {
        &self.region
    }

    fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }

    fn commit(&mut self) -> NodeResult<()> {
        self.write_region().map_err(|e| {
            NodeError::new(
                NodeErrorKind::Storage,
                format!("Unable to write `{}`: {e}", self.path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use linewatch::store::{CONFIG_REGION_SIZE, ConfigStore, Storage};

    use super::FileStorage;

    #[test]
    fn missing_file_reads_erased() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("node.bin")).unwrap();

        assert!(storage.region().iter().all(|&byte| byte == 0xFF));
        assert!(!storage.path().exists());
    }

    #[test]
    fn commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.bin");

        let mut store = ConfigStore::open(FileStorage::open(&path).unwrap()).unwrap();
        store.set_credentials("home", "secret").unwrap();
        store.set_notify_url("http://example.com/n").unwrap();

        assert_eq!(fs::read(&path).unwrap().len(), CONFIG_REGION_SIZE);
        assert!(!path.with_extension("tmp").exists());

        let store = ConfigStore::open(FileStorage::open(&path).unwrap()).unwrap();
        let config = store.load();
        assert_eq!(config.identifier, "home");
        assert_eq!(config.secret, "secret");
        assert_eq!(config.notify_url, "http://example.com/n");
    }

    #[test]
    fn uncommitted_writes_are_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.bin");

        let mut store = ConfigStore::open(FileStorage::open(&path).unwrap()).unwrap();
        store.write_string(0, "draft").unwrap();

        let store = ConfigStore::open(FileStorage::open(&path).unwrap()).unwrap();
        assert_eq!(store.load().identifier, "");
    }

    #[test]
    fn short_file_is_padded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.bin");
        fs::write(&path, [0u8; 16]).unwrap();

        let storage = FileStorage::open(&path).unwrap();

        assert!(storage.region()[..16].iter().all(|&byte| byte == 0));
        assert!(storage.region()[16..].iter().all(|&byte| byte == 0xFF));
    }
}
