//! The persistent configuration store.
//!
//! The configuration lives in a fixed byte region with the following layout:
//!
//! ```text
//! offset 0               identifier (null-terminated)
//! offset len(id) + 1     secret (null-terminated)
//! offset 256             notification URL (null-terminated)
//! offset 510             sentinel b"LW"
//! ```
//!
//! Strings are written byte by byte followed by a zero terminator. Writes land
//! in the storage working copy and only survive a power cycle once
//! [`ConfigStore::commit`] has been called.

use alloc::format;
use alloc::string::String;

use core::fmt;

use log::{info, warn};

use crate::error::{Error, ErrorKind, Result};

/// Size of the persistent region in bytes.
pub const CONFIG_REGION_SIZE: usize = 512;

/// Offset of the credentials field.
pub const CREDENTIALS_OFFSET: usize = 0;

/// Offset of the notification `URL` field.
pub const NOTIFY_URL_OFFSET: usize = 256;

const SENTINEL: [u8; 2] = *b"LW";

/// Offset of the sentinel marking a formatted region.
pub const SENTINEL_OFFSET: usize = CONFIG_REGION_SIZE - SENTINEL.len();

/// Maximum combined length of identifier and secret.
pub const MAX_CREDENTIALS_LEN: usize = NOTIFY_URL_OFFSET - CREDENTIALS_OFFSET - 2;

/// Maximum length of the notification `URL`.
pub const MAX_NOTIFY_URL_LEN: usize = SENTINEL_OFFSET - NOTIFY_URL_OFFSET - 1;

/// The raw persistent region.
pub type Region = [u8; CONFIG_REGION_SIZE];

/// A byte region that survives power loss.
///
/// Implementations keep a working copy of the region in memory. Reads and
/// writes only touch the working copy; [`Storage::commit`] persists it.
pub trait Storage {
    /// Returns the working copy of the region.
    fn region(&self) -> &Region;

    /// Returns the mutable working copy of the region.
    fn region_mut(&mut self) -> &mut Region;

    /// Durably persists the working copy.
    ///
    /// # Errors
    ///
    /// The underlying medium could not be written.
    fn commit(&mut self) -> Result<()>;
}

/// A [`Storage`] kept in memory.
///
/// The persisted copy is only updated on commit, so a power cycle can be
/// simulated with [`MemoryStorage::power_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStorage {
    region: Region,
    persisted: Region,
    commits: usize,
}

impl MemoryStorage {
    /// Creates a [`MemoryStorage`] with every byte erased to `0xFF`, as a
    /// never-written flash sector reads.
    #[must_use]
    pub const fn erased() -> Self {
        Self::from_region([0xFF; CONFIG_REGION_SIZE])
    }

    /// Creates a [`MemoryStorage`] from existing region content.
    #[must_use]
    pub const fn from_region(region: Region) -> Self {
        Self {
            region,
            persisted: region,
            commits: 0,
        }
    }

    /// Drops every uncommitted write, as a power loss would.
    pub fn power_cycle(&mut self) {
        self.region = self.persisted;
    }

    /// Returns the number of commits performed.
    #[must_use]
    pub const fn commits(&self) -> usize {
        self.commits
    }

    /// Returns the persisted copy of the region.
    #[must_use]
    pub const fn persisted(&self) -> &Region {
        &self.persisted
    }
}

impl Storage for MemoryStorage {
    fn region(&self) -> &Region {
        &self.region
    }

    fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }

    fn commit(&mut self) -> Result<()> {
        self.persisted = self.region;
        self.commits += 1;
        Ok(())
    }
}

/// The configuration persisted by a node.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PersistedConfig {
    /// Network identifier.
    pub identifier: String,
    /// Network secret.
    pub secret: String,
    /// Notification `URL`. Empty when notifications are disabled.
    pub notify_url: String,
}

impl fmt::Debug for PersistedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedConfig")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .field("notify_url", &self.notify_url)
            .finish()
    }
}

/// Null-terminated string slots over a [`Storage`] region.
pub struct ConfigStore<S: Storage> {
    storage: S,
}

impl<S: Storage> ConfigStore<S> {
    /// Opens a [`ConfigStore`].
    ///
    /// A region without the sentinel has never been written by a node, so
    /// its content is discarded: the region is zeroed, marked and committed.
    ///
    /// # Errors
    ///
    /// Formatting a new region failed to commit.
    pub fn open(storage: S) -> Result<Self> {
        let mut store = Self { storage };
        if !store.is_formatted() {
            warn!("Configuration region has no sentinel, formatting it");
            store.format()?;
        }
        Ok(store)
    }

    /// Checks whether the region carries the sentinel.
    #[must_use]
    pub fn is_formatted(&self) -> bool {
        self.storage.region()[SENTINEL_OFFSET..] == SENTINEL
    }

    /// Zeroes the whole region, writes the sentinel and commits.
    ///
    /// # Errors
    ///
    /// The commit failed.
    pub fn format(&mut self) -> Result<()> {
        let region = self.storage.region_mut();
        region.fill(0);
        region[SENTINEL_OFFSET..].copy_from_slice(&SENTINEL);
        self.commit()
    }

    /// Writes `value` followed by a zero terminator at `offset`.
    ///
    /// The caller is responsible for not overlapping adjacent fields. The
    /// write is rejected, leaving the region untouched, if the value contains
    /// a zero byte or if it would reach the sentinel.
    ///
    /// # Errors
    ///
    /// - The value contains a zero byte
    /// - The value does not fit before the sentinel
    pub fn write_string(&mut self, offset: usize, value: &str) -> Result<()> {
        if value.as_bytes().contains(&0) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Stored strings cannot contain zero bytes",
            ));
        }

        let end = offset.saturating_add(value.len());
        if end >= SENTINEL_OFFSET {
            return Err(Error::new(
                ErrorKind::Capacity,
                format!(
                    "Writing {} bytes at offset {offset} exceeds the configuration region",
                    value.len() + 1
                ),
            ));
        }

        let region = self.storage.region_mut();
        region[offset..end].copy_from_slice(value.as_bytes());
        region[end] = 0;
        Ok(())
    }

    /// Reads the string starting at `offset` up to its zero terminator.
    ///
    /// Reading stops at the sentinel when no terminator is found.
    #[must_use]
    pub fn read_string(&self, offset: usize) -> String {
        let Some(bytes) = self.storage.region().get(offset..SENTINEL_OFFSET) else {
            return String::new();
        };
        let len = terminator_position(bytes);
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    }

    /// Durably persists all pending writes.
    ///
    /// # Errors
    ///
    /// The underlying storage failed to persist the region.
    pub fn commit(&mut self) -> Result<()> {
        self.storage.commit()
    }

    /// Reads the whole [`PersistedConfig`].
    #[must_use]
    pub fn load(&self) -> PersistedConfig {
        let credentials = &self.storage.region()[CREDENTIALS_OFFSET..NOTIFY_URL_OFFSET];
        let secret_offset = CREDENTIALS_OFFSET + terminator_position(credentials) + 1;

        PersistedConfig {
            identifier: self.read_string(CREDENTIALS_OFFSET),
            secret: if secret_offset < NOTIFY_URL_OFFSET {
                self.read_string(secret_offset)
            } else {
                String::new()
            },
            notify_url: self.read_string(NOTIFY_URL_OFFSET),
        }
    }

    /// Replaces the credentials pair and commits it.
    ///
    /// # Errors
    ///
    /// - The identifier or the secret is empty
    /// - The pair does not fit in the credentials field
    /// - The commit failed
    pub fn set_credentials(&mut self, identifier: &str, secret: &str) -> Result<()> {
        if identifier.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "The identifier must not be empty",
            ));
        }

        if secret.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "The secret must not be empty",
            ));
        }

        if identifier.len() + secret.len() > MAX_CREDENTIALS_LEN {
            return Err(Error::new(
                ErrorKind::Capacity,
                format!("Credentials longer than {MAX_CREDENTIALS_LEN} bytes cannot be stored"),
            ));
        }

        if identifier.as_bytes().contains(&0) || secret.as_bytes().contains(&0) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Credentials cannot contain zero bytes",
            ));
        }

        self.update(|store| {
            store.storage.region_mut()[CREDENTIALS_OFFSET..NOTIFY_URL_OFFSET].fill(0);
            store.write_string(CREDENTIALS_OFFSET, identifier)?;
            store.write_string(CREDENTIALS_OFFSET + identifier.len() + 1, secret)
        })?;

        info!("Credentials for `{identifier}` stored");
        Ok(())
    }

    /// Replaces the notification `URL` and commits it.
    ///
    /// An empty `URL` disables notifications.
    ///
    /// # Errors
    ///
    /// - The `URL` is longer than [`MAX_NOTIFY_URL_LEN`]
    /// - The `URL` contains a zero byte
    /// - The commit failed
    pub fn set_notify_url(&mut self, url: &str) -> Result<()> {
        if url.len() > MAX_NOTIFY_URL_LEN {
            return Err(Error::new(
                ErrorKind::Capacity,
                format!("Notification URLs longer than {MAX_NOTIFY_URL_LEN} bytes cannot be stored"),
            ));
        }

        if url.as_bytes().contains(&0) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Notification URLs cannot contain zero bytes",
            ));
        }

        self.update(|store| {
            store.storage.region_mut()[NOTIFY_URL_OFFSET..SENTINEL_OFFSET].fill(0);
            store.write_string(NOTIFY_URL_OFFSET, url)
        })?;

        info!("Notification URL set to `{url}`");
        Ok(())
    }

    // Applies `write` and commits. On failure the working copy goes back to
    // its previous content, so no rejected value is persisted by a later
    // commit.
    fn update(&mut self, write: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let previous = *self.storage.region();
        let result = write(self).and_then(|()| self.commit());
        if result.is_err() {
            *self.storage.region_mut() = previous;
        }
        result
    }

    /// Returns the underlying [`Storage`].
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the mutable underlying [`Storage`].
    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

#[inline]
fn terminator_position(bytes: &[u8]) -> usize {
    bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len())
}
