//! Durable history of receiver addresses.
//!
//! Stored as a small JSON document in the config directory, under the
//! `ip_history_list` key. The list is loaded once at start-up and rewritten
//! after every mutation.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use voicesync_core::{AddressHistoryEntry, HistoryStore, MAX_ADDRESS_HISTORY};

/// `prefs.json` is expected to be tiny; larger files are treated as corrupt.
pub const MAX_ADDRESS_BOOK_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
struct PrefsDocument {
    #[serde(default)]
    ip_history_list: Vec<AddressHistoryEntry>,
}

#[derive(Debug, Error)]
pub enum AddressBookError {
    #[error("metadata read failed: {0}")]
    Metadata(#[source] io::Error),
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("parse failed: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("tmp write failed: {0}")]
    WriteTmp(#[source] io::Error),
    #[error("rename failed: {0}")]
    Rename(#[source] io::Error),
    #[error("address book unavailable: {0}")]
    Unavailable(String),
}

/// Config directory: `VOICESYNC_CONFIG_DIR` when set, else the platform config dir.
pub fn config_dir() -> PathBuf {
    let dir = match std::env::var_os("VOICESYNC_CONFIG_DIR") {
        Some(override_dir) => PathBuf::from(override_dir),
        None => dirs::config_dir()
            .map(|base| base.join("VoiceSync"))
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn address_book_path() -> PathBuf {
    config_dir().join("prefs.json")
}

#[derive(Debug)]
pub struct AddressBook {
    path: PathBuf,
    entries: HistoryStore<AddressHistoryEntry>,
}

impl AddressBook {
    /// Load from `path`, starting empty if the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load_from_path(&path) {
            Ok(book) => book,
            Err(AddressBookError::Metadata(err)) if err.kind() == io::ErrorKind::NotFound => {
                Self::empty(path)
            }
            Err(err) => {
                warn!(path = %path.display(), "address history unreadable, starting empty: {err}");
                Self::empty(path)
            }
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, AddressBookError> {
        let meta = fs::metadata(path).map_err(AddressBookError::Metadata)?;
        if meta.len() > MAX_ADDRESS_BOOK_BYTES {
            return Err(AddressBookError::TooLarge {
                size: meta.len(),
                max: MAX_ADDRESS_BOOK_BYTES,
            });
        }

        let data = fs::read_to_string(path).map_err(AddressBookError::Read)?;
        let doc: PrefsDocument = serde_json::from_str(&data).map_err(AddressBookError::Parse)?;
        Ok(Self {
            path: path.to_owned(),
            entries: HistoryStore::from_entries(MAX_ADDRESS_HISTORY, doc.ip_history_list),
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            entries: HistoryStore::new(MAX_ADDRESS_HISTORY),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.most_recent().map(|entry| entry.address.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &AddressHistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `address` as just used. Blank addresses are ignored.
    pub fn touch(&mut self, address: &str) -> Result<(), AddressBookError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(());
        }
        self.entries.upsert(AddressHistoryEntry::touched_now(address));
        self.save()
    }

    /// Returns whether an entry was removed.
    pub fn forget(&mut self, address: &str) -> Result<bool, AddressBookError> {
        let removed = self.entries.remove(address.trim()).is_some();
        self.save()?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<(), AddressBookError> {
        self.entries.clear();
        self.save()
    }

    fn save(&self) -> Result<(), AddressBookError> {
        const MAX_ATTEMPTS: u32 = 3;
        const BACKOFF_BASE_MS: u64 = 50;

        let doc = PrefsDocument {
            ip_history_list: self.entries.to_vec(),
        };

        let mut attempt = 1;
        loop {
            match save_document(&self.path, &doc) {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
                Err(err) => {
                    warn!(attempt, path = %self.path.display(), "address history save failed: {err}");
                    let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                    attempt += 1;
                }
            }
        }
    }
}

/// Cloneable handle for async callers. Mutations, with their save retries and
/// backoff sleeps, run on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct SharedAddressBook {
    inner: Arc<Mutex<AddressBook>>,
}

impl SharedAddressBook {
    pub fn new(book: AddressBook) -> Self {
        Self {
            inner: Arc::new(Mutex::new(book)),
        }
    }

    /// Newest first. Empty if the lock is poisoned.
    pub fn entries(&self) -> Vec<AddressHistoryEntry> {
        self.inner
            .lock()
            .map(|book| book.entries().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn touch(&self, address: String) -> Result<(), AddressBookError> {
        self.with_book(move |book| book.touch(&address)).await
    }

    pub async fn forget(&self, address: String) -> Result<bool, AddressBookError> {
        self.with_book(move |book| book.forget(&address)).await
    }

    async fn with_book<T, F>(&self, f: F) -> Result<T, AddressBookError>
    where
        T: Send + 'static,
        F: FnOnce(&mut AddressBook) -> Result<T, AddressBookError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut book = inner
                .lock()
                .map_err(|_| AddressBookError::Unavailable("lock poisoned".to_owned()))?;
            f(&mut book)
        })
        .await
        .map_err(|err| AddressBookError::Unavailable(err.to_string()))?
    }
}

fn save_document(path: &Path, doc: &PrefsDocument) -> Result<(), AddressBookError> {
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(doc).map_err(AddressBookError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(AddressBookError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(AddressBookError::Rename)?;
    Ok(())
}
