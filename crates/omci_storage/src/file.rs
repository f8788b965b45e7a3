//! Directory-backed key-value store.

use crate::error::{StorageError, StorageResult};
use crate::kv::{validate_key, KvStore};
use crate::watch::{KvEvent, WatchRegistry};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

const LOCK_FILE: &str = "LOCK";
const VALUE_SUFFIX: &str = ".kv";
const TEMP_SUFFIX: &str = ".tmp";

/// A key-value store keeping one file per key in a directory.
///
/// Keys are percent-escaped into flat file names, so `onu-1` and
/// `onu-1/classes/256` can coexist. Writes go to a temporary file that is
/// renamed over the target, so a crash never leaves a half-written value.
///
/// The directory is locked exclusively while the store is open.
///
/// # Example
///
/// ```no_run
/// use omci_storage::{FileKvStore, KvStore};
/// use std::path::Path;
///
/// let store = FileKvStore::open(Path::new("/var/lib/omci")).unwrap();
/// store.set("omci_mibs/onu-1", b"blob").unwrap();
/// ```
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    guard: RwLock<()>,
    watchers: WatchRegistry,
    _lock_file: File,
}

impl FileKvStore {
    /// Opens or creates a store in `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the
    /// directory, or an I/O error if it cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        tracing::debug!(path = %path.display(), "opened file kv store");

        Ok(Self {
            path: path.to_path_buf(),
            guard: RwLock::new(()),
            watchers: WatchRegistry::new(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}{VALUE_SUFFIX}", escape(key)))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let _guard = self.guard.read();
        match fs::read(self.value_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let target = self.value_path(key);
        let temp = target.with_extension(&TEMP_SUFFIX[1..]);
        {
            let _guard = self.guard.write();
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&temp, &target)?;
        }
        self.watchers.emit(&KvEvent::set(key, value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let removed = {
            let _guard = self.guard.write();
            match fs::remove_file(self.value_path(key)) {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            }
        };
        if removed {
            self.watchers.emit(&KvEvent::delete(key));
        }
        Ok(removed)
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let _guard = self.guard.read();
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(VALUE_SUFFIX) else {
                continue;
            };
            let key = unescape(stem)
                .ok_or_else(|| StorageError::Corrupted(format!("bad file name: {name}")))?;
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn watch(&self, prefix: &str) -> Receiver<KvEvent> {
        self.watchers.subscribe(prefix)
    }
}

fn escape(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn unescape(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
