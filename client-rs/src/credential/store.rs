//! Credential storage backends
//!
//! - Memory: process-local, for tests and short-lived tools
//! - File: persisted key-value document, replaced atomically on every write

use crate::credential::Credential;
use crate::error::StoreError;

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key under which the access credential is kept
pub const CREDENTIAL_KEY: &str = "access_token";

/// Storage for the current access credential.
///
/// Every write fully replaces the stored value; readers always observe the
/// latest committed credential.
pub trait CredentialStore: Send + Sync {
    /// The current credential, if any
    fn get(&self) -> Option<Credential>;

    /// Replace the stored credential
    fn set(&self, credential: Credential) -> Result<(), StoreError>;

    /// Remove the stored credential
    fn clear(&self) -> Result<(), StoreError>;

    /// Store `next` only if `expected` is still the current credential.
    ///
    /// Returns `Ok(false)` without writing when the store was cleared or
    /// replaced in the meantime.
    fn replace_if_current(
        &self,
        expected: &Credential,
        next: Credential,
    ) -> Result<bool, StoreError>;
}

/// In-memory credential store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    current: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    fn set(&self, credential: Credential) -> Result<(), StoreError> {
        *self.current.write() = Some(credential);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.current.write() = None;
        Ok(())
    }

    fn replace_if_current(
        &self,
        expected: &Credential,
        next: Credential,
    ) -> Result<bool, StoreError> {
        let mut current = self.current.write();
        if current.as_ref() != Some(expected) {
            return Ok(false);
        }
        *current = Some(next);
        Ok(true)
    }
}

/// File-backed credential store.
///
/// The file is a flat JSON object of string entries. Writes go to a sibling
/// temporary file which is flushed to disk and renamed over the original, so
/// a crash mid-write leaves the previous document intact.
pub struct FileCredentialStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "Opened credential store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// `<config dir>/pulsewatch/credentials.json`
    pub fn default_location() -> Result<PathBuf, StoreError> {
        dirs::config_dir()
            .map(|dir| dir.join("pulsewatch").join("credentials.json"))
            .ok_or(StoreError::NoLocation)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entries)?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        if !apply(&mut next) {
            return Ok(false);
        }
        self.persist(&next)?;
        *entries = next;
        Ok(true)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.entries
            .lock()
            .get(CREDENTIAL_KEY)
            .map(|token| Credential::new(token.clone()))
    }

    fn set(&self, credential: Credential) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(CREDENTIAL_KEY.to_string(), credential.into_inner());
            true
        })
        .map(|_| ())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(CREDENTIAL_KEY);
            true
        })
        .map(|_| ())
    }

    fn replace_if_current(
        &self,
        expected: &Credential,
        next: Credential,
    ) -> Result<bool, StoreError> {
        self.update(|entries| {
            if entries.get(CREDENTIAL_KEY).map(String::as_str) != Some(expected.as_str()) {
                return false;
            }
            entries.insert(CREDENTIAL_KEY.to_string(), next.into_inner());
            true
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Holds a credential in memory but refuses every write
    pub(crate) struct ReadOnlyStore {
        inner: MemoryCredentialStore,
    }

    impl ReadOnlyStore {
        pub(crate) fn new(credential: Option<Credential>) -> Self {
            Self {
                inner: match credential {
                    Some(credential) => MemoryCredentialStore::with_credential(credential),
                    None => MemoryCredentialStore::new(),
                },
            }
        }

        fn refuse() -> StoreError {
            StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
    }

    impl CredentialStore for ReadOnlyStore {
        fn get(&self) -> Option<Credential> {
            self.inner.get()
        }

        fn set(&self, _credential: Credential) -> Result<(), StoreError> {
            Err(Self::refuse())
        }

        fn clear(&self) -> Result<(), StoreError> {
            Err(Self::refuse())
        }

        fn replace_if_current(
            &self,
            _expected: &Credential,
            _next: Credential,
        ) -> Result<bool, StoreError> {
            Err(Self::refuse())
        }
    }

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set(Credential::new("a")).unwrap();
        assert_eq!(store.get(), Some(Credential::new("a")));

        store.set(Credential::new("b")).unwrap();
        assert_eq!(store.get(), Some(Credential::new("b")));

        store.clear().unwrap();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_memory_store_replace_if_current() {
        let store = MemoryCredentialStore::with_credential(Credential::new("old"));

        assert!(store
            .replace_if_current(&Credential::new("old"), Credential::new("new"))
            .unwrap());
        assert_eq!(store.get(), Some(Credential::new("new")));

        // stale expectation
        assert!(!store
            .replace_if_current(&Credential::new("old"), Credential::new("newer"))
            .unwrap());
        assert_eq!(store.get(), Some(Credential::new("new")));

        // cleared in the meantime
        store.clear().unwrap();
        assert!(!store
            .replace_if_current(&Credential::new("new"), Credential::new("newer"))
            .unwrap());
        assert!(store.get().is_none());
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        {
            let store = FileCredentialStore::open(&path).unwrap();
            assert!(store.get().is_none());
            store.set(Credential::new("persisted-token")).unwrap();
        }

        let reopened = FileCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.get(), Some(Credential::new("persisted-token")));

        reopened.clear().unwrap();
        let again = FileCredentialStore::open(&path).unwrap();
        assert!(again.get().is_none());
    }

    #[test]
    fn test_file_store_keeps_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = FileCredentialStore::open(&path).unwrap();
        store.set(Credential::new("tok")).unwrap();
        store.clear().unwrap();

        let raw: BTreeMap<String, String> =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw.get("theme").map(String::as_str), Some("dark"));
        assert!(!raw.contains_key(CREDENTIAL_KEY));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_replace_if_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("c.json")).unwrap();
        store.set(Credential::new("old")).unwrap();

        assert!(!store
            .replace_if_current(&Credential::new("other"), Credential::new("new"))
            .unwrap());
        assert!(store
            .replace_if_current(&Credential::new("old"), Credential::new("new"))
            .unwrap());

        let reopened = FileCredentialStore::open(store.path()).unwrap();
        assert_eq!(reopened.get(), Some(Credential::new("new")));
    }

    #[test]
    fn test_file_store_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let result = FileCredentialStore::open(&path);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
