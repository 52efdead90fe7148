//! Durable configuration store.
//!
//! The store holds the contact map keyed by address. Mutation follows a
//! lock/unlock contract: [`Store::lock`] returns a guard that dereferences
//! to the root document, and dropping the guard writes the document back to
//! disk atomically (serialize to a temporary file, then rename into place).

use crate::types::ContactData;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config read failed: {0}")]
    Read(#[from] io::Error),
    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Root of the persisted configuration document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Root {
    /// Contacts keyed by address.
    #[serde(default)]
    pub contacts: HashMap<String, ContactData>,
}

/// File-backed configuration store.
#[derive(Debug)]
pub struct Store {
    path: Option<PathBuf>,
    root: Mutex<Root>,
}

impl Store {
    /// Opens the store at `path`, creating an empty document if the file
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let root = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Root::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            root: Mutex::new(root),
        })
    }

    /// An in-memory store that never touches disk.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            root: Mutex::new(Root::default()),
        }
    }

    /// Locks the document for mutation. The document is saved when the
    /// guard drops.
    pub fn lock(&self) -> Guard<'_> {
        Guard {
            store: self,
            root: self.root.lock().unwrap(),
        }
    }

    /// A deep copy of the current document.
    pub fn snapshot(&self) -> Root {
        self.root.lock().unwrap().clone()
    }

    fn save(&self, root: &Root) {
        let Some(path) = &self.path else { return };
        if let Err(e) = write_atomically(path, root) {
            // Nothing the caller can do mid-unlock; the in-memory state
            // stays authoritative and the next save retries.
            error!(path = %path.display(), error = %e, "failed to save config");
        }
    }
}

fn write_atomically(path: &Path, root: &Root) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let bytes = serde_json::to_vec_pretty(root)?;
    let file = tempfile::NamedTempFile::new_in(parent)?;
    fs::write(file.path(), &bytes)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Mutable handle to the config document. Saves on drop.
pub struct Guard<'a> {
    store: &'a Store,
    root: MutexGuard<'a, Root>,
}

impl std::ops::Deref for Guard<'_> {
    type Target = Root;

    fn deref(&self) -> &Root {
        &self.root
    }
}

impl std::ops::DerefMut for Guard<'_> {
    fn deref_mut(&mut self) -> &mut Root {
        &mut self.root
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.store.save(&self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactStatus;

    #[test]
    fn test_open_missing_file_yields_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("config.json")).unwrap();
        assert!(store.snapshot().contacts.is_empty());
    }

    #[test]
    fn test_mutations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = Store::open(&path).unwrap();
        {
            let mut config = store.lock();
            config.contacts.insert(
                "ricochet:aaaaaaaaaaaaaaaa".into(),
                ContactData::new("ricochet:aaaaaaaaaaaaaaaa", "alice"),
            );
        }
        drop(store);

        let reopened = Store::open(&path).unwrap();
        let snapshot = reopened.snapshot();
        let contact = &snapshot.contacts["ricochet:aaaaaaaaaaaaaaaa"];
        assert_eq!(contact.nickname, "alice");
        assert_eq!(contact.status, ContactStatus::Unknown);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(Store::open(&path), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_ephemeral_store_keeps_state_in_memory() {
        let store = Store::ephemeral();
        store.lock().contacts.insert(
            "ricochet:aaaaaaaaaaaaaaaa".into(),
            ContactData::new("ricochet:aaaaaaaaaaaaaaaa", "alice"),
        );
        assert_eq!(store.snapshot().contacts.len(), 1);
    }
}
