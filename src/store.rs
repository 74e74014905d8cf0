use crate::error::{ReconciliationError, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Byte-addressable storage of source sheets and reports, organised in folders.
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when the document does not exist.
    fn fetch(&self, name: &str, folder: &str) -> Result<Option<Vec<u8>>>;

    /// Returns whether the document was written.
    fn store(&self, bytes: &[u8], name: &str, folder: &str) -> Result<bool>;
}

fn check_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
    {
        return Err(ReconciliationError::StoreError(format!(
            "invalid {} '{}'",
            kind, value
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names stored in `folder`, sorted.
    pub fn list(&self, folder: &str) -> Result<Vec<String>> {
        let guard = self
            .documents
            .read()
            .map_err(|_| ReconciliationError::StoreError("lock poisoned".into()))?;
        Ok(guard
            .keys()
            .filter(|(f, _)| f == folder)
            .map(|(_, name)| name.clone())
            .collect())
    }
}

impl DocumentStore for MemoryStore {
    fn fetch(&self, name: &str, folder: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| ReconciliationError::StoreError("lock poisoned".into()))?
            .get(&(folder.to_string(), name.to_string()))
            .cloned())
    }

    fn store(&self, bytes: &[u8], name: &str, folder: &str) -> Result<bool> {
        check_segment("name", name)?;
        let mut guard = self
            .documents
            .write()
            .map_err(|_| ReconciliationError::StoreError("lock poisoned".into()))?;
        guard.insert((folder.to_string(), name.to_string()), bytes.to_vec());
        Ok(true)
    }
}

/// Folders are subdirectories of `root`; documents are files inside them.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str, folder: &str) -> Result<PathBuf> {
        check_segment("name", name)?;
        let mut path = self.root.clone();
        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            check_segment("folder", segment)?;
            path.push(segment);
        }
        path.push(name);
        Ok(path)
    }
}

impl DocumentStore for DirectoryStore {
    fn fetch(&self, name: &str, folder: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name, folder)?;
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("Read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, bytes: &[u8], name: &str, folder: &str) -> Result<bool> {
        let path = self.path_for(name, folder)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.fetch("a.csv", "in").unwrap(), None);
        assert!(store.store(b"x,y", "a.csv", "in").unwrap());
        assert_eq!(store.fetch("a.csv", "in").unwrap(), Some(b"x,y".to_vec()));
        assert_eq!(store.fetch("a.csv", "out").unwrap(), None);
        assert_eq!(store.list("in").unwrap(), vec!["a.csv".to_string()]);
    }

    #[test]
    fn test_directory_store() {
        let root = std::env::temp_dir().join(format!("invoice-reconciler-{}", std::process::id()));
        let store = DirectoryStore::new(&root);
        assert_eq!(store.fetch("r.csv", "reports/2024").unwrap(), None);
        assert!(store.store(b"data", "r.csv", "reports/2024").unwrap());
        assert_eq!(
            store.fetch("r.csv", "reports/2024").unwrap(),
            Some(b"data".to_vec())
        );
        assert!(root.join("reports").join("2024").join("r.csv").exists());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_names_cannot_escape_the_folder() {
        let store = DirectoryStore::new("/tmp/unused");
        assert!(store.store(b"", "../x", "in").is_err());
        assert!(store.fetch("x", "in/../..").is_err());
        assert!(MemoryStore::new().store(b"", "a/b", "in").is_err());
    }
}
