use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{CatalogError, CatalogResult};

/// Durable location of the registry document.
pub trait RegistryStore: Send + Sync {
    /// Stored document, or `None` when nothing has been written yet.
    fn read(&self) -> CatalogResult<Option<String>>;

    fn write(&self, contents: &str) -> CatalogResult<()>;

    /// Path used in error reports.
    fn location(&self) -> PathBuf;
}

/// Registry document kept in a single file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for FileStore {
    fn read(&self) -> CatalogResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CatalogError::persistence(&self.path, err)),
        }
    }

    fn write(&self, contents: &str) -> CatalogResult<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| CatalogError::persistence(dir, err))?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, contents).map_err(|err| CatalogError::persistence(&staging, err))?;
        fs::rename(&staging, &self.path).map_err(|err| CatalogError::persistence(&self.path, err))
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

/// In-process store, mainly for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryStore {
    contents: RwLock<Option<String>>,
    read_only: RwLock<bool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: RwLock::new(Some(contents.into())),
            read_only: RwLock::new(false),
        }
    }

    /// Makes subsequent writes fail, as an unwritable file would.
    pub fn set_read_only(&self, read_only: bool) {
        if let Ok(mut flag) = self.read_only.write() {
            *flag = read_only;
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.read().ok().and_then(|contents| contents.clone())
    }

    fn lock_poisoned(tag: &'static str) -> CatalogError {
        CatalogError::LockPoisoned(tag)
    }
}

impl RegistryStore for InMemoryStore {
    fn read(&self) -> CatalogResult<Option<String>> {
        let contents = self
            .contents
            .read()
            .map_err(|_| Self::lock_poisoned("store read"))?;
        Ok(contents.clone())
    }

    fn write(&self, contents: &str) -> CatalogResult<()> {
        let read_only = *self
            .read_only
            .read()
            .map_err(|_| Self::lock_poisoned("store flag"))?;
        if read_only {
            return Err(CatalogError::persistence(
                self.location(),
                io::Error::new(ErrorKind::PermissionDenied, "store is read-only"),
            ));
        }
        *self
            .contents
            .write()
            .map_err(|_| Self::lock_poisoned("store write"))? = Some(contents.to_owned());
        Ok(())
    }

    fn location(&self) -> PathBuf {
        PathBuf::from(":memory:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nested/registry.xml"));
        assert!(store.read().unwrap().is_none());

        store.write("<root/>").unwrap();
        assert_eq!(store.read().unwrap().as_deref(), Some("<root/>"));
    }

    #[test]
    fn unwritable_file_store_reports_its_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();
        let store = FileStore::new(blocker.join("registry.xml"));

        match store.write("<root/>") {
            Err(CatalogError::PersistenceFailure { path, .. }) => assert_eq!(path, blocker),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn in_memory_store_can_refuse_writes() {
        let store = InMemoryStore::new();
        store.set_read_only(true);
        assert!(matches!(
            store.write("<root/>"),
            Err(CatalogError::PersistenceFailure { .. })
        ));
        store.set_read_only(false);
        store.write("<root/>").unwrap();
        assert_eq!(store.contents().as_deref(), Some("<root/>"));
    }
}
