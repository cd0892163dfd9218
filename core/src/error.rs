use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the metadata tree and the registry.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("metadata loader unavailable: {0}")]
    LoaderUnavailable(String),
    #[error("catalog row not found: {0}")]
    NotFound(String),
    #[error("catalog statement failed: {0}")]
    Statement(String),
    #[error("children of {0} are already being loaded")]
    LoadInProgress(String),
    #[error("{0} is locked and cannot be removed")]
    NodeBusy(String),
    #[error("registry file {} could not be accessed: {source}", path.display())]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed registry: {0}")]
    MalformedRegistry(String),
    #[error("registry document is not valid xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl CatalogError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CatalogError::PersistenceFailure {
            path: path.into(),
            source,
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
