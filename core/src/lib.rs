//! Lazily loaded catalog metadata tree with a persisted server registry.

pub mod engine;
pub mod error;
pub mod metadata;
pub mod registry;

pub use engine::{
    CatalogConnection, CatalogVersion, ChangeSummary, Children, LoadState, Lockable,
    MetadataLoader, Observer, ReferenceLock, ScopedTransaction, Statement, Subject,
};
pub use error::{CatalogError, CatalogResult};
pub use metadata::{
    AuthenticationMode, Credentials, Database, DatabaseSettings, MetadataNode, MetadataVisitor,
    NodeRef, Parameter, PrivilegeGroup, Procedure, Server, TreeStats,
};
pub use registry::{FileStore, InMemoryStore, Registry, RegistrySnapshot, RegistryStore};

pub use common::ident::Identifier;
pub use common::node::NodeKind;
pub use common::value::{Row, Value};
