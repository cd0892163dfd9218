//! Concrete node kinds of the catalog tree.

pub mod database;
pub mod parameter;
pub mod privilege;
pub mod procedure;
pub mod server;
pub mod visitor;

use std::sync::{Arc, RwLock};

use common::ident::Identifier;
use common::node::NodeKind;

use crate::engine::loader::MetadataLoader;
use crate::engine::lock::Lockable;
use crate::error::{CatalogError, CatalogResult};

pub use database::{
    extract_name_from_path, AuthenticationMode, Credentials, Database, DatabaseSettings,
};
pub use parameter::{Parameter, ParameterDirection, ParameterMechanism};
pub use privilege::{
    group_privileges, GranteeKind, PrivilegeEntry, PrivilegeGroup, PrivilegeKind, PrivilegeRow,
    PrivilegeSet,
};
pub use procedure::Procedure;
pub use server::Server;
pub use visitor::{MetadataVisitor, TreeStats};

/// Capabilities every node of the tree shares.
pub trait MetadataNode: Lockable {
    fn kind(&self) -> NodeKind {
        self.subject().kind()
    }

    fn name(&self) -> Identifier {
        self.subject().name()
    }

    /// Children already in memory. Never touches the catalog.
    fn loaded_children(&self) -> Vec<NodeRef>;

    /// Children, loading them first when they are not loaded yet.
    fn children(&self) -> CatalogResult<Vec<NodeRef>> {
        Ok(self.loaded_children())
    }

    fn accept(&self, visitor: &mut dyn MetadataVisitor);
}

/// Shared handle to one node of any kind.
#[derive(Debug, Clone)]
pub enum NodeRef {
    Server(Arc<Server>),
    Database(Arc<Database>),
    Procedure(Arc<Procedure>),
    Parameter(Arc<Parameter>),
}

impl NodeRef {
    pub fn node(&self) -> &dyn MetadataNode {
        match self {
            NodeRef::Server(server) => server.as_ref(),
            NodeRef::Database(database) => database.as_ref(),
            NodeRef::Procedure(procedure) => procedure.as_ref(),
            NodeRef::Parameter(parameter) => parameter.as_ref(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.node().kind()
    }

    pub fn name(&self) -> Identifier {
        self.node().name()
    }
}

/// Visits `node` and everything below it that is already loaded.
pub fn walk_loaded(node: &dyn MetadataNode, visitor: &mut dyn MetadataVisitor) {
    node.accept(visitor);
    for child in node.loaded_children() {
        walk_loaded(child.node(), visitor);
    }
}

/// Back reference from catalog-backed nodes to their database's loader.
///
/// Cloned into every procedure a database creates; detaching it on
/// disconnect makes further loads fail with `LoaderUnavailable`.
#[derive(Clone, Default)]
pub struct LoaderLink(Arc<RwLock<Option<Arc<MetadataLoader>>>>);

impl LoaderLink {
    pub fn attach(&self, loader: Arc<MetadataLoader>) {
        match self.0.write() {
            Ok(mut slot) => *slot = Some(loader),
            Err(poisoned) => *poisoned.into_inner() = Some(loader),
        }
    }

    pub fn detach(&self) -> Option<Arc<MetadataLoader>> {
        match self.0.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.0.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    pub fn get(&self) -> CatalogResult<Arc<MetadataLoader>> {
        self.0
            .read()
            .map_err(|_| CatalogError::LockPoisoned("loader link"))?
            .clone()
            .ok_or_else(|| CatalogError::LoaderUnavailable("database is not connected".into()))
    }
}

impl std::fmt::Debug for LoaderLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LoaderLink").field(&self.is_attached()).finish()
    }
}
