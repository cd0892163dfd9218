use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use common::ident::Identifier;
use common::node::NodeKind;

use crate::engine::lock::Lockable;
use crate::engine::subject::Subject;
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::database::Database;
use crate::metadata::visitor::MetadataVisitor;
use crate::metadata::{MetadataNode, NodeRef};
use crate::registry::state::RegistryState;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Endpoint {
    host: String,
    port: String,
}

/// A server entry of the registry, owning its registered databases.
pub struct Server {
    subject: Subject,
    endpoint: RwLock<Endpoint>,
    databases: RwLock<Vec<Arc<Database>>>,
    registry: Arc<RegistryState>,
    synthetic: bool,
}

impl Server {
    /// An empty `name` falls back to the connection string.
    pub fn new(name: &str, host: &str, port: &str, registry: Arc<RegistryState>) -> Self {
        Self::build(name, host, port, registry, false)
    }

    /// Holder for databases opened without being registered; never persisted.
    pub(crate) fn synthetic(name: &str, host: &str, registry: Arc<RegistryState>) -> Self {
        Self::build(name, host, "", registry, true)
    }

    fn build(
        name: &str,
        host: &str,
        port: &str,
        registry: Arc<RegistryState>,
        synthetic: bool,
    ) -> Self {
        let endpoint = Endpoint {
            host: host.trim().to_owned(),
            port: port.trim().to_owned(),
        };
        let name = match name.trim() {
            "" => connection_string(&endpoint),
            name => name.to_owned(),
        };
        Self {
            subject: Subject::new(NodeKind::Server, Identifier::from(name)),
            endpoint: RwLock::new(endpoint),
            databases: RwLock::new(Vec::new()),
            registry,
            synthetic,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    fn endpoint(&self) -> Endpoint {
        match self.endpoint.read() {
            Ok(endpoint) => endpoint.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn host(&self) -> String {
        self.endpoint().host
    }

    pub fn port(&self) -> String {
        self.endpoint().port
    }

    /// `host` or `host/port`.
    pub fn connection_string(&self) -> String {
        connection_string(&self.endpoint())
    }

    pub fn set_endpoint(&self, host: &str, port: &str) -> CatalogResult<()> {
        *self
            .endpoint
            .write()
            .map_err(|_| CatalogError::LockPoisoned("server endpoint"))? = Endpoint {
            host: host.trim().to_owned(),
            port: port.trim().to_owned(),
        };
        self.touch();
        Ok(())
    }

    pub fn rename(&self, name: &str) {
        self.subject.set_name(Identifier::from(name.to_owned()));
        self.touch();
    }

    fn touch(&self) {
        if !self.synthetic {
            self.registry.mark_dirty();
        }
        self.subject.notify_observers();
    }

    fn database_list(&self) -> RwLockReadGuard<'_, Vec<Arc<Database>>> {
        match self.databases.read() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn databases(&self) -> Vec<Arc<Database>> {
        self.database_list().clone()
    }

    pub fn database_count(&self) -> usize {
        self.database_list().len()
    }

    pub fn find_database(&self, name: &str) -> Option<Arc<Database>> {
        self.database_list()
            .iter()
            .find(|database| database.subject().name().as_str() == name)
            .cloned()
    }

    /// Looks a database up by id without allocating ids for the others.
    pub fn find_database_by_id(&self, id: u64) -> Option<Arc<Database>> {
        self.database_list()
            .iter()
            .find(|database| database.has_id() && database.id() == id)
            .cloned()
    }

    /// Appends a database. It starts with this server's lock depth.
    pub fn add_database(&self, database: Database) -> CatalogResult<Arc<Database>> {
        let database = Arc::new(database);
        for _ in 0..self.subject.lock_count() {
            database.lock_subject();
        }
        self.databases
            .write()
            .map_err(|_| CatalogError::LockPoisoned("server databases"))?
            .push(Arc::clone(&database));
        log::debug!(
            "database {} added to server {}",
            database.subject().name(),
            self.subject.name()
        );
        self.touch();
        Ok(database)
    }

    /// Removes a database that nothing holds locked.
    pub fn remove_database(&self, database: &Arc<Database>) -> CatalogResult<()> {
        let depth = self.subject.lock_count();
        if database.subject().lock_count() > depth {
            return Err(CatalogError::NodeBusy(database.subject().name().to_string()));
        }
        let removed = {
            let mut list = self
                .databases
                .write()
                .map_err(|_| CatalogError::LockPoisoned("server databases"))?;
            let before = list.len();
            list.retain(|existing| !Arc::ptr_eq(existing, database));
            before != list.len()
        };
        if !removed {
            return Err(CatalogError::NotFound(format!(
                "database {} on server {}",
                database.subject().name(),
                self.subject.name()
            )));
        }
        for _ in 0..depth {
            database.unlock_subject();
        }
        self.touch();
        Ok(())
    }

    /// Disconnects every connected database. Stops at the first busy one.
    pub fn disconnect_all(&self) -> CatalogResult<()> {
        for database in self.databases() {
            database.disconnect()?;
        }
        Ok(())
    }
}

fn connection_string(endpoint: &Endpoint) -> String {
    if endpoint.port.is_empty() {
        endpoint.host.clone()
    } else {
        format!("{}/{}", endpoint.host, endpoint.port)
    }
}

impl Lockable for Server {
    fn subject(&self) -> &Subject {
        &self.subject
    }

    fn lock_children(&self) {
        for database in self.databases() {
            database.lock_subject();
        }
    }

    fn unlock_children(&self) {
        for database in self.databases() {
            database.unlock_subject();
        }
    }
}

impl MetadataNode for Server {
    fn loaded_children(&self) -> Vec<NodeRef> {
        self.databases()
            .into_iter()
            .map(NodeRef::Database)
            .collect()
    }

    fn accept(&self, visitor: &mut dyn MetadataVisitor) {
        visitor.visit_server(self);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.subject.name())
            .field("endpoint", &self.endpoint())
            .field("databases", &self.database_count())
            .field("synthetic", &self.synthetic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::lock::ReferenceLock;
    use crate::metadata::database::DatabaseSettings;

    fn server(name: &str, host: &str, port: &str) -> Server {
        Server::new(name, host, port, Arc::new(RegistryState::new()))
    }

    fn database(server: &Server, name: &str) -> Database {
        Database::new(name, DatabaseSettings::with_path("/db/x.fdb"), server.registry.clone())
    }

    #[test]
    fn name_falls_back_to_connection_string() {
        assert_eq!(server("", "db.example", "3051").subject().name(), "db.example/3051");
        assert_eq!(server("", "localhost", "").subject().name(), "localhost");
        assert_eq!(server("Prod", "db.example", "").subject().name(), "Prod");
    }

    #[test]
    fn added_database_inherits_lock_depth() {
        let srv = server("S", "localhost", "");
        let added = {
            let _lock = ReferenceLock::new(&srv);
            let added = srv.add_database(database(&srv, "A")).unwrap();
            assert_eq!(added.subject().lock_count(), 1);
            added
        };
        assert_eq!(added.subject().lock_count(), 0);
        assert!(srv.registry.is_dirty());
    }

    #[test]
    fn locked_database_cannot_be_removed() {
        let srv = server("S", "localhost", "");
        let db = srv.add_database(database(&srv, "A")).unwrap();
        {
            let _pin = ReferenceLock::new(&*db);
            assert!(matches!(
                srv.remove_database(&db),
                Err(CatalogError::NodeBusy(_))
            ));
        }
        srv.remove_database(&db).unwrap();
        assert_eq!(srv.database_count(), 0);
        assert!(matches!(srv.remove_database(&db), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn lookup_by_id_does_not_allocate() {
        let srv = server("S", "localhost", "");
        let a = srv.add_database(database(&srv, "A")).unwrap();
        let b = srv.add_database(database(&srv, "B")).unwrap();
        b.set_id(7);
        assert!(Arc::ptr_eq(&srv.find_database_by_id(7).unwrap(), &b));
        assert!(srv.find_database_by_id(1).is_none());
        assert!(!a.has_id());
    }
}
