//! The persisted part of the tree: servers and their registered databases.

pub mod global;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod xml;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use common::ident::Identifier;
use common::node::NodeKind;

use crate::engine::lock::Lockable;
use crate::engine::subject::Subject;
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::database::{AuthenticationMode, Credentials, Database, DatabaseSettings};
use crate::metadata::server::Server;
use crate::metadata::visitor::MetadataVisitor;
use crate::metadata::{MetadataNode, NodeRef};

pub use snapshot::{DatabaseSnapshot, RegistrySnapshot, ServerSnapshot};
pub use state::RegistryState;
pub use store::{FileStore, InMemoryStore, RegistryStore};
use xml::{DatabaseRecord, RegistryDocument, ServerRecord};

pub const UNREGISTERED_SERVER_NAME: &str = "Unregistered local databases";

const ROOT_NAME: &str = "Home";

/// Clears the loading flag however `load` exits.
struct LoadingFlag<'a>(&'a AtomicBool);

impl<'a> LoadingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Root of the tree. Owns the servers, the id allocator and the store.
pub struct Registry {
    subject: Subject,
    state: Arc<RegistryState>,
    store: Box<dyn RegistryStore>,
    servers: RwLock<Vec<Arc<Server>>>,
    unregistered: RwLock<Option<Arc<Server>>>,
    loading: AtomicBool,
}

impl Registry {
    pub fn new(store: impl RegistryStore + 'static) -> Self {
        Self {
            subject: Subject::new(NodeKind::Root, Identifier::from(ROOT_NAME)),
            state: Arc::new(RegistryState::new()),
            store: Box::new(store),
            servers: RwLock::new(Vec::new()),
            unregistered: RwLock::new(None),
            loading: AtomicBool::new(false),
        }
    }

    /// Creates a registry and loads whatever the store holds.
    pub fn open(store: impl RegistryStore + 'static) -> CatalogResult<Self> {
        let registry = Self::new(store);
        registry.load()?;
        Ok(registry)
    }

    pub fn state(&self) -> &Arc<RegistryState> {
        &self.state
    }

    pub fn next_id(&self) -> u64 {
        self.state.next_id()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn location(&self) -> std::path::PathBuf {
        self.store.location()
    }

    fn server_list(&self) -> RwLockReadGuard<'_, Vec<Arc<Server>>> {
        match self.servers.read() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// All servers, the unregistered bucket included.
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.server_list().clone()
    }

    pub fn find_server(&self, name: &str) -> Option<Arc<Server>> {
        self.server_list()
            .iter()
            .find(|server| server.subject().name().as_str() == name)
            .cloned()
    }

    pub fn find_database(&self, id: u64) -> Option<Arc<Database>> {
        self.server_list()
            .iter()
            .find_map(|server| server.find_database_by_id(id))
    }

    /// A detached server sharing this registry's allocator.
    pub fn new_server(&self, name: &str, host: &str, port: &str) -> Server {
        Server::new(name, host, port, Arc::clone(&self.state))
    }

    /// A detached database sharing this registry's allocator.
    pub fn new_database(&self, name: &str, settings: DatabaseSettings) -> Database {
        Database::new(name, settings, Arc::clone(&self.state))
    }

    /// Appends a server and persists the registry.
    ///
    /// The server stays registered when the save fails; the error is
    /// returned and the registry remains dirty.
    pub fn add_server(&self, server: Server) -> CatalogResult<Arc<Server>> {
        let server = self.attach(server)?;
        self.state.mark_dirty();
        self.subject.notify_observers();
        self.save()?;
        Ok(server)
    }

    fn attach(&self, server: Server) -> CatalogResult<Arc<Server>> {
        let server = Arc::new(server);
        for _ in 0..self.subject.lock_count() {
            server.lock_subject();
        }
        self.servers
            .write()
            .map_err(|_| CatalogError::LockPoisoned("registry servers"))?
            .push(Arc::clone(&server));
        log::debug!("server {} registered", server.subject().name());
        Ok(server)
    }

    /// Removes a server nothing holds locked. Removing the unregistered
    /// bucket does not touch storage.
    pub fn remove_server(&self, server: &Arc<Server>) -> CatalogResult<()> {
        let depth = self.subject.lock_count();
        if server.subject().lock_count() > depth {
            return Err(CatalogError::NodeBusy(server.subject().name().to_string()));
        }
        let removed = {
            let mut list = self
                .servers
                .write()
                .map_err(|_| CatalogError::LockPoisoned("registry servers"))?;
            let before = list.len();
            list.retain(|existing| !Arc::ptr_eq(existing, server));
            before != list.len()
        };
        if !removed {
            return Err(CatalogError::NotFound(format!(
                "server {}",
                server.subject().name()
            )));
        }
        for _ in 0..depth {
            server.unlock_subject();
        }

        if server.is_synthetic() {
            *self
                .unregistered
                .write()
                .map_err(|_| CatalogError::LockPoisoned("unregistered bucket"))? = None;
            self.state.mark_dirty();
            self.subject.notify_observers();
            return Ok(());
        }
        log::debug!("server {} removed", server.subject().name());
        self.state.mark_dirty();
        self.subject.notify_observers();
        self.save()
    }

    /// Registers a database under `server` and persists the registry.
    pub fn add_database(
        &self,
        server: &Arc<Server>,
        database: Database,
    ) -> CatalogResult<Arc<Database>> {
        let database = server.add_database(database)?;
        if !server.is_synthetic() {
            self.save()?;
        }
        Ok(database)
    }

    pub fn unregistered_server(&self) -> Option<Arc<Server>> {
        self.unregistered
            .read()
            .ok()
            .and_then(|bucket| bucket.clone())
    }

    /// Adds a database opened without registering it. The holding server is
    /// created on first use and never persisted.
    pub fn add_unregistered_database(&self, database: Database) -> CatalogResult<Arc<Database>> {
        let (bucket, created) = {
            let mut slot = self
                .unregistered
                .write()
                .map_err(|_| CatalogError::LockPoisoned("unregistered bucket"))?;
            match slot.as_ref() {
                Some(bucket) => (Arc::clone(bucket), false),
                None => {
                    let bucket = self.attach(Server::synthetic(
                        UNREGISTERED_SERVER_NAME,
                        "localhost",
                        Arc::clone(&self.state),
                    ))?;
                    *slot = Some(Arc::clone(&bucket));
                    (bucket, true)
                }
            }
        };
        if created {
            self.state.mark_dirty();
            self.subject.notify_observers();
        }
        bucket.add_database(database)
    }

    /// Replaces the registered servers with the stored document.
    ///
    /// Returns `Ok(false)` when the store holds nothing yet. The document is
    /// parsed completely before anything changes, so a malformed one leaves
    /// the registry as it was.
    pub fn load(&self) -> CatalogResult<bool> {
        let Some(text) = self.store.read()? else {
            log::debug!("no registry at {}", self.store.location().display());
            return Ok(false);
        };
        let document = xml::parse(&text)?;

        let existing: Vec<Arc<Server>> = self
            .servers()
            .into_iter()
            .filter(|server| !server.is_synthetic())
            .collect();
        let depth = self.subject.lock_count();
        if let Some(busy) = existing
            .iter()
            .find(|server| server.subject().lock_count() > depth)
        {
            return Err(CatalogError::NodeBusy(busy.subject().name().to_string()));
        }

        let _loading = LoadingFlag::raise(&self.loading);
        self.servers
            .write()
            .map_err(|_| CatalogError::LockPoisoned("registry servers"))?
            .retain(|server| server.is_synthetic());
        for server in &existing {
            for _ in 0..depth {
                server.unlock_subject();
            }
        }

        let mut unnumbered = Vec::new();
        for record in document.servers {
            unnumbered.extend(self.load_server(record)?);
        }
        if let Some(next_id) = document.next_id {
            self.state.raise_next_id(next_id);
        }
        // every stored id is known by now, so fresh ones cannot collide
        for database in &unnumbered {
            database.id();
        }

        self.state.clear_dirty();
        if !unnumbered.is_empty() {
            self.state.mark_dirty();
        }
        self.subject.notify_observers();
        log::debug!(
            "registry loaded from {}: {} server(s), next id {}",
            self.store.location().display(),
            self.server_list().len(),
            self.state.next_id()
        );
        Ok(true)
    }

    /// Returns the databases that were stored without an id.
    fn load_server(&self, record: ServerRecord) -> CatalogResult<Vec<Arc<Database>>> {
        let server = self.add_server(self.new_server(&record.name, &record.host, &record.port))?;
        let mut unnumbered = Vec::new();
        for entry in record.databases {
            let stored_id = entry.id;
            let database = server.add_database(self.database_from_record(entry))?;
            match stored_id {
                Some(id) => database.set_id(id),
                None => unnumbered.push(database),
            }
        }
        Ok(unnumbered)
    }

    fn database_from_record(&self, record: DatabaseRecord) -> Database {
        let authentication = match AuthenticationMode::from_config_value(&record.authentication) {
            Some(mode) => mode,
            None if record.authentication.is_empty() && record.encrypted => {
                AuthenticationMode::EncryptedPassword
            }
            None => {
                if !record.authentication.is_empty() {
                    log::warn!(
                        "unknown authentication mode {:?} for database {}",
                        record.authentication,
                        record.name
                    );
                }
                AuthenticationMode::default()
            }
        };
        let settings = DatabaseSettings {
            path: record.path,
            charset: record.charset,
            role: record.role,
            credentials: Credentials::new(record.username, record.password),
            authentication,
        };
        self.new_database(&record.name, settings)
    }

    /// Writes every registered server to the store.
    ///
    /// Skipped while loading. Session credentials are dropped first so only
    /// configured ones are written. On failure the registry stays dirty.
    pub fn save(&self) -> CatalogResult<()> {
        if self.is_loading() {
            log::trace!("registry save suppressed during load");
            return Ok(());
        }

        let mut servers = Vec::new();
        for server in self.servers().into_iter().filter(|server| !server.is_synthetic()) {
            let databases = server
                .databases()
                .iter()
                .map(|database| {
                    database.reset_credentials();
                    let settings = database.settings();
                    DatabaseRecord {
                        id: Some(database.id()),
                        name: database.subject().name().to_string(),
                        path: settings.path,
                        charset: settings.charset,
                        username: settings.credentials.username,
                        password: settings.credentials.password,
                        role: settings.role,
                        authentication: settings.authentication.config_value().to_owned(),
                        encrypted: false,
                    }
                })
                .collect();
            servers.push(ServerRecord {
                name: server.subject().name().to_string(),
                host: server.host(),
                port: server.port(),
                databases,
            });
        }
        let document = RegistryDocument {
            next_id: Some(self.state.next_id()),
            servers,
        };

        let text = xml::render(&document)?;
        self.store.write(&text)?;
        self.state.clear_dirty();
        log::debug!(
            "registry saved to {} ({} server(s))",
            self.store.location().display(),
            document.servers.len()
        );
        Ok(())
    }

    /// Disconnects every database. Stops at the first busy one.
    pub fn disconnect_all(&self) -> CatalogResult<()> {
        for server in self.servers() {
            server.disconnect_all()?;
        }
        Ok(())
    }

    pub fn notify_all_servers(&self) {
        for server in self.servers() {
            server.subject().notify_observers();
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::capture(self)
    }
}

impl Lockable for Registry {
    fn subject(&self) -> &Subject {
        &self.subject
    }

    fn lock_children(&self) {
        for server in self.servers() {
            server.lock_subject();
        }
    }

    fn unlock_children(&self) {
        for server in self.servers() {
            server.unlock_subject();
        }
    }
}

impl MetadataNode for Registry {
    fn loaded_children(&self) -> Vec<NodeRef> {
        self.servers().into_iter().map(NodeRef::Server).collect()
    }

    fn accept(&self, visitor: &mut dyn MetadataVisitor) {
        visitor.visit_registry(self);
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.state.is_dirty() {
            return;
        }
        if let Err(err) = self.save() {
            log::warn!("registry could not be saved on shutdown: {err}");
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("location", &self.store.location())
            .field("servers", &self.server_list().len())
            .field("next_id", &self.state.next_id())
            .field("dirty", &self.state.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(InMemoryStore::new())
    }

    #[test]
    fn empty_registry_still_writes_counter() {
        let registry = registry();
        registry.save().unwrap();
        let stored = registry.store.read().unwrap().unwrap();
        assert!(stored.contains("<nextId>1</nextId>"));
    }

    #[test]
    fn missing_document_loads_nothing() {
        let registry = registry();
        assert!(!registry.load().unwrap());
        assert!(registry.servers().is_empty());
    }

    #[test]
    fn unregistered_bucket_is_created_once() {
        let registry = registry();
        let scratch = |path: &str| registry.new_database("", DatabaseSettings::with_path(path));
        let first = registry
            .add_unregistered_database(scratch("/tmp/a.fdb"))
            .unwrap();
        registry
            .add_unregistered_database(scratch("/tmp/b.fdb"))
            .unwrap();
        assert_eq!(registry.servers().len(), 1);
        let bucket = registry.unregistered_server().unwrap();
        assert_eq!(bucket.database_count(), 2);
        assert_eq!(first.subject().name(), "a");
        assert!(registry.is_dirty());

        registry.state.clear_dirty();
        registry.remove_server(&bucket).unwrap();
        assert!(registry.unregistered_server().is_none());
        assert!(registry.is_dirty());
        assert!(registry.store.read().unwrap().is_none());
    }

    #[test]
    fn locked_server_cannot_be_removed() {
        let registry = registry();
        let server = registry
            .add_server(registry.new_server("SrvA", "localhost", ""))
            .unwrap();
        let _lock = crate::engine::lock::ReferenceLock::new(&*server);
        assert!(matches!(
            registry.remove_server(&server),
            Err(CatalogError::NodeBusy(_))
        ));
    }

    #[test]
    fn ids_allocated_on_load_skip_later_stored_ids() {
        let store = InMemoryStore::with_contents(
            "<root><server><host>h</host>\
             <database><path>/d/a.fdb</path></database>\
             <database><id>1</id><path>/d/b.fdb</path></database>\
             </server></root>",
        );
        let registry = Registry::open(store).unwrap();
        let databases = registry.servers()[0].databases();
        assert_eq!(databases[1].id(), 1);
        assert_eq!(databases[0].id(), 2);
        assert_eq!(registry.next_id(), 3);
    }

    #[test]
    fn legacy_encrypted_flag_maps_to_encrypted_mode() {
        let store = InMemoryStore::with_contents(
            "<root><server><host>h</host><database><path>/d/x.fdb</path>\
             <encrypted>1</encrypted></database></server></root>",
        );
        let registry = Registry::open(store).unwrap();
        let server = &registry.servers()[0];
        assert_eq!(server.subject().name(), "h");
        let database = &server.databases()[0];
        assert_eq!(database.subject().name(), "x");
        assert_eq!(
            database.settings().authentication,
            AuthenticationMode::EncryptedPassword
        );
        assert!(database.has_id());
        assert!(registry.is_dirty());
    }
}
