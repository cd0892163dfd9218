use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use common::ident::Identifier;
use common::node::NodeKind;
use serde::Serialize;

use crate::engine::children::Children;
use crate::engine::loader::{CatalogConnection, MetadataLoader};
use crate::engine::lock::Lockable;
use crate::engine::subject::Subject;
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::procedure::Procedure;
use crate::metadata::visitor::MetadataVisitor;
use crate::metadata::{LoaderLink, MetadataNode, NodeRef};
use crate::registry::state::{RegistryState, MAX_ID};

const PROCEDURES_SQL: &str = "select rdb$procedure_name from rdb$procedures \
     where (rdb$system_flag = 0 or rdb$system_flag is null) order by 1";

/// How the password for a registered database is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMode {
    #[default]
    SavedPassword,
    EncryptedPassword,
    AskPassword,
    Trusted,
}

impl AuthenticationMode {
    pub fn config_value(&self) -> &'static str {
        match self {
            AuthenticationMode::SavedPassword => "pwd",
            AuthenticationMode::EncryptedPassword => "encpwd",
            AuthenticationMode::AskPassword => "askpwd",
            AuthenticationMode::Trusted => "trusted",
        }
    }

    pub fn from_config_value(value: &str) -> Option<Self> {
        match value.trim() {
            "pwd" => Some(AuthenticationMode::SavedPassword),
            "encpwd" => Some(AuthenticationMode::EncryptedPassword),
            "askpwd" => Some(AuthenticationMode::AskPassword),
            "trusted" => Some(AuthenticationMode::Trusted),
            _ => None,
        }
    }

    pub fn uses_saved_password(&self) -> bool {
        matches!(
            self,
            AuthenticationMode::SavedPassword | AuthenticationMode::EncryptedPassword
        )
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Persisted connection settings of a registered database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub path: String,
    pub charset: String,
    pub role: String,
    pub credentials: Credentials,
    pub authentication: AuthenticationMode,
}

impl DatabaseSettings {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Display name derived from a connection path: the file name without its
/// extension. Both `/` and `\` separate directories.
pub fn extract_name_from_path(path: &str) -> String {
    let file = path
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(path);
    let file = file.rsplit_once(':').map_or(file, |(_, rest)| rest);
    match file.rfind('.') {
        Some(dot) if dot > 0 => file[..dot].to_owned(),
        _ => file.to_owned(),
    }
}

/// A registered database and, once connected, its catalog objects.
pub struct Database {
    subject: Subject,
    id: Mutex<Option<u64>>,
    registry: Arc<RegistryState>,
    settings: RwLock<DatabaseSettings>,
    session: RwLock<Option<Credentials>>,
    link: LoaderLink,
    procedures: Children<Procedure>,
}

impl Database {
    /// An empty `name` falls back to the name derived from the path.
    pub fn new(name: &str, settings: DatabaseSettings, registry: Arc<RegistryState>) -> Self {
        let name = match name.trim() {
            "" => extract_name_from_path(&settings.path),
            name => name.to_owned(),
        };
        Self {
            subject: Subject::new(NodeKind::Database, Identifier::from(name)),
            id: Mutex::new(None),
            registry,
            settings: RwLock::new(settings),
            session: RwLock::new(None),
            link: LoaderLink::default(),
            procedures: Children::new(),
        }
    }

    /// Stable id, allocated from the registry on first request.
    pub fn id(&self) -> u64 {
        let mut id = match self.id.lock() {
            Ok(id) => id,
            Err(poisoned) => poisoned.into_inner(),
        };
        *id.get_or_insert_with(|| {
            let allocated = self.registry.allocate_id();
            log::debug!("allocated id {allocated} for database {}", self.subject.name());
            allocated
        })
    }

    pub fn has_id(&self) -> bool {
        self.id.lock().map(|id| id.is_some()).unwrap_or(false)
    }

    /// Adopts an id read from storage and keeps the allocator above it.
    /// Ids above [`MAX_ID`] are ignored.
    pub fn set_id(&self, id: u64) {
        if id > MAX_ID {
            log::warn!("database {} keeps its id; {id} is out of range", self.subject.name());
            return;
        }
        match self.id.lock() {
            Ok(mut slot) => *slot = Some(id),
            Err(poisoned) => *poisoned.into_inner() = Some(id),
        }
        self.registry.observe_id(id);
    }

    pub fn rename(&self, name: &str) {
        self.subject.set_name(Identifier::from(name.to_owned()));
        self.registry.mark_dirty();
        self.subject.notify_observers();
    }

    pub fn settings(&self) -> DatabaseSettings {
        match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn path(&self) -> String {
        self.settings().path
    }

    /// Edits the persisted settings, marking the registry dirty.
    pub fn update(&self, edit: impl FnOnce(&mut DatabaseSettings)) -> CatalogResult<()> {
        {
            let mut settings = self
                .settings
                .write()
                .map_err(|_| CatalogError::LockPoisoned("database settings"))?;
            edit(&mut settings);
        }
        self.registry.mark_dirty();
        self.subject.notify_observers();
        Ok(())
    }

    /// Credentials in effect: session ones when entered, else configured.
    pub fn credentials(&self) -> Credentials {
        let session = self.session.read().ok().and_then(|session| session.clone());
        session.unwrap_or_else(|| self.settings().credentials)
    }

    /// Credentials entered for this session only; never persisted.
    pub fn set_session_credentials(&self, credentials: Credentials) {
        match self.session.write() {
            Ok(mut session) => *session = Some(credentials),
            Err(poisoned) => *poisoned.into_inner() = Some(credentials),
        }
    }

    /// Drops session credentials. Returns whether any were set.
    pub fn reset_credentials(&self) -> bool {
        match self.session.write() {
            Ok(mut session) => session.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        }
    }

    pub fn connect(&self, connection: Arc<dyn CatalogConnection>) {
        let loader = MetadataLoader::new(connection);
        log::debug!(
            "database {} connected, catalog version {}",
            self.subject.name(),
            loader.version()
        );
        self.link.attach(Arc::new(loader));
        self.subject.notify_observers();
    }

    pub fn disconnect(&self) -> CatalogResult<()> {
        if self.subject.is_locked() {
            return Err(CatalogError::NodeBusy(self.subject.name().to_string()));
        }
        if self.link.detach().is_some() {
            self.procedures.invalidate();
            log::debug!("database {} disconnected", self.subject.name());
            self.subject.notify_observers();
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_attached()
    }

    pub fn loader(&self) -> CatalogResult<Arc<MetadataLoader>> {
        self.link.get()
    }

    fn fetch_procedures(&self, loader: &MetadataLoader) -> CatalogResult<Vec<Procedure>> {
        let rows = loader.statement(PROCEDURES_SQL)?.execute(&[])?;
        Ok(rows
            .iter()
            .map(|row| Procedure::new(row.identifier(0), self.link.clone()))
            .collect())
    }

    /// Non-system procedures, loaded on first request.
    pub fn procedures(&self) -> CatalogResult<Vec<Arc<Procedure>>> {
        let loader = self.link.get()?;
        self.procedures
            .ensure_loaded(self, &loader, |loader| self.fetch_procedures(loader))
    }

    /// Refetches the procedure list. Returns whether it changed.
    pub fn reload_procedures(&self) -> CatalogResult<bool> {
        let loader = self.link.get()?;
        let summary = self
            .procedures
            .load(self, &loader, |loader| self.fetch_procedures(loader))?;
        Ok(summary.changed)
    }

    pub fn find_procedure(&self, name: &str) -> Option<Arc<Procedure>> {
        self.procedures.find(name)
    }

    pub fn procedures_loaded(&self) -> bool {
        self.procedures.is_loaded()
    }

    pub fn invalidate(&self) {
        self.procedures.invalidate();
    }
}

impl Lockable for Database {
    fn subject(&self) -> &Subject {
        &self.subject
    }

    fn lock_children(&self) {
        self.procedures.lock_all();
    }

    fn unlock_children(&self) {
        self.procedures.unlock_all();
    }
}

impl MetadataNode for Database {
    fn loaded_children(&self) -> Vec<NodeRef> {
        self.procedures
            .snapshot()
            .into_iter()
            .map(NodeRef::Procedure)
            .collect()
    }

    fn children(&self) -> CatalogResult<Vec<NodeRef>> {
        if !self.is_connected() {
            return Ok(Vec::new());
        }
        Ok(self
            .procedures()?
            .into_iter()
            .map(NodeRef::Procedure)
            .collect())
    }

    fn accept(&self, visitor: &mut dyn MetadataVisitor) {
        visitor.visit_database(self);
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.subject.name())
            .field("id", &self.id.lock().ok().and_then(|id| *id))
            .field("settings", &self.settings())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(name: &str, path: &str) -> (Arc<RegistryState>, Database) {
        let registry = Arc::new(RegistryState::new());
        let database = Database::new(name, DatabaseSettings::with_path(path), registry.clone());
        (registry, database)
    }

    #[test]
    fn name_falls_back_to_file_stem() {
        assert_eq!(extract_name_from_path("/var/db/employee.fdb"), "employee");
        assert_eq!(extract_name_from_path("C:\\Data\\SALES.GDB"), "SALES");
        assert_eq!(extract_name_from_path("server:/db/stock"), "stock");
        assert_eq!(extract_name_from_path("alias"), "alias");

        let (_, db) = database("", "/var/db/employee.fdb");
        assert_eq!(db.subject().name(), "employee");
    }

    #[test]
    fn id_is_allocated_lazily_once() {
        let (registry, db) = database("DbA", "/db/a.fdb");
        assert!(!db.has_id());
        assert!(!registry.is_dirty());
        let id = db.id();
        assert_eq!(db.id(), id);
        assert!(registry.is_dirty());
        assert_eq!(registry.next_id(), id + 1);
    }

    #[test]
    fn stored_id_raises_allocator() {
        let (registry, db) = database("DbA", "/db/a.fdb");
        db.set_id(42);
        assert_eq!(db.id(), 42);
        assert_eq!(registry.next_id(), 43);
    }

    #[test]
    fn session_credentials_override_until_reset() {
        let (_, db) = database("DbA", "/db/a.fdb");
        db.update(|settings| settings.credentials = Credentials::new("SYSDBA", "masterkey"))
            .unwrap();
        db.set_session_credentials(Credentials::new("GUEST", "guest"));
        assert_eq!(db.credentials().username, "GUEST");

        assert!(db.reset_credentials());
        assert_eq!(db.credentials().username, "SYSDBA");
        assert!(!db.reset_credentials());
    }

    #[test]
    fn unconnected_database_reports_loader_unavailable() {
        let (_, db) = database("DbA", "/db/a.fdb");
        assert!(matches!(
            db.procedures(),
            Err(CatalogError::LoaderUnavailable(_))
        ));
        assert!(db.children().unwrap().is_empty());
    }

    #[test]
    fn auth_modes_round_trip_config_values() {
        for mode in [
            AuthenticationMode::SavedPassword,
            AuthenticationMode::EncryptedPassword,
            AuthenticationMode::AskPassword,
            AuthenticationMode::Trusted,
        ] {
            assert_eq!(AuthenticationMode::from_config_value(mode.config_value()), Some(mode));
        }
        assert_eq!(AuthenticationMode::from_config_value("bogus"), None);
    }
}
