use std::sync::Arc;

use serde::Serialize;

use crate::engine::lock::Lockable;
use crate::metadata::database::{AuthenticationMode, Database};
use crate::metadata::server::Server;
use crate::registry::Registry;

/// Read-only copy of the registry, suitable for export.
///
/// Capturing never allocates ids and never includes passwords.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub next_id: u64,
    pub dirty: bool,
    pub servers: Vec<ServerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    pub unregistered: bool,
    pub databases: Vec<DatabaseSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub charset: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role: String,
    pub authentication: AuthenticationMode,
    pub connected: bool,
}

impl RegistrySnapshot {
    pub fn capture(registry: &Registry) -> Self {
        Self {
            next_id: registry.next_id(),
            dirty: registry.is_dirty(),
            servers: registry
                .servers()
                .iter()
                .map(ServerSnapshot::capture)
                .collect(),
        }
    }

    pub fn database_count(&self) -> usize {
        self.servers.iter().map(|server| server.databases.len()).sum()
    }
}

impl ServerSnapshot {
    fn capture(server: &Arc<Server>) -> Self {
        Self {
            name: server.subject().name().to_string(),
            host: server.host(),
            port: server.port(),
            unregistered: server.is_synthetic(),
            databases: server
                .databases()
                .iter()
                .map(DatabaseSnapshot::capture)
                .collect(),
        }
    }
}

impl DatabaseSnapshot {
    fn capture(database: &Arc<Database>) -> Self {
        let settings = database.settings();
        Self {
            id: database.has_id().then(|| database.id()),
            name: database.subject().name().to_string(),
            path: settings.path,
            charset: settings.charset,
            username: settings.credentials.username,
            role: settings.role,
            authentication: settings.authentication,
            connected: database.is_connected(),
        }
    }
}
