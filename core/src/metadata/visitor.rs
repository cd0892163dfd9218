use serde::Serialize;

use crate::engine::lock::Lockable;
use crate::metadata::database::Database;
use crate::metadata::parameter::Parameter;
use crate::metadata::procedure::Procedure;
use crate::metadata::server::Server;
use crate::registry::Registry;

/// Per-kind callbacks for walking the tree. Every method defaults to a no-op.
pub trait MetadataVisitor {
    fn visit_registry(&mut self, _registry: &Registry) {}

    fn visit_server(&mut self, _server: &Server) {}

    fn visit_database(&mut self, _database: &Database) {}

    fn visit_procedure(&mut self, _procedure: &Procedure) {}

    fn visit_parameter(&mut self, _parameter: &Parameter) {}
}

/// Counts the nodes currently in memory, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub servers: usize,
    pub databases: usize,
    pub connected_databases: usize,
    pub procedures: usize,
    pub parameters: usize,
    pub locked: usize,
}

impl TreeStats {
    fn count_lock(&mut self, locked: bool) {
        if locked {
            self.locked += 1;
        }
    }
}

impl MetadataVisitor for TreeStats {
    fn visit_server(&mut self, server: &Server) {
        self.servers += 1;
        self.count_lock(server.is_locked());
    }

    fn visit_database(&mut self, database: &Database) {
        self.databases += 1;
        if database.is_connected() {
            self.connected_databases += 1;
        }
        self.count_lock(database.is_locked());
    }

    fn visit_procedure(&mut self, procedure: &Procedure) {
        self.procedures += 1;
        self.count_lock(procedure.is_locked());
    }

    fn visit_parameter(&mut self, parameter: &Parameter) {
        self.parameters += 1;
        self.count_lock(parameter.is_locked());
    }
}
