//! Execution of the subcommands against an open registry.

use std::io::Write;

use dbtree_core::metadata::walk_loaded;
use dbtree_core::{
    Credentials, Database, DatabaseSettings, Lockable, MetadataVisitor, Parameter, Procedure,
    Registry, RegistrySnapshot, Server,
};

use crate::cli::Command;
use crate::error::{BrowserError, Result};

pub fn run(registry: &Registry, command: &Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::List => {
            let mut printer = TreePrinter::default();
            walk_loaded(registry, &mut printer);
            for line in printer.lines {
                writeln!(out, "{line}")?;
            }
        }
        Command::Export => {
            let snapshot = RegistrySnapshot::capture(registry);
            serde_json::to_writer_pretty(&mut *out, &snapshot)?;
            writeln!(out)?;
        }
        Command::AddServer { name, host, port } => {
            if registry.find_server(name).is_some() {
                return Err(BrowserError::Usage(format!("server '{name}' already exists")));
            }
            let server = registry.new_server(name, host, port.as_deref().unwrap_or(""));
            let server = registry.add_server(server)?;
            tracing::info!(server = %server.subject().name(), "server registered");
        }
        Command::AddDatabase {
            server,
            name,
            path,
            user,
        } => {
            let owner = registry
                .find_server(server)
                .ok_or_else(|| BrowserError::Usage(format!("no server named '{server}'")))?;
            let mut settings = DatabaseSettings::with_path(path.as_str());
            if let Some(user) = user {
                settings.credentials = Credentials::new(user.as_str(), "");
            }
            let database = registry.add_database(&owner, registry.new_database(name, settings))?;
            tracing::info!(
                database = %database.subject().name(),
                id = database.id(),
                "database registered"
            );
        }
        Command::RemoveServer { name } => {
            let server = registry
                .find_server(name)
                .ok_or_else(|| BrowserError::Usage(format!("no server named '{name}'")))?;
            registry.remove_server(&server)?;
            tracing::info!(server = %name, "server removed");
        }
    }
    Ok(())
}

/// Renders loaded nodes as an indented outline, one line per node.
#[derive(Default)]
struct TreePrinter {
    lines: Vec<String>,
}

impl TreePrinter {
    fn push(&mut self, depth: usize, text: String) {
        self.lines.push(format!("{}{text}", "  ".repeat(depth)));
    }
}

impl MetadataVisitor for TreePrinter {
    fn visit_registry(&mut self, registry: &Registry) {
        self.push(0, registry.subject().name().to_string());
    }

    fn visit_server(&mut self, server: &Server) {
        let mut line = format!("{} ({})", server.subject().name(), server.connection_string());
        if server.is_synthetic() {
            line.push_str(" [unregistered]");
        }
        self.push(1, line);
    }

    fn visit_database(&mut self, database: &Database) {
        let mut line = database.subject().name().to_string();
        if database.has_id() {
            line.push_str(&format!(" #{}", database.id()));
        }
        line.push_str(&format!(" {}", database.path()));
        if database.is_connected() {
            line.push_str(" [connected]");
        }
        self.push(2, line);
    }

    fn visit_procedure(&mut self, procedure: &Procedure) {
        self.push(3, procedure.subject().name().to_string());
    }

    fn visit_parameter(&mut self, parameter: &Parameter) {
        let arrow = if parameter.is_output() { "out" } else { "in" };
        self.push(
            4,
            format!("{} {arrow} {}", parameter.subject().name(), parameter.source()),
        );
    }
}
