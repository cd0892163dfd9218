//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Browse and edit the registered catalog servers and databases.
#[derive(Parser, Debug)]
#[command(name = "dbtree")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file (overrides DBTREE_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the registry as an indented tree
    List,
    /// Print a JSON snapshot of the registry
    Export,
    /// Register a server
    AddServer {
        name: String,
        host: String,
        port: Option<String>,
    },
    /// Register a database under an existing server
    AddDatabase {
        server: String,
        name: String,
        path: String,
        user: Option<String>,
    },
    /// Remove a server and all of its databases
    RemoveServer { name: String },
}

impl Command {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Command::List | Command::Export)
    }
}
